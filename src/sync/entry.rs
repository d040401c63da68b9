//! Per-document cache entries

use std::sync::Arc;
use parking_lot::Mutex;
use serde_json::Value;
use crate::core::ids::DocId;
use crate::sync::listener::{Delivery, ListenerRecord};
use crate::sync::path::{self, Lookup, Path, PathError};
use crate::sync::value::{empty_document, values_equal};

/// In-memory mirror of one document's data plus synchronization bookkeeping
#[derive(Debug)]
pub struct CacheEntry {
    pub(crate) document: DocId,
    pub(crate) data: Value,
    pub(crate) listeners: Vec<ListenerRecord>,
    /// Local changes not yet handed to the persistence adapter
    pub(crate) dirty: bool,
    /// Saturating; starts at `u32::MAX` because no local write happened yet
    pub(crate) ticks_since_last_local_write: u32,
    pub(crate) loaded: bool,
    pub(crate) load_in_flight: bool,
    pub(crate) write_in_flight: bool,
    /// Set once the entry has been removed from the registry table
    pub(crate) evicted: bool,
}

impl CacheEntry {
    pub(crate) fn new(document: DocId) -> Self {
        Self {
            document,
            data: empty_document(),
            listeners: Vec::new(),
            dirty: false,
            ticks_since_last_local_write: u32::MAX,
            loaded: false,
            load_in_flight: false,
            write_in_flight: false,
            evicted: false,
        }
    }

    /// Value at `path`, null when absent
    pub(crate) fn value_at(&self, path: &Path) -> Value {
        path::get_or_null(&self.data, path)
    }

    /// Apply a local write. Returns `Ok(false)` when the stored value is
    /// already deep-equal, in which case nothing is touched.
    pub(crate) fn apply_update(&mut self, path: &Path, value: Value) -> Result<bool, PathError> {
        match path::get(&self.data, path) {
            Lookup::ParentMissing => return Err(PathError::ParentMissing),
            Lookup::Found(current) if values_equal(current, &value) => return Ok(false),
            Lookup::Null if value.is_null() => return Ok(false),
            _ => {}
        }

        path::set(&mut self.data, path, value)?;
        self.dirty = true;
        self.ticks_since_last_local_write = 0;
        Ok(true)
    }

    /// Wholesale replacement of the cached data
    pub(crate) fn replace_data(&mut self, data: Value, mark_dirty: bool) {
        self.data = data;
        if mark_dirty {
            self.dirty = true;
            self.ticks_since_last_local_write = 0;
        }
    }

    /// Advance the recency counter by one tick
    pub(crate) fn age(&mut self) {
        self.ticks_since_last_local_write = self.ticks_since_last_local_write.saturating_add(1);
    }

    /// Remove every listener registered under `id`, reporting whether any was found
    pub(crate) fn remove_listener(&mut self, id: &str) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| {
            if l.id == id {
                l.retire();
                return false;
            }
            true
        });
        self.listeners.len() != before
    }

    /// Prepare callbacks.
    ///
    /// With a path only listeners bound to exactly that path are selected and
    /// all receive the same value. Without one every listener receives the
    /// value at its own path. `except_id` is skipped in both cases.
    pub(crate) fn deliveries_for(&self, changed: Option<&Path>, except_id: Option<&str>) -> Vec<Delivery> {
        self.listeners
            .iter()
            .filter(|l| except_id != Some(l.id.as_str()))
            .filter(|l| changed.map_or(true, |p| &l.path == p))
            .map(|l| l.delivery(self.value_at(&l.path)))
            .collect()
    }
}

/// Read access to a registered document's cache entry.
///
/// Handles never expose the underlying data mutably; every accessor returns
/// an owned copy. A handle outliving eviction keeps reading the detached
/// entry's last state.
#[derive(Clone)]
pub struct CacheHandle {
    document: DocId,
    entry: Arc<Mutex<CacheEntry>>,
}

impl CacheHandle {
    pub(crate) fn new(document: DocId, entry: Arc<Mutex<CacheEntry>>) -> Self {
        Self { document, entry }
    }

    /// Document this handle belongs to
    pub fn document(&self) -> DocId {
        self.document
    }

    /// Copy of the whole cached document
    pub fn snapshot(&self) -> Value {
        self.entry.lock().data.clone()
    }

    /// Copy of the value at `path`, null when absent
    pub fn get(&self, path: &Path) -> Value {
        self.entry.lock().value_at(path)
    }

    /// Whether the initial load from the persistence adapter has completed
    pub fn is_loaded(&self) -> bool {
        self.entry.lock().loaded
    }

    /// Whether local changes are waiting for the next tick
    pub fn is_dirty(&self) -> bool {
        self.entry.lock().dirty
    }

    /// Ticks elapsed since the last local write
    pub fn ticks_since_last_local_write(&self) -> u32 {
        self.entry.lock().ticks_since_last_local_write
    }

    /// Number of listeners currently registered on the entry
    pub fn listener_count(&self) -> usize {
        self.entry.lock().listeners.len()
    }

    /// Whether the entry has been evicted from the registry
    pub fn is_detached(&self) -> bool {
        self.entry.lock().evicted
    }
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle").field("document", &self.document).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::listener::downgrade;
    use serde_json::json;

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    fn entry_with(data: Value) -> CacheEntry {
        let mut entry = CacheEntry::new(DocId::random());
        entry.data = data;
        entry.loaded = true;
        entry
    }

    #[test]
    fn new_entry_is_empty_and_old() {
        let entry = CacheEntry::new(DocId::random());
        assert_eq!(entry.data, json!({}));
        assert!(!entry.dirty);
        assert!(!entry.loaded);
        assert_eq!(entry.ticks_since_last_local_write, u32::MAX);
    }

    #[test]
    fn update_marks_dirty_and_resets_recency() {
        let mut entry = entry_with(json!({"a": {"b": 1}}));
        entry.age();
        assert_eq!(entry.apply_update(&p("a.b"), json!(2)), Ok(true));
        assert!(entry.dirty);
        assert_eq!(entry.ticks_since_last_local_write, 0);
        assert_eq!(entry.data, json!({"a": {"b": 2}}));
    }

    #[test]
    fn redundant_update_touches_nothing() {
        let mut entry = entry_with(json!({"a": {"b": 1}, "n": null}));
        entry.ticks_since_last_local_write = 7;
        assert_eq!(entry.apply_update(&p("a.b"), json!(1.0)), Ok(false));
        assert_eq!(entry.apply_update(&p("n"), Value::Null), Ok(false));
        assert!(!entry.dirty);
        assert_eq!(entry.ticks_since_last_local_write, 7);
    }

    #[test]
    fn missing_parent_is_rejected_untouched() {
        let mut entry = entry_with(json!({"a": 1}));
        assert_eq!(entry.apply_update(&p("x.y"), json!(1)), Err(PathError::ParentMissing));
        assert_eq!(entry.data, json!({"a": 1}));
        assert!(!entry.dirty);
    }

    #[test]
    fn aging_saturates() {
        let mut entry = CacheEntry::new(DocId::random());
        entry.age();
        assert_eq!(entry.ticks_since_last_local_write, u32::MAX);
    }

    #[test]
    fn deliveries_filter_by_path_and_origin() {
        let listener = Arc::new(|_: &Value| {});
        let mut entry = entry_with(json!({"a": 1, "b": 2}));
        for (id, path) in [("x", "a"), ("y", "a"), ("z", "b")] {
            entry.listeners.push(ListenerRecord::new(id.into(), p(path), downgrade(&listener)));
        }

        assert_eq!(entry.deliveries_for(Some(&p("a")), Some("x")).len(), 1);
        assert_eq!(entry.deliveries_for(Some(&p("a")), None).len(), 2);
        assert_eq!(entry.deliveries_for(None, None).len(), 3);
        assert_eq!(entry.deliveries_for(None, Some("z")).len(), 2);
    }

    #[test]
    fn remove_listener_reports_presence() {
        let listener = Arc::new(|_: &Value| {});
        let mut entry = entry_with(json!({}));
        entry.listeners.push(ListenerRecord::new("x".into(), p("a"), downgrade(&listener)));
        assert!(!entry.remove_listener("nope"));
        let record = entry.listeners[0].clone();
        assert!(entry.remove_listener("x"));
        assert!(entry.listeners.is_empty());
        assert!(!record.is_registered());
    }
}
