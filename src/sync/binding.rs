//! Ready-made bound consumer
//!
//! A [`BoundField`] mirrors one path of one document. It keeps the latest
//! value it has seen, writes through the registry either immediately
//! ([`push`](BoundField::push)) or coalesced ([`stage`](BoundField::stage) +
//! [`flush`](BoundField::flush)), and unregisters itself when dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;
use crate::core::error::Result;
use crate::core::ids::DocId;
use crate::sync::entry::CacheHandle;
use crate::sync::listener::MetadataListener;
use crate::sync::manager::MetadataManager;
use crate::sync::path::Path;
use crate::sync::scheduler::Scheduler;
use crate::log_warn;

/// Field synchronized with one path of a document
pub struct BoundField {
    manager: Arc<MetadataManager>,
    id: String,
    document: DocId,
    path: Path,
    handle: Mutex<Option<CacheHandle>>,
    value: Mutex<Value>,
    pending: Mutex<Option<Value>>,
    bound: AtomicBool,
}

impl BoundField {
    /// Bind a new field under a random id
    pub fn bind(manager: &Arc<MetadataManager>, document: DocId, path: Path) -> Arc<Self> {
        Self::bind_with_id(manager, document, path, Uuid::new_v4().to_string())
    }

    /// Bind a new field under a caller-chosen id
    pub fn bind_with_id(
        manager: &Arc<MetadataManager>,
        document: DocId,
        path: Path,
        id: impl Into<String>,
    ) -> Arc<Self> {
        let field = Arc::new(Self {
            manager: manager.clone(),
            id: id.into(),
            document,
            path,
            handle: Mutex::new(None),
            value: Mutex::new(Value::Null),
            pending: Mutex::new(None),
            bound: AtomicBool::new(true),
        });

        let handle = manager.register(document, &field, field.path.clone(), field.id.clone());
        *field.value.lock() = handle.get(&field.path);
        *field.handle.lock() = Some(handle);
        field
    }

    /// Listener id used for origin exclusion
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bound document
    pub fn document(&self) -> DocId {
        self.document
    }

    /// Bound path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest value, including staged but unflushed input
    pub fn value(&self) -> Value {
        self.value.lock().clone()
    }

    /// Handle to the document's cache entry
    pub fn handle(&self) -> Option<CacheHandle> {
        self.handle.lock().clone()
    }

    /// Write `value` through the registry now. Drops any staged value.
    pub fn push(&self, value: Value) -> Result<bool> {
        self.pending.lock().take();
        *self.value.lock() = value.clone();
        self.manager
            .update_property_at_path(self.document, &self.path, value, &self.id)
    }

    /// Record `value` locally; only the last staged value is written on flush
    pub fn stage(&self, value: Value) {
        *self.value.lock() = value.clone();
        *self.pending.lock() = Some(value);
    }

    /// Whether a staged value awaits `flush`
    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Write the staged value, if any
    pub fn flush(&self) -> Result<bool> {
        let Some(value) = self.pending.lock().take() else {
            return Ok(false);
        };
        self.manager
            .update_property_at_path(self.document, &self.path, value, &self.id)
    }

    /// Flush staged input on every tick of `scheduler`
    pub fn drive_with(self: &Arc<Self>, scheduler: &dyn Scheduler) -> Result<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        scheduler.start(Arc::new(move || {
            if let Some(field) = weak.upgrade() {
                if let Err(e) = field.flush() {
                    log_warn!("BoundField '{}' flush failed: {}", field.id, e);
                }
            }
        }))
    }

    /// Stop receiving updates. Dropping the field does the same.
    pub fn unbind(&self) {
        if self.bound.swap(false, Ordering::SeqCst) {
            self.manager.unregister(self.document, &self.id);
        }
    }

    /// Whether the field is still registered
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }
}

impl MetadataListener for BoundField {
    fn on_update(&self, value: &Value) {
        *self.value.lock() = value.clone();
    }
}

impl Drop for BoundField {
    fn drop(&mut self) {
        self.unbind();
    }
}

impl std::fmt::Debug for BoundField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundField")
            .field("id", &self.id)
            .field("document", &self.document)
            .field("path", &self.path.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SyncConfig;
    use crate::storage::MemoryAdapter;
    use crate::sync::scheduler::ManualScheduler;
    use serde_json::json;

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    async fn setup(data: Value) -> (Arc<MemoryAdapter>, Arc<ManualScheduler>, Arc<MetadataManager>, DocId) {
        let adapter = Arc::new(MemoryAdapter::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let manager = MetadataManager::new(adapter.clone(), scheduler.clone(), SyncConfig::default()).unwrap();
        let doc = DocId::random();
        adapter.insert(doc, data);
        (adapter, scheduler, manager, doc)
    }

    #[tokio::test]
    async fn fields_follow_each_other() {
        let (_, _, manager, doc) = setup(json!({"title": "draft"})).await;
        let a = BoundField::bind(&manager, doc, p("title"));
        let b = BoundField::bind(&manager, doc, p("title"));
        manager.settle().await;
        assert_eq!(a.value(), json!("draft"));
        assert_eq!(b.value(), json!("draft"));

        assert!(a.push(json!("final")).unwrap());
        assert_eq!(b.value(), json!("final"));
        assert_eq!(manager.get(doc, &p("title")), Some(json!("final")));
    }

    #[tokio::test]
    async fn staged_values_coalesce() {
        let (_, _, manager, doc) = setup(json!({"n": 0})).await;
        let field = BoundField::bind_with_id(&manager, doc, p("n"), "counter");
        let watcher = BoundField::bind(&manager, doc, p("n"));
        manager.settle().await;

        field.stage(json!(1));
        field.stage(json!(2));
        assert!(field.has_pending());
        assert_eq!(field.value(), json!(2));
        assert_eq!(watcher.value(), json!(0));

        assert!(field.flush().unwrap());
        assert!(!field.has_pending());
        assert_eq!(watcher.value(), json!(2));
        assert!(!field.flush().unwrap());
    }

    #[tokio::test]
    async fn scheduler_drives_flush() {
        let (_, _, manager, doc) = setup(json!({"n": 0})).await;
        let field = BoundField::bind(&manager, doc, p("n"));
        manager.settle().await;

        let debounce = ManualScheduler::new();
        field.drive_with(&debounce).unwrap();
        field.stage(json!(5));
        assert_eq!(manager.get(doc, &p("n")), Some(json!(0)));

        debounce.fire();
        assert_eq!(manager.get(doc, &p("n")), Some(json!(5)));
    }

    #[tokio::test]
    async fn dropping_a_field_unregisters_it() {
        let (_, _, manager, doc) = setup(json!({})).await;
        let field = BoundField::bind(&manager, doc, p("x"));
        assert!(manager.contains(doc));

        drop(field);
        assert!(!manager.contains(doc));
    }

    #[tokio::test]
    async fn unbind_is_idempotent() {
        let (_, _, manager, doc) = setup(json!({})).await;
        let keep = BoundField::bind(&manager, doc, p("x"));
        let field = BoundField::bind(&manager, doc, p("x"));

        field.unbind();
        field.unbind();
        assert!(!field.is_bound());
        assert_eq!(keep.handle().map(|h| h.listener_count()), Some(1));
    }

    #[tokio::test]
    async fn push_to_missing_parent_fails() {
        let (_, _, manager, doc) = setup(json!({"a": 1})).await;
        let field = BoundField::bind(&manager, doc, p("missing.child"));
        manager.settle().await;

        let err = field.push(json!(1)).unwrap_err();
        assert!(matches!(err, crate::core::Error::MissingParentPath { .. }));
    }
}
