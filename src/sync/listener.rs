//! Listener model and synchronous dispatch
//!
//! Consumers implement [`MetadataListener`]. The registry keeps only a weak
//! reference to each consumer, so a registration never extends a consumer's
//! lifetime.
//!
//! # Reentrancy
//!
//! Callbacks run synchronously on the thread that caused the update, after
//! the registry has released its internal locks. A consumer may therefore
//! write back from inside `on_update`. Its own write is never echoed back to
//! it (origin exclusion), but two consumers can still feed each other:
//! A writes, B is notified and writes a different value, A is notified and
//! writes again. Dispatch depth is tracked per thread and a write issued at
//! depth [`MAX_NOTIFY_DEPTH`] or deeper is rejected with
//! [`Error::UpdateCycle`](crate::core::Error::UpdateCycle).

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use serde_json::Value;
use crate::constants::MAX_NOTIFY_DEPTH;
use crate::core::error::{Error, Result};
use crate::core::ids::DocId;
use crate::sync::path::Path;
use crate::log_error;

/// Single-method interface every bound consumer implements
pub trait MetadataListener: Send + Sync {
    /// Receives the value now stored at the listener's path.
    /// Absent values are delivered as null.
    fn on_update(&self, value: &Value);
}

impl<F> MetadataListener for F
where
    F: Fn(&Value) + Send + Sync,
{
    fn on_update(&self, value: &Value) {
        self(value)
    }
}

/// One consumer's interest in one location of a document
#[derive(Clone)]
pub struct ListenerRecord {
    /// Caller-chosen id, used for origin exclusion and unregistration
    pub id: String,
    /// Bound path
    pub path: Path,
    listener: Weak<dyn MetadataListener>,
    /// Shared with pending deliveries; cleared on unregistration
    registered: Arc<AtomicBool>,
}

impl ListenerRecord {
    /// Create a record holding a weak reference to the consumer
    pub fn new(id: String, path: Path, listener: Weak<dyn MetadataListener>) -> Self {
        Self {
            id,
            path,
            listener,
            registered: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the record is still part of its entry
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Withdraw the record; deliveries already prepared for it are skipped
    pub(crate) fn retire(&self) {
        self.registered.store(false, Ordering::Release);
    }

    /// Whether the consumer behind this record has been dropped
    pub fn is_dead(&self) -> bool {
        self.listener.strong_count() == 0
    }

    pub(crate) fn delivery(&self, value: Value) -> Delivery {
        Delivery {
            id: self.id.clone(),
            listener: self.listener.clone(),
            registered: self.registered.clone(),
            value,
        }
    }
}

impl std::fmt::Debug for ListenerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRecord")
            .field("id", &self.id)
            .field("path", &self.path.to_string())
            .field("dead", &self.is_dead())
            .field("registered", &self.is_registered())
            .finish()
    }
}

/// A callback prepared under the entry lock and invoked after it is released
pub(crate) struct Delivery {
    id: String,
    listener: Weak<dyn MetadataListener>,
    registered: Arc<AtomicBool>,
    value: Value,
}

thread_local! {
    static NOTIFY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Current dispatch nesting on this thread
pub fn current_depth() -> usize {
    NOTIFY_DEPTH.with(|d| d.get())
}

/// Reject writes issued from a callback chain that is nested too deep
pub(crate) fn ensure_below_cycle_limit() -> Result<()> {
    let depth = current_depth();
    if depth >= MAX_NOTIFY_DEPTH {
        return Err(Error::UpdateCycle { depth });
    }
    Ok(())
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        NOTIFY_DEPTH.with(|d| d.set(d.get() + 1));
        DepthGuard
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        NOTIFY_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Invoke every prepared callback in order, returning how many ran.
///
/// An earlier callback may unregister a later consumer; its delivery is then
/// skipped. A consumer that is still registered but was dropped is a
/// programmer error.
pub(crate) fn deliver(document: DocId, deliveries: Vec<Delivery>) -> usize {
    if deliveries.is_empty() {
        return 0;
    }

    let _depth = DepthGuard::enter();
    let mut delivered = 0;
    for delivery in deliveries {
        if !delivery.registered.load(Ordering::Acquire) {
            continue;
        }
        match delivery.listener.upgrade() {
            Some(listener) => {
                listener.on_update(&delivery.value);
                delivered += 1;
            }
            // Retired while we were upgrading
            None if !delivery.registered.load(Ordering::Acquire) => {}
            None => {
                log_error!(
                    document = %document,
                    listener = %delivery.id,
                    "listener dropped without unregistering"
                );
                debug_assert!(false, "listener {} dropped without unregistering", delivery.id);
            }
        }
    }
    delivered
}

/// Downgrade a consumer into the weak form stored by the registry
pub(crate) fn downgrade<L>(listener: &Arc<L>) -> Weak<dyn MetadataListener>
where
    L: MetadataListener + 'static,
{
    let weak: Weak<L> = Arc::downgrade(listener);
    weak
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn closures_are_listeners() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = Arc::new(move |v: &Value| sink.lock().push(v.clone()));

        let record = ListenerRecord::new("a".into(), Path::key("x"), downgrade(&listener));
        let delivered = deliver(DocId::default(), vec![record.delivery(json!(3))]);

        assert_eq!(delivered, 1);
        assert_eq!(*seen.lock(), vec![json!(3)]);
    }

    #[test]
    fn depth_is_restored_after_dispatch() {
        let observed = Arc::new(Mutex::new(0));
        let sink = observed.clone();
        let listener = Arc::new(move |_: &Value| *sink.lock() = current_depth());
        let record = ListenerRecord::new("a".into(), Path::key("x"), downgrade(&listener));

        assert_eq!(current_depth(), 0);
        deliver(DocId::default(), vec![record.delivery(Value::Null)]);
        assert_eq!(*observed.lock(), 1);
        assert_eq!(current_depth(), 0);
        assert!(ensure_below_cycle_limit().is_ok());
    }

    #[test]
    fn records_do_not_keep_consumers_alive() {
        let listener = Arc::new(|_: &Value| {});
        let record = ListenerRecord::new("a".into(), Path::key("x"), downgrade(&listener));
        assert!(!record.is_dead());
        drop(listener);
        assert!(record.is_dead());
    }

    #[test]
    fn retired_records_are_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = Arc::new(move |v: &Value| sink.lock().push(v.clone()));
        let record = ListenerRecord::new("a".into(), Path::key("x"), downgrade(&listener));

        let pending = vec![record.delivery(json!(1))];
        record.retire();
        assert!(!record.is_registered());
        assert_eq!(deliver(DocId::default(), pending), 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn retired_and_dropped_records_are_skipped_quietly() {
        let listener = Arc::new(|_: &Value| {});
        let record = ListenerRecord::new("a".into(), Path::key("x"), downgrade(&listener));
        let pending = vec![record.delivery(Value::Null)];
        record.retire();
        drop(listener);
        assert_eq!(deliver(DocId::default(), pending), 0);
    }
}
