//! Simple in-memory persistence using DashMap
//!
//! Documents live in a concurrent map. Besides backing the `memory` storage
//! type, the adapter records every write and can inject failures or hold
//! writes in flight, which makes it the workhorse of the registry tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use crate::core::error::{PersistenceError, Result};
use crate::core::ids::DocId;
use crate::storage::{DocumentResolver, PersistenceAdapter};
use crate::sync::value::empty_document;
use crate::log_debug;

/// Volatile storage backend
pub struct MemoryAdapter {
    /// Map of document id to stored data
    documents: DashMap<DocId, Value>,

    /// Names handed out through `DocumentResolver`
    names: DashMap<String, DocId>,

    /// Every write invocation in call order
    write_log: Mutex<Vec<(DocId, Value)>>,

    reads: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,

    /// While true, writes are accepted but do not complete
    hold: watch::Sender<bool>,
}

impl MemoryAdapter {
    /// Create an empty adapter
    pub fn new() -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            documents: DashMap::new(),
            names: DashMap::new(),
            write_log: Mutex::new(Vec::new()),
            reads: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            hold,
        }
    }

    /// Seed a document
    pub fn insert(&self, document: DocId, data: Value) {
        self.documents.insert(document, data);
    }

    /// Currently stored data for a document
    pub fn document(&self, document: DocId) -> Option<Value> {
        self.documents.get(&document).map(|d| d.clone())
    }

    /// Number of stored documents
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Snapshot of all write invocations so far
    pub fn writes(&self) -> Vec<(DocId, Value)> {
        self.write_log.lock().clone()
    }

    /// Number of write invocations so far
    pub fn write_count(&self) -> usize {
        self.write_log.lock().len()
    }

    /// Number of read invocations so far
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make subsequent reads fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Keep writes in flight until [`release_writes`](Self::release_writes)
    pub fn hold_writes(&self) {
        self.hold.send_replace(true);
    }

    /// Let held writes complete
    pub fn release_writes(&self) {
        self.hold.send_replace(false);
    }

    fn injected(what: &str) -> PersistenceError {
        PersistenceError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("injected {} failure", what),
        ))
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryAdapter {
    async fn read(&self, document: DocId) -> std::result::Result<Value, PersistenceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected("read"));
        }
        Ok(self.document(document).unwrap_or_else(empty_document))
    }

    async fn write(&self, document: DocId, data: Value) -> std::result::Result<(), PersistenceError> {
        self.write_log.lock().push((document, data.clone()));

        let mut hold = self.hold.subscribe();
        while *hold.borrow_and_update() {
            if hold.changed().await.is_err() {
                break;
            }
        }

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected("write"));
        }
        log_debug!("MemoryAdapter::write - doc: {}", document);
        self.documents.insert(document, data);
        Ok(())
    }
}

impl DocumentResolver for MemoryAdapter {
    fn resolve(&self, name: &str) -> Result<DocId> {
        Ok(*self.names.entry(name.to_string()).or_insert_with(DocId::random))
    }
}
