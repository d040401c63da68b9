//! Synchronization registry
//!
//! [`MetadataManager`] owns one [`CacheEntry`] per document that has at least
//! one registered listener. It applies local partial updates, broadcasts them
//! to matching listeners, persists dirty entries on every tick and filters
//! external snapshots that are probably echoes of its own writes.
//!
//! Lock order is always entry table shard first, then the entry mutex.
//! Listener callbacks run only after both are released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use crate::core::config::{EvictionPolicy, SyncConfig};
use crate::core::error::{Error, Result};
use crate::core::ids::DocId;
use crate::storage::PersistenceAdapter;
use crate::sync::entry::{CacheEntry, CacheHandle};
use crate::sync::listener::{self, downgrade, Delivery, ListenerRecord, MetadataListener};
use crate::sync::path::{Path, PathError};
use crate::sync::scheduler::Scheduler;
use crate::sync::value::values_equal;
use crate::system::metrics::SyncMetrics;
use crate::{log_debug, log_error, log_info, log_trace, log_warn};

type SharedEntry = Arc<Mutex<CacheEntry>>;

/// What happened to an external snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No entry exists for the document
    Untracked,
    /// Dropped as a probable echo of a recent local write
    SuppressedEcho,
    /// Snapshot equals the cached data
    Unchanged,
    /// Cache replaced and all listeners notified
    Applied,
}

/// Summary of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Entries visited
    pub entries: usize,
    /// Writes handed to the persistence adapter
    pub writes_issued: usize,
    /// Dirty entries left for the next tick because a write was in flight
    pub writes_deferred: usize,
    /// Failed initial loads started again
    pub loads_retried: usize,
}

/// The registry. Construct once and share the `Arc` with every consumer.
pub struct MetadataManager {
    entries: DashMap<DocId, SharedEntry>,
    adapter: Arc<dyn PersistenceAdapter>,
    scheduler: Arc<dyn Scheduler>,
    config: SyncConfig,
    metrics: SyncMetrics,
    /// Outstanding load and write tasks
    tasks: Mutex<Vec<JoinHandle<()>>>,
    runtime: Handle,
    stopped: AtomicBool,
}

impl MetadataManager {
    /// Create the registry and start its tick scheduler.
    ///
    /// Must be called from within a tokio runtime; loads and writes are
    /// spawned onto it.
    pub fn new(
        adapter: Arc<dyn PersistenceAdapter>,
        scheduler: Arc<dyn Scheduler>,
        config: SyncConfig,
    ) -> Result<Arc<Self>> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::config(format!("MetadataManager needs a tokio runtime: {}", e)))?;

        let manager = Arc::new(Self {
            entries: DashMap::new(),
            adapter,
            scheduler,
            config,
            metrics: SyncMetrics::new()?,
            tasks: Mutex::new(Vec::new()),
            runtime,
            stopped: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&manager);
        manager.scheduler.start(Arc::new(move || {
            if let Some(manager) = weak.upgrade() {
                manager.tick();
            }
        }))?;

        log_info!(
            "MetadataManager started (echo threshold {} ticks, eviction {:?})",
            manager.config.echo_threshold,
            manager.config.eviction
        );
        Ok(manager)
    }

    /// Register `listener` for `path` in `document`.
    ///
    /// The first registration for a document creates its entry and starts the
    /// load; every listener is notified once it resolves. Later registrations
    /// join the existing entry and are not notified retroactively. The same
    /// id registered twice yields two records.
    pub fn register<L>(&self, document: DocId, listener: &Arc<L>, path: Path, id: impl Into<String>) -> CacheHandle
    where
        L: MetadataListener + 'static,
    {
        let record = ListenerRecord::new(id.into(), path, downgrade(listener));
        let mut created = false;

        let entry = {
            let slot = self.entries.entry(document).or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(CacheEntry::new(document)))
            });
            slot.lock().listeners.push(record);
            slot.value().clone()
        };

        if created {
            self.metrics.entries.inc();
            log_debug!("Created cache entry for {}", document);
            self.spawn_load(document, entry.clone());
        }
        CacheHandle::new(document, entry)
    }

    /// Remove the listener registered under `id`. Returns whether one was
    /// found. Removing the last listener evicts the entry.
    pub fn unregister(&self, document: DocId, id: &str) -> bool {
        let mut removed = false;
        let evicted = self.entries.remove_if(&document, |_, entry| {
            let mut guard = entry.lock();
            removed = guard.remove_listener(id);
            guard.listeners.is_empty()
        });

        if !removed {
            log_trace!("unregister: no listener '{}' on {}", id, document);
        }
        if let Some((_, entry)) = evicted {
            self.evict(document, entry);
        }
        removed
    }

    fn evict(&self, document: DocId, entry: SharedEntry) {
        self.metrics.entries.dec();
        log_debug!("Evicting cache entry for {}", document);

        let data = {
            let mut guard = entry.lock();
            guard.evicted = true;
            if !guard.dirty {
                return;
            }

            match self.config.eviction {
                EvictionPolicy::Flush if guard.loaded => {
                    if guard.write_in_flight {
                        // The running write picks up the remaining changes
                        return;
                    }
                    guard.dirty = false;
                    guard.write_in_flight = true;
                    guard.data.clone()
                }
                EvictionPolicy::Flush | EvictionPolicy::Discard => {
                    log_warn!(
                        "Discarding unpersisted changes for {} on eviction (loaded: {})",
                        document,
                        guard.loaded
                    );
                    self.metrics.evictions_discarded.inc();
                    guard.dirty = false;
                    return;
                }
            }
        };
        self.spawn_write(document, entry, data);
    }

    /// Apply a local write at `path` and notify every other listener bound to
    /// exactly that path.
    ///
    /// Returns `Ok(false)` when the stored value is already deep-equal.
    pub fn update_property_at_path(&self, document: DocId, path: &Path, value: Value, origin_id: &str) -> Result<bool> {
        if let Err(e) = listener::ensure_below_cycle_limit() {
            self.metrics.cycles_broken.inc();
            log_warn!("Rejected update of {} in {} from '{}': {}", path, document, origin_id, e);
            return Err(e);
        }

        let entry = self.entry(document)?;
        let deliveries = {
            let mut guard = entry.lock();
            match guard.apply_update(path, value) {
                Ok(true) => guard.deliveries_for(Some(path), Some(origin_id)),
                Ok(false) => {
                    self.metrics.redundant_updates.inc();
                    return Ok(false);
                }
                Err(PathError::ParentMissing) => {
                    return Err(Error::MissingParentPath {
                        document,
                        path: path.to_string(),
                    })
                }
                Err(PathError::NotAddressable(segment)) => {
                    return Err(Error::invalid_path(format!("'{}' in {}", segment, path)))
                }
                Err(e @ PathError::IndexOutOfRange { .. }) => {
                    return Err(Error::invalid_path(format!("{}: {}", path, e)))
                }
            }
        };

        self.dispatch(document, deliveries);
        Ok(true)
    }

    /// Replace a document's cached data and resync every listener
    pub fn replace_all(&self, document: DocId, data: Value, mark_dirty: bool) -> Result<()> {
        let entry = self.entry(document)?;
        let deliveries = {
            let mut guard = entry.lock();
            guard.replace_data(data, mark_dirty);
            guard.deliveries_for(None, None)
        };
        self.dispatch(document, deliveries);
        Ok(())
    }

    /// Offer a snapshot reported by the external store.
    ///
    /// Snapshots arriving within `echo_threshold` ticks of the last local
    /// write, or while local changes are still unpersisted, are dropped.
    /// A genuine external edit inside that window is lost.
    pub fn ingest_external_change(&self, document: DocId, snapshot: Value) -> IngestOutcome {
        let Some(entry) = self.entries.get(&document).map(|e| e.value().clone()) else {
            log_trace!("Ignoring external change for untracked {}", document);
            return IngestOutcome::Untracked;
        };

        let deliveries = {
            let mut guard = entry.lock();
            let recency = guard.ticks_since_last_local_write;
            if recency < self.config.echo_threshold || guard.dirty || guard.write_in_flight {
                self.metrics.echoes_suppressed.inc();
                log_debug!(
                    "Suppressed probable echo for {} (ticks since local write: {}, dirty: {})",
                    document,
                    recency,
                    guard.dirty
                );
                return IngestOutcome::SuppressedEcho;
            }
            if values_equal(&guard.data, &snapshot) {
                return IngestOutcome::Unchanged;
            }
            guard.replace_data(snapshot, false);
            guard.deliveries_for(None, None)
        };

        self.metrics.external_applied.inc();
        log_debug!("Applied external change for {}", document);
        self.dispatch(document, deliveries);
        IngestOutcome::Applied
    }

    /// One persistence cycle.
    ///
    /// Every dirty, loaded entry without a write in flight is written; entries
    /// still waiting on a write stay dirty. Entries whose load failed are
    /// loaded again. Every entry ages by one tick.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let mut writes = Vec::new();
        let mut loads = Vec::new();

        for item in self.entries.iter() {
            report.entries += 1;
            let mut guard = item.value().lock();

            if !guard.loaded {
                if !guard.load_in_flight {
                    guard.load_in_flight = true;
                    loads.push((*item.key(), item.value().clone()));
                }
            } else if guard.dirty {
                if guard.write_in_flight {
                    report.writes_deferred += 1;
                    self.metrics.writes_deferred.inc();
                } else {
                    guard.dirty = false;
                    guard.write_in_flight = true;
                    writes.push((*item.key(), item.value().clone(), guard.data.clone()));
                }
            }

            guard.age();
        }

        for (document, entry) in loads {
            report.loads_retried += 1;
            self.spawn_load(document, entry);
        }
        for (document, entry, data) in writes {
            report.writes_issued += 1;
            self.spawn_write(document, entry, data);
        }

        self.metrics.ticks.inc();
        log_trace!("tick: {:?}", report);
        report
    }

    /// Notify listeners of `document`.
    ///
    /// With `path`, only listeners bound to exactly that path receive the
    /// value stored there. Without, every listener receives the value at its
    /// own path. Listeners registered under `except_id` are skipped.
    pub fn notify(&self, document: DocId, path: Option<&Path>, except_id: Option<&str>) -> Result<usize> {
        let entry = self.entry(document)?;
        let deliveries = entry.lock().deliveries_for(path, except_id);
        Ok(self.dispatch(document, deliveries))
    }

    /// Cached value at `path`, `None` if the document is not registered
    pub fn get(&self, document: DocId, path: &Path) -> Option<Value> {
        self.entries.get(&document).map(|e| e.lock().value_at(path))
    }

    /// Copy of a registered document's cached data
    pub fn snapshot(&self, document: DocId) -> Option<Value> {
        self.entries.get(&document).map(|e| e.lock().data.clone())
    }

    /// Handle to a registered document's entry
    pub fn handle(&self, document: DocId) -> Option<CacheHandle> {
        self.entries
            .get(&document)
            .map(|e| CacheHandle::new(document, e.value().clone()))
    }

    /// Whether `document` currently has an entry
    pub fn contains(&self, document: DocId) -> bool {
        self.entries.contains_key(&document)
    }

    /// Number of live entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Sync metrics of this registry
    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Engine configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether `shutdown` has run
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Wait until every load and write started so far, and any follow-up
    /// they trigger, has completed.
    pub async fn settle(&self) {
        loop {
            let pending = std::mem::take(&mut *self.tasks.lock());
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(e) = task.await {
                    if !e.is_cancelled() {
                        log_error!("Persistence task panicked: {}", e);
                    }
                }
            }
        }
    }

    /// Stop the tick scheduler and hand every dirty, loaded entry to the
    /// adapter one last time. Calling it again does nothing.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.stop();

        let mut writes = Vec::new();
        for item in self.entries.iter() {
            let mut guard = item.value().lock();
            if guard.loaded && guard.dirty && !guard.write_in_flight {
                guard.dirty = false;
                guard.write_in_flight = true;
                writes.push((*item.key(), item.value().clone(), guard.data.clone()));
            }
        }
        let flushed = writes.len();
        for (document, entry, data) in writes {
            self.spawn_write(document, entry, data);
        }
        log_info!("MetadataManager shut down, {} final writes issued", flushed);
    }

    /// `shutdown` followed by `settle`
    pub async fn close(&self) {
        self.shutdown();
        self.settle().await;
    }

    fn entry(&self, document: DocId) -> Result<SharedEntry> {
        self.entries
            .get(&document)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::internal(format!("no cache entry for document {}", document)))
    }

    fn dispatch(&self, document: DocId, deliveries: Vec<Delivery>) -> usize {
        let delivered = listener::deliver(document, deliveries);
        self.metrics.notifications.inc_by(delivered as u64);
        delivered
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn spawn_load(&self, document: DocId, entry: SharedEntry) {
        entry.lock().load_in_flight = true;
        let adapter = self.adapter.clone();
        let metrics = self.metrics.clone();

        let task = self.runtime.spawn(async move {
            let result = adapter.read(document).await;
            let deliveries = {
                let mut guard = entry.lock();
                guard.load_in_flight = false;
                if guard.evicted {
                    log_trace!("Load for {} finished after eviction", document);
                    return;
                }
                match result {
                    Ok(data) => {
                        // The stored document supersedes edits made while loading
                        guard.replace_data(data, false);
                        guard.dirty = false;
                        guard.loaded = true;
                        guard.deliveries_for(None, None)
                    }
                    Err(e) => {
                        metrics.loads_failed.inc();
                        log_error!("Failed to load {}: {} (retrying next tick)", document, e);
                        return;
                    }
                }
            };
            let delivered = listener::deliver(document, deliveries);
            metrics.notifications.inc_by(delivered as u64);
        });
        self.track(task);
    }

    /// Write `data` and keep writing while an evicted entry under the flush
    /// policy accumulated newer changes during the previous write.
    fn spawn_write(&self, document: DocId, entry: SharedEntry, data: Value) {
        let adapter = self.adapter.clone();
        let metrics = self.metrics.clone();
        let policy = self.config.eviction;
        metrics.writes_issued.inc();

        let task = self.runtime.spawn(async move {
            let mut data = data;
            loop {
                let result = adapter.write(document, data).await;
                let next = {
                    let mut guard = entry.lock();
                    let follow_up = match result {
                        Err(e) => {
                            metrics.writes_failed.inc();
                            if guard.evicted {
                                log_error!("Failed final write for evicted {}: {}", document, e);
                                guard.dirty = false;
                            } else {
                                log_error!(
                                    "Failed to write {}: {} (retrying next tick, transient: {})",
                                    document,
                                    e,
                                    e.is_retryable()
                                );
                                guard.dirty = true;
                            }
                            None
                        }
                        Ok(()) if guard.evicted && guard.dirty && policy == EvictionPolicy::Flush => {
                            guard.dirty = false;
                            Some(guard.data.clone())
                        }
                        Ok(()) => None,
                    };
                    if follow_up.is_none() {
                        guard.write_in_flight = false;
                    }
                    follow_up
                };

                match next {
                    Some(follow_up) => {
                        metrics.writes_issued.inc();
                        data = follow_up;
                    }
                    None => return,
                }
            }
        });
        self.track(task);
    }
}

impl Drop for MetadataManager {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

impl std::fmt::Debug for MetadataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataManager")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
