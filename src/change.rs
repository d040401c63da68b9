//! External change notifications
//!
//! The backing store reports "document changed" events, including ones the
//! registry caused itself. A [`ChangeSource`] delivers them to a handler;
//! [`spawn_change_pump`] wires a source into a [`MetadataManager`].

use std::sync::Arc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use crate::constants::DEFAULT_CHANGE_FEED_CAPACITY;
use crate::core::error::{Error, Result};
use crate::core::ids::DocId;
use crate::sync::manager::{IngestOutcome, MetadataManager};
use crate::{log_debug, log_trace};

/// A raw snapshot reported by the external store
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalChange {
    /// Changed document
    pub document: DocId,
    /// Its full structured data as now stored
    pub snapshot: Value,
}

/// Receives external changes
pub type ChangeHandler = Box<dyn Fn(ExternalChange) + Send + Sync>;

/// Anything that can report external document changes
pub trait ChangeSource: Send + Sync {
    /// Deliver every future change to `handler`
    fn subscribe(&self, handler: ChangeHandler) -> Result<()>;
}

/// Channel-backed change source with a single subscriber
pub struct ChangeFeed {
    sender: mpsc::Sender<ExternalChange>,
    receiver: Mutex<Option<mpsc::Receiver<ExternalChange>>>,
}

impl ChangeFeed {
    /// Create a feed buffering up to `capacity` undelivered changes
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Producer side, for watchers running elsewhere
    pub fn sender(&self) -> mpsc::Sender<ExternalChange> {
        self.sender.clone()
    }

    /// Report a change, waiting for buffer space
    pub async fn publish(&self, document: DocId, snapshot: Value) -> Result<()> {
        self.sender
            .send(ExternalChange { document, snapshot })
            .await
            .map_err(|_| Error::internal("change feed closed"))
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_FEED_CAPACITY)
    }
}

impl ChangeSource for ChangeFeed {
    fn subscribe(&self, handler: ChangeHandler) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::config(format!("ChangeFeed needs a tokio runtime: {}", e)))?;
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| Error::internal("change feed already has a subscriber"))?;

        runtime.spawn(async move {
            while let Some(change) = receiver.recv().await {
                handler(change);
            }
            log_debug!("Change feed closed");
        });
        Ok(())
    }
}

/// Forward every change from `source` into `manager`.
///
/// The pump holds the manager weakly; changes arriving after it is dropped
/// are ignored.
pub fn spawn_change_pump(manager: &Arc<MetadataManager>, source: &dyn ChangeSource) -> Result<()> {
    let weak = Arc::downgrade(manager);
    source.subscribe(Box::new(move |change: ExternalChange| {
        let Some(manager) = weak.upgrade() else {
            return;
        };
        let outcome = manager.ingest_external_change(change.document, change.snapshot);
        if outcome != IngestOutcome::Applied {
            log_trace!("External change for {}: {:?}", change.document, outcome);
        }
    }))
}
