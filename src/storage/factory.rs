//! Storage factory for creating persistence backends based on configuration

use std::sync::Arc;
use crate::core::config::{StorageConfig, StorageType};
use crate::storage::{DocumentResolver, MarkdownAdapter, MemoryAdapter, PersistenceAdapter};
use crate::log_info;

/// A configured backend. Both halves share one underlying adapter so names
/// resolved by the resolver are readable through the persistence side.
#[derive(Clone)]
pub enum Backend {
    /// Volatile in-memory documents
    Memory(Arc<MemoryAdapter>),
    /// Markdown vault on disk
    Markdown(Arc<MarkdownAdapter>),
}

impl Backend {
    /// Persistence half, as handed to the registry
    pub fn adapter(&self) -> Arc<dyn PersistenceAdapter> {
        match self {
            Backend::Memory(a) => a.clone(),
            Backend::Markdown(a) => a.clone(),
        }
    }

    /// Name resolution half, as used by bind targets
    pub fn resolver(&self) -> Arc<dyn DocumentResolver> {
        match self {
            Backend::Memory(a) => a.clone(),
            Backend::Markdown(a) => a.clone(),
        }
    }

    /// Configured storage type
    pub fn storage_type(&self) -> StorageType {
        match self {
            Backend::Memory(_) => StorageType::Memory,
            Backend::Markdown(_) => StorageType::Markdown,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Backend").field(&self.storage_type()).finish()
    }
}

/// Create a backend based on configuration
pub fn create_backend(config: &StorageConfig) -> Backend {
    match config.storage_type {
        StorageType::Memory => {
            log_info!("Using in-memory storage");
            Backend::Memory(Arc::new(MemoryAdapter::new()))
        }
        StorageType::Markdown => {
            log_info!("Using markdown vault at {}", config.data_dir.display());
            Backend::Markdown(Arc::new(MarkdownAdapter::new(config.data_dir.clone())))
        }
    }
}
