//! Frontmatter Sync - echo-safe synchronization of bound fields with
//! per-document structured metadata
//!
//! Many independently rendered fields share one structured value per
//! document. Local edits are merged path by path, persisted on a debounced
//! tick, and protected from the backing store's delayed echo of those same
//! writes.
#![warn(missing_docs)]

// Core foundational modules
pub mod constants;
pub mod core;

// Main functional modules
pub mod sync;
pub mod storage;
pub mod change;
pub mod system;

// Re-export commonly used items for convenience
pub use core::{Config, DocId, Error, PersistenceError, Result};
pub use sync::{BindTarget, BoundField, CacheHandle, IngestOutcome, MetadataListener, MetadataManager, Path};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
