//! Metadata synchronization engine
//!
//! Keeps bound consumers consistent with per-document structured data while
//! the backing store is read and written asynchronously.

/// Key paths and traversal
pub mod path;

/// Deep equality over structured values
pub mod value;

/// Listener trait and dispatch
pub mod listener;

/// Per-document cache entries
pub mod entry;

/// Tick scheduling
pub mod scheduler;

/// The synchronization registry
pub mod manager;

/// Ready-made bound consumer
pub mod binding;

/// `file#path` bind targets
pub mod target;


pub use binding::BoundField;
pub use entry::CacheHandle;
pub use listener::MetadataListener;
pub use manager::{IngestOutcome, MetadataManager, TickReport};
pub use path::{Lookup, Path, PathSegment};
pub use scheduler::{IntervalScheduler, ManualScheduler, Scheduler, TickFn};
pub use target::BindTarget;
