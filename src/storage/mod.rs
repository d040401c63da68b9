//! Storage and persistence layer
//!
//! The synchronization engine only talks to storage through
//! [`PersistenceAdapter`]. Mapping human-facing names to [`DocId`]s is a
//! separate concern behind [`DocumentResolver`].

use async_trait::async_trait;
use serde_json::Value;
use crate::core::error::{PersistenceError, Result};
use crate::core::ids::DocId;

/// In-memory documents
pub mod memory;

/// Markdown files with YAML frontmatter
pub mod markdown;

/// Backend selection from configuration
pub mod factory;

pub use memory::MemoryAdapter;
pub use markdown::MarkdownAdapter;
pub use factory::{create_backend, Backend};

/// Reads and writes one document's structured data
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Load a document. Documents without stored data read as an empty mapping.
    async fn read(&self, document: DocId) -> std::result::Result<Value, PersistenceError>;

    /// Replace a document's stored data
    async fn write(&self, document: DocId, data: Value) -> std::result::Result<(), PersistenceError>;
}

/// Resolves a bind target's file name to a stable document identity
pub trait DocumentResolver: Send + Sync {
    /// Resolve `name`; the same name always yields the same id
    fn resolve(&self, name: &str) -> Result<DocId>;
}
