//! Error types and handling for frontmatter-sync
//!
//! This module defines all error types used throughout the system. Structural
//! errors (bad paths, unresolvable bind targets) surface synchronously to the
//! caller; persistence errors are recovered inside the registry and only ever
//! reach the logs and metrics.

use thiserror::Error;
use crate::core::ids::DocId;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for frontmatter-sync
#[derive(Error, Debug)]
pub enum Error {
    /// Update targets a path whose parent chain does not exist
    #[error("Parent of path '{path}' does not exist in document {document}")]
    MissingParentPath {
        /// Document the update was aimed at
        document: DocId,
        /// Rendered path of the rejected update
        path: String,
    },

    /// Bind target could not be resolved to a document
    #[error("File resolution error: {0}")]
    FileResolution(String),

    /// Persistence adapter failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Programmer error, e.g. acting on an entry that was already evicted
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    /// A write issued from inside a listener callback chain nested too deep
    #[error("Update cycle detected at notification depth {depth}")]
    UpdateCycle {
        /// Dispatch depth at which the write was rejected
        depth: usize,
    },

    /// Path text could not be parsed
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a persistence adapter
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Disk I/O operation failed
    #[error("Disk I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML frontmatter encoding or decoding failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The adapter has no location for this document
    #[error("Unknown document: {0}")]
    UnknownDocument(DocId),

    /// Stored data is not a structured mapping
    #[error("Malformed document data: {0}")]
    Malformed(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal invariant error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalInvariant(msg.into())
    }

    /// Create a file resolution error
    pub fn file_resolution(msg: impl Into<String>) -> Self {
        Self::FileResolution(msg.into())
    }

    /// Create an invalid path error
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    /// Check if this error should be shown to the user as a field failure
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::MissingParentPath { .. }
                | Error::FileResolution(_)
                | Error::InvalidPath(_)
                | Error::UpdateCycle { .. }
        )
    }
}

impl PersistenceError {
    /// Create a malformed data error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Check if retrying on the next tick can plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::Io(_))
    }
}
