//! Global constants used throughout the frontmatter-sync codebase
//!
//! This module contains compile-time constants that are shared across
//! multiple modules to ensure consistency and avoid magic numbers.

/// Base62 character set used for human-readable document IDs
pub const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Length of a document ID in bytes (16 characters)
pub const DOC_ID_LENGTH: usize = 16;

/// Number of ticks that must elapse after a local write before an
/// external snapshot of the same document is trusted.
///
/// The external store echoes our own writes back with some delay. Any
/// snapshot arriving inside this window is assumed to be such an echo.
pub const DEFAULT_ECHO_THRESHOLD: u32 = 5;

/// Default tick period in milliseconds
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 200;

/// Maximum nesting of listener dispatch on one thread before a write
/// issued from inside a callback is rejected as a cycle.
pub const MAX_NOTIFY_DEPTH: usize = 8;

/// Fence line that opens and closes a frontmatter block
pub const FRONTMATTER_FENCE: &str = "---";

/// File extension used by the Markdown vault backend
pub const MARKDOWN_EXTENSION: &str = "md";

/// Default capacity of the external change channel
pub const DEFAULT_CHANGE_FEED_CAPACITY: usize = 1024;
