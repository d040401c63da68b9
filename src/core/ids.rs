//! Fixed-size document identifier.
//! Uses base62 encoding [0-9a-zA-Z] for human-readable string representation while maintaining
//! a fixed memory layout so the id stays `Copy` and cheap to hash as a cache key.

use std::fmt;
use std::str::FromStr;
use rand::{rng, Rng};
use serde::{Serialize, Deserialize};
use crate::constants::{BASE62_CHARS, DOC_ID_LENGTH};

/// Opaque, stable handle for one document.
///
/// Equality is identity-based: two ids are equal only if they were handed out
/// for the same document by the resolver, never because the documents happen
/// to hold the same content.
///
/// Memory Layout:
/// - [u8; 16] - Fixed array of 16 base62 bytes
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId([u8; DOC_ID_LENGTH]);

impl DocId {
    /// Create a new ID from a 16-byte array
    pub fn new(bytes: [u8; DOC_ID_LENGTH]) -> Self {
        DocId(bytes)
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; DOC_ID_LENGTH] {
        &self.0
    }

    /// Generate a random 16-character base62 ID
    pub fn random() -> Self {
        let mut rng = rng();
        let mut bytes = [0u8; DOC_ID_LENGTH];

        for byte in bytes.iter_mut() {
            *byte = BASE62_CHARS[rng.random_range(0..BASE62_CHARS.len())];
        }

        DocId(bytes)
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &str {
        // Every constructor only admits ASCII bytes
        std::str::from_utf8(&self.0).unwrap_or("<invalid>")
    }
}

impl Default for DocId {
    fn default() -> Self {
        DocId([b'0'; DOC_ID_LENGTH])
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DocId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != DOC_ID_LENGTH {
            return Err("DocId must be exactly 16 characters");
        }
        if !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err("DocId must be base62");
        }

        let mut bytes = [0u8; DOC_ID_LENGTH];
        bytes.copy_from_slice(s.as_bytes());
        Ok(DocId(bytes))
    }
}
