//! Core system types and foundations
//!
//! Identifiers, error handling, configuration and logging shared by every
//! other module.

pub mod ids;
pub mod error;
pub mod config;
pub mod logging;

// Re-export commonly used items
pub use ids::DocId;
pub use error::{Error, PersistenceError, Result};
pub use config::{Config, EvictionPolicy, load_config_or_default};
pub use logging::init_logging;
