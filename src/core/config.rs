//! Configuration for frontmatter-sync
//!
//! Settings for the tick cycle, echo suppression, the storage backend and
//! logging. Every section has defaults so a partial TOML file is enough.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use crate::constants::{DEFAULT_ECHO_THRESHOLD, DEFAULT_TICK_INTERVAL_MS};
use crate::core::error::{Error, Result};
use crate::{log_info, log_warn};

/// Available storage backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Volatile in-memory documents
    Memory,
    /// Markdown files with YAML frontmatter under `data_dir`
    Markdown,
}

/// What happens to unflushed local writes when the last listener of a
/// document unregisters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Issue one final write for the evicted entry
    Flush,
    /// Drop pending writes together with the entry
    Discard,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Synchronization engine configuration
    pub sync: SyncConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Synchronization engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the persistence tick
    #[serde(with = "duration_str")]
    pub tick_interval: Duration,

    /// Ticks since the last local write before external changes are trusted
    pub echo_threshold: u32,

    /// Handling of dirty data on eviction
    pub eviction: EvictionPolicy,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    #[serde(rename = "backend")]
    pub storage_type: StorageType,

    /// Vault directory for file-backed storage
    pub data_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, compact)
    pub format: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Collect Prometheus metrics
    pub enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            echo_threshold: DEFAULT_ECHO_THRESHOLD,
            eviction: EvictionPolicy::Flush,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            data_dir: PathBuf::from("./vault"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(interval) = lookup("FMS_TICK_INTERVAL") {
            self.sync.tick_interval = parse_duration(&interval)
                .map_err(|e| Error::config(format!("Invalid tick interval: {}", e)))?;
        }

        if let Some(threshold) = lookup("FMS_ECHO_THRESHOLD") {
            self.sync.echo_threshold = threshold.parse()
                .map_err(|e| Error::config(format!("Invalid echo threshold: {}", e)))?;
        }

        if let Some(data_dir) = lookup("FMS_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Some(backend) = lookup("FMS_STORAGE") {
            self.storage.storage_type = match backend.as_str() {
                "memory" => StorageType::Memory,
                "markdown" => StorageType::Markdown,
                other => return Err(Error::config(format!(
                    "Invalid storage type: {}. Valid options: memory, markdown", other
                ))),
            };
        }

        if let Some(level) = lookup("FMS_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.sync.tick_interval.is_zero() {
            return Err(Error::config("Tick interval must be greater than zero"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &str) -> Result<Config> {
    Config::from_file(path)
}

/// Load configuration from file or use defaults
pub fn load_config_or_default(path: Option<&str>) -> Config {
    match path {
        Some(path) => match load_config(path) {
            Ok(config) => {
                log_info!("Loaded configuration from: {}", path);
                config
            }
            Err(e) => {
                log_warn!("Failed to load config from {}: {}. Using defaults.", path, e);
                Config::default()
            }
        },
        None => {
            log_info!("No config file specified, using defaults");
            Config::default()
        }
    }
}

/// Serde helpers storing a `Duration` as a string like `"200ms"` or `"5s"`
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

// Simple duration parser for common formats
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        let ms: u64 = ms.parse().map_err(|_| "Invalid milliseconds")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: u64 = secs.parse().map_err(|_| "Invalid seconds")?;
        Ok(Duration::from_secs(secs))
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse().map_err(|_| "Invalid minutes")?;
        Ok(Duration::from_secs(mins * 60))
    } else {
        // Bare numbers are milliseconds, matching the tick granularity
        let ms: u64 = s.parse().map_err(|_| "Invalid duration format")?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_match_constants() {
        let config = Config::default();
        assert_eq!(config.sync.tick_interval, Duration::from_millis(200));
        assert_eq!(config.sync.echo_threshold, 5);
        assert_eq!(config.sync.eviction, EvictionPolicy::Flush);
        assert_eq!(config.storage.storage_type, StorageType::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_duration_formats() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("40").unwrap(), Duration::from_millis(40));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [sync]
            tick_interval = "50ms"
            eviction = "discard"

            [storage]
            backend = "markdown"
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.tick_interval, Duration::from_millis(50));
        assert_eq!(config.sync.echo_threshold, 5);
        assert_eq!(config.sync.eviction, EvictionPolicy::Discard);
        assert_eq!(config.storage.storage_type, StorageType::Markdown);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn from_file_reads_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"chatty\"").unwrap();
        assert!(Config::from_file(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\necho_threshold = 3").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.sync.echo_threshold, 3);
    }

    #[test]
    fn overrides_apply_and_reject_garbage() {
        let env: HashMap<&str, &str> = [
            ("FMS_TICK_INTERVAL", "1s"),
            ("FMS_ECHO_THRESHOLD", "9"),
            ("FMS_STORAGE", "markdown"),
            ("FMS_DATA_DIR", "/tmp/notes"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.sync.tick_interval, Duration::from_secs(1));
        assert_eq!(config.sync.echo_threshold, 9);
        assert_eq!(config.storage.storage_type, StorageType::Markdown);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/notes"));

        let mut config = Config::default();
        let result = config.apply_overrides(|key| {
            (key == "FMS_STORAGE").then(|| "distributed".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config_or_default(Some("/definitely/not/here.toml"));
        assert_eq!(config.sync.echo_threshold, DEFAULT_ECHO_THRESHOLD);
    }
}
