//! Colonnade Configuration Module
//!
//! Provides configuration file support via `colonnade.toml`, environment
//! variables, and runtime overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (API)
//! 2. Environment variables (`COLONNADE_*`)
//! 3. Configuration file (`colonnade.toml`)
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },
}

/// Where partition blocks and the catalog log are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Everything lives in process memory and is lost on drop.
    Memory,
    /// Append-only log file under `data_dir` (default).
    #[default]
    Log,
}

/// Storage configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory path.
    pub data_dir: String,
    /// Storage mode.
    pub mode: StorageMode,
    /// Fsync the log after every batch.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./colonnade_data".to_string(),
            mode: StorageMode::Log,
            sync_writes: false,
        }
    }
}

/// Partition writer configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Flush once this many rows are buffered.
    pub max_rows: usize,
    /// Flush once the estimated buffered size reaches this many bytes.
    pub max_bytes: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_rows: 1_000_000,
            max_bytes: 100 * 1024 * 1024, // 100 MB
        }
    }
}

/// Column codec configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Auto-selection picks the bitmap scheme when
    /// `distinct_count <= bitmap_cardinality_ratio * row_count`.
    pub bitmap_cardinality_ratio: f64,
    /// Every n-th prefix-trie entry stores its full value.
    pub trie_restart_interval: usize,
    /// Average shared prefix (bytes) above which unsorted strings still use the trie.
    pub trie_min_shared_prefix: usize,
    /// Store the per-entry suffix index that makes trie `decode_at` seekable.
    pub trie_suffix_index: bool,
    /// Write a CRC32 of the payload into every block header.
    pub checksums: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            bitmap_cardinality_ratio: 0.1,
            trie_restart_interval: 16,
            trie_min_shared_prefix: 4,
            trie_suffix_index: true,
            checksums: true,
        }
    }
}

/// Distributed executor configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker threads of the local substrate (0 = available parallelism).
    pub workers: usize,
    /// Retries per stage task after the first attempt.
    pub max_retries: u32,
    /// Buckets used to shuffle both join sides.
    pub join_buckets: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 0, // Auto
            max_retries: 3,
            join_buckets: 8,
        }
    }
}

impl ExecutorConfig {
    /// Returns the effective worker count.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
    }
}

/// Logging configuration section.
///
/// The library only emits `tracing` events; the embedding binary installs
/// the subscriber described here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
    /// Log format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Main Colonnade configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ColonnadeConfig {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Partition writer configuration.
    pub writer: WriterConfig,
    /// Column codec configuration.
    pub codec: CodecConfig,
    /// Executor configuration.
    pub executor: ExecutorConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl ColonnadeConfig {
    /// Loads configuration from default sources.
    ///
    /// Priority: defaults < file < environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("colonnade.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("COLONNADE_").split("__").lowercase(true));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.writer.max_rows == 0 {
            return Err(ConfigError::InvalidValue {
                key: "writer.max_rows".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.writer.max_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "writer.max_bytes".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let ratio = self.codec.bitmap_cardinality_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ConfigError::InvalidValue {
                key: "codec.bitmap_cardinality_ratio".to_string(),
                message: format!("value {ratio} is out of range [0.0, 1.0]"),
            });
        }

        if !(1..=4096).contains(&self.codec.trie_restart_interval) {
            return Err(ConfigError::InvalidValue {
                key: "codec.trie_restart_interval".to_string(),
                message: format!(
                    "value {} is out of range [1, 4096]",
                    self.codec.trie_restart_interval
                ),
            });
        }

        if !(1..=65536).contains(&self.executor.join_buckets) {
            return Err(ConfigError::InvalidValue {
                key: "executor.join_buckets".to_string(),
                message: format!(
                    "value {} is out of range [1, 65536]",
                    self.executor.join_buckets
                ),
            });
        }

        if self.executor.max_retries > 100 {
            return Err(ConfigError::InvalidValue {
                key: "executor.max_retries".to_string(),
                message: format!("value {} must be <= 100", self.executor.max_retries),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        Ok(())
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}
