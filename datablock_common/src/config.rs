//! Configuration loading traits and types.
//!
//! A standardized way to load TOML configuration files across the
//! workspace's binaries and examples. The DataBlock engine itself never
//! reads a config file directly — per the design notes, the engine takes
//! its segment name and creation options as explicit constructor
//! arguments — but the surrounding services (brokers, demo producers and
//! consumers) use this loader for their own `SharedConfig` block.
//!
//! # Usage
//!
//! ```rust,no_run
//! use datablock_common::config::{ConfigLoader, SharedConfig, ConfigError};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct AppConfig {
//!     shared: SharedConfig,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = AppConfig::load(Path::new("config.toml"))?;
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Log level for configuration, serialized to lowercase strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level verbosity.
    Trace,
    /// Debug-level verbosity.
    Debug,
    /// Info-level verbosity (default).
    Info,
    /// Warning-level verbosity.
    Warn,
    /// Error-level verbosity.
    Error,
}

impl LogLevel {
    /// Render as the `RUST_LOG`-compatible directive string.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Common configuration fields shared across workspace binaries.
///
/// Embed this in an application-specific configuration struct to get a
/// consistent `[shared]` TOML section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    pub service_name: String,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Blanket TOML-file loading for any deserializable configuration type.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_config_validates_nonempty_service_name() {
        let cfg = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "datablock-demo".into(),
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn shared_config_rejects_empty_service_name() {
        let cfg = SharedConfig {
            log_level: LogLevel::Info,
            service_name: String::new(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn log_level_roundtrips_through_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            shared: SharedConfig,
        }
        let parsed: Wrapper =
            toml::from_str("[shared]\nlog_level = \"debug\"\nservice_name = \"x\"\n").unwrap();
        assert_eq!(parsed.shared.log_level, LogLevel::Debug);
    }
}
