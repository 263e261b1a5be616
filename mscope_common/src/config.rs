//! Configuration loading traits and types.
//!
//! Every mscope binary reads a single TOML file. Application structs embed
//! [`SharedConfig`] and get [`ConfigLoader::load`] for free through the
//! blanket implementation below.
//!
//! ```rust,no_run
//! use mscope_common::config::{ConfigError, ConfigLoader, SharedConfig};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct ToolConfig {
//!     shared: SharedConfig,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = ToolConfig::load(Path::new("stage.toml"))?;
//!     println!("service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the given path.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// File could not be read or TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log verbosity, lowercase in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-frame protocol tracing.
    Trace,
    /// Per-axis and per-command events.
    Debug,
    /// Lifecycle events.
    #[default]
    Info,
    /// Stalls, malformed responses, idle backpressure.
    Warn,
    /// Unrecoverable failures only.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Fields common to every mscope application config.
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "mscope-stage"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Reject an empty `service_name`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: "mscope-stage".to_string(),
        }
    }
}

/// Load any deserializable config type from a TOML file.
///
/// - `ConfigError::FileNotFound` if the file does not exist
/// - `ConfigError::ParseError` if it cannot be read or parsed
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Read and parse `path`.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_path_buf())
            } else {
                ConfigError::ParseError(format!("{}: {}", path.display(), e))
            }
        })?;

        tracing::debug!("Read configuration from {}", path.display());
        Self::from_toml(&content)
    }

    /// Parse from an in-memory TOML string.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        shared: SharedConfig,
    }

    #[test]
    fn log_level_defaults_to_info() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::default().as_directive(), "info");
    }

    #[test]
    fn log_level_parses_lowercase() {
        #[derive(Debug, Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }
        let w: Wrapper = toml::from_str("level = \"warn\"").unwrap();
        assert_eq!(w.level, LogLevel::Warn);
        assert!(toml::from_str::<Wrapper>("level = \"WARN\"").is_err());
    }

    #[test]
    fn empty_service_name_is_rejected() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "  ".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let result = TestConfig::load(Path::new("/nonexistent/stage.toml"));
        match result {
            Err(ConfigError::FileNotFound(p)) => assert!(p.ends_with("stage.toml")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn loads_shared_section_with_default_level() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[shared]\nservice_name = \"bench\"\n").unwrap();
        file.flush().unwrap();

        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.service_name, "bench");
        assert_eq!(config.shared.log_level, LogLevel::Info);
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let result = TestConfig::from_toml("shared = {{{");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
