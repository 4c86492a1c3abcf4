//! Error types for configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed to load
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// YAML parse failure
    #[cfg(feature = "yaml")]
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parse failure
    #[cfg(feature = "toml")]
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// The file extension maps to no supported format
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// A value failed validation
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl ConfigError {
    /// Build an [`ConfigError::Invalid`] error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
