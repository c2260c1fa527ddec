//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file contents could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// The file extension is not a supported format
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// An environment override holds an unusable value
    #[error("Invalid value for {var}: {message}")]
    Env {
        /// Variable name
        var: String,
        /// What was wrong with it
        message: String,
    },

    /// The merged configuration failed validation
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an environment override error
    pub fn env(var: impl Into<String>, message: impl ToString) -> Self {
        Self::Env {
            var: var.into(),
            message: message.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}
