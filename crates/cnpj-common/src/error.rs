//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CnpjError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum CnpjError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidSetting { key: String, value: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl CnpjError {
    /// Build an [`CnpjError::InvalidSetting`] for a configuration key
    pub fn invalid_setting(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            value: value.into(),
        }
    }
}
