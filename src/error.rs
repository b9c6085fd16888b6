//! Error types for the Ratewarden service.

use thiserror::Error;

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum RatewardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for RatewardenError {
    fn from(err: config::ConfigError) -> Self {
        RatewardenError::Config(err.to_string())
    }
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, RatewardenError>;
