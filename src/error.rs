//! Error types for the Postguard service.

use thiserror::Error;

/// Main error type for Postguard operations.
#[derive(Error, Debug)]
pub enum PostguardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token encoding errors
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for PostguardError {
    fn from(err: config::ConfigError) -> Self {
        PostguardError::Config(err.to_string())
    }
}

/// Result type alias for Postguard operations.
pub type Result<T> = std::result::Result<T, PostguardError>;
