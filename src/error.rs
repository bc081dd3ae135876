//! Error types for the Ratewire crate.

use thiserror::Error;

/// Top-level error for loading configuration and running the front end.
#[derive(Error, Debug)]
pub enum RatewireError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown tenant name
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ratewire operations.
pub type Result<T> = std::result::Result<T, RatewireError>;
