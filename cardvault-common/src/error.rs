//! Common error types for CardVault

use thiserror::Error;

/// Common result type for CardVault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across CardVault crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found, or owned by someone else
    #[error("Not found: {0}")]
    NotFound(String),

    /// Card index outside the stored card list
    #[error("Card index {index} out of range (list has {len} cards)")]
    BadIndex { index: usize, len: usize },

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON serialization failed: {}", err))
    }
}
