//! Error types for tagsync.

use thiserror::Error;

/// Result type alias using tagsync's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tagsync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Document store rejected or failed an operation
    #[error("Store error: {0}")]
    Store(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Canonical document creation failed (hook or store)
    #[error("Creation error: {0}")]
    Creation(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reconciliation scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
