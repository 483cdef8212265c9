//! Error types for pathmark-core

use thiserror::Error;

/// Main error type for the pathmark-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A row was addressed with neither an id nor a natural key, or similar
    /// caller mistakes
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Row not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Mutating request against a read-only service
    #[error("history service is read-only")]
    ReadOnly,

    /// Request was cancelled through its token
    #[error("request cancelled")]
    Cancelled,

    /// The worker thread failed to start or has already stopped
    #[error("history service is not running")]
    ServiceUnavailable,

    /// Composite operation did not complete
    #[error("operation failed: {0}")]
    Failed(String),
}

impl Error {
    /// True when the request never reached (or was skipped by) the worker
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias for pathmark-core
pub type Result<T> = std::result::Result<T, Error>;
