//! Common error types for QBank

use thiserror::Error;

/// Common result type for QBank operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across QBank services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed operation input
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation invalid for the entity's current state.
    /// The message carries the current state so the caller can re-fetch
    /// and retry correctly.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External dependency (production corpus) unreachable
    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
