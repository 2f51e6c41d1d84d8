/// Error types for the gallery core
///
/// Store failures and configuration problems propagate as `Error`.
/// Image copy and metadata failures never do: they degrade to
/// "no path" / "no location" at their own boundary.

use thiserror::Error;

/// Result type used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error from the catalog
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No record with this id exists in the store
    #[error("Media item {0} not found")]
    NotFound(i64),

    /// Titles must contain at least one non-whitespace character
    #[error("Title is required")]
    InvalidTitle,

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
