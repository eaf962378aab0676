// src/error.rs

use thiserror::Error;

/// Core error types for pkgdex
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in the upstream feed or the attribute bag
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Feed download failed
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Input could not be parsed (feed archive, pacman database, specifier)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A `re:` search term that is not a valid regular expression
    #[error("Invalid search pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A thread panicked while holding the store lock
    #[error("Store lock poisoned")]
    LockPoisoned,

    /// A background job panicked or was aborted
    #[error("Background job failed: {0}")]
    JobFailed(String),

    /// A background job observed its cancel token
    #[error("Operation cancelled during {0}")]
    Cancelled(&'static str),
}

/// Result type alias using pkgdex's Error type
pub type Result<T> = std::result::Result<T, Error>;
