//! Error types for medtrack-core

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias using medtrack-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in medtrack-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store could not be opened or migrated
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity or queue item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network or server-of-record failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A sync was requested while the client is offline
    #[error("Cannot sync while offline")]
    Offline,
}
