use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] medtrack_core::Error),
    #[error(transparent)]
    Transport(#[from] medtrack_core::TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Queue item id cannot be empty")]
    EmptyItemId,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync is not configured. Pass --api-url or set MEDTRACK_API_URL.")]
    SyncNotConfigured,
    #[error("Server unreachable; {0} change(s) remain queued")]
    Unreachable(usize),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
}
