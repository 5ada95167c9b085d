//! Network seam between the sync engine and the server-of-record

mod http;
mod memory;
mod wire;

pub use http::{normalize_base_url, HttpTransport, DEFAULT_REQUEST_TIMEOUT};
pub use memory::MemoryServer;
pub use wire::{
    ActionType, ChangeType, DeltaRequest, DeltaResponse, EntityChange, ResolveConflictRequest,
    ServerSyncStatus, SubmitRequest, SubmitResponse, SyncAction,
};

use std::future::Future;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid transport configuration: {0}")]
    InvalidConfiguration(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {0}")]
    Api(String),
    #[error("Server unreachable: {0}")]
    Unreachable(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// The four inventory sync endpoints
pub trait SyncTransport: Send + Sync + 'static {
    /// Push a batch of queued actions
    fn submit(
        &self,
        request: SubmitRequest,
    ) -> impl Future<Output = TransportResult<SubmitResponse>> + Send;

    /// Pull changes newer than the given cursors
    fn delta(
        &self,
        request: DeltaRequest,
    ) -> impl Future<Output = TransportResult<DeltaResponse>> + Send;

    /// Settle a conflict reported by an earlier submit
    fn resolve_conflict(
        &self,
        request: ResolveConflictRequest,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    /// Server-side sync status for this client
    fn status(&self) -> impl Future<Output = TransportResult<ServerSyncStatus>> + Send;
}
