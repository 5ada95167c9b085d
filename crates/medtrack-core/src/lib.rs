//! medtrack-core - Core library for medtrack
//!
//! This crate contains the offline-first synchronization core shared by every
//! medtrack client: the local durable store, the offline mutation queue, the
//! connectivity monitor, and the delta sync engine that reconciles local
//! mutations against the server-of-record.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod sync;
pub mod transport;
pub mod util;

pub use config::{DeletePolicy, SyncConfig};
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe};
pub use db::LocalStore;
pub use error::{Error, Result};
pub use models::{
    CacheTable, CachedEntity, ConflictResolution, ConflictType, DeadLetter, EntityKey,
    EntityType, OfflineQueueItem, QueueAction, SyncConflict, SyncCursor,
};
pub use queue::{OfflineQueue, RetryPolicy};
pub use sync::{
    CycleOutcome, LastSyncStatus, SyncEngine, SyncPhase, SyncReport, SyncStatus,
    SyncStatusAggregator,
};
pub use transport::{HttpTransport, MemoryServer, SyncTransport, TransportError};
