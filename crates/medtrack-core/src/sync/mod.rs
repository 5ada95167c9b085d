//! Delta synchronization against the server-of-record

mod engine;
mod mapping;
mod status;

pub use engine::{CycleOutcome, SyncEngine, SyncReport};
pub use mapping::{action_type_for, to_sync_action};
pub use status::{LastSyncStatus, SyncPhase, SyncStatus, SyncStatusAggregator};
