//! Data models for medtrack

mod cursor;
mod entity;
mod queue_item;
mod sync_conflict;

pub use cursor::SyncCursor;
pub use entity::{CacheTable, CachedEntity, EntityKey, EntityType, DEFAULT_WAREHOUSE};
pub use queue_item::{DeadLetter, OfflineQueueItem, QueueAction, UnknownAction};
pub use sync_conflict::{ConflictResolution, ConflictType, SyncConflict};
