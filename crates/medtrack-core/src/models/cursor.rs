//! Per-entity-type sync cursor

use serde::{Deserialize, Serialize};

use super::EntityType;

/// Last server version acknowledged for one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub entity_type: EntityType,
    /// Monotonic server version; 0 means no prior sync
    pub last_sync_version: i64,
    /// When the cursor was last advanced (Unix ms)
    #[serde(default)]
    pub last_sync_at: Option<i64>,
}

impl SyncCursor {
    /// Cursor for an entity type that has never been pulled
    pub const fn initial(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            last_sync_version: 0,
            last_sync_at: None,
        }
    }

    /// Merge an incoming cursor without ever moving the version backwards
    #[must_use]
    pub fn advance(&self, incoming: &Self) -> Self {
        if incoming.last_sync_version >= self.last_sync_version {
            Self {
                entity_type: self.entity_type,
                last_sync_version: incoming.last_sync_version,
                last_sync_at: incoming.last_sync_at.or(self.last_sync_at),
            }
        } else {
            self.clone()
        }
    }
}
