//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::EntityType;

/// Why the server rejected a pushed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    VersionMismatch,
    Deleted,
    PermissionDenied,
}

/// How the caller chose to settle a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Re-submit the local payload authoritatively
    ClientWins,
    /// Discard the local action; the server value arrives on the next pull
    ServerWins,
    /// Submit caller-supplied merged data
    Merge,
}

/// A push-time outcome that needs explicit resolution.
///
/// Conflicts are ephemeral: they live in memory until resolved, and the queue
/// item they refer to stays queued meanwhile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    /// Id of the queue item the server rejected
    pub action_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub conflict_type: ConflictType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}
