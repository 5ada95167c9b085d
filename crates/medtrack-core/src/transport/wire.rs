//! Request and response bodies of the inventory sync endpoints

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ConflictResolution, EntityType, SyncConflict, SyncCursor};

/// Wire action vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Create,
    Update,
    Delete,
}

/// One queued mutation as submitted to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAction {
    /// Queue item id, echoed back in conflicts
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action_type: ActionType,
    pub payload: Value,
    /// Unix ms
    pub client_timestamp: i64,
    #[serde(default)]
    pub client_version: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub actions: Vec<SyncAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    #[serde(default)]
    pub processed: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub conflicts: Vec<SyncConflict>,
    #[serde(default)]
    pub new_cursors: Vec<SyncCursor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

/// A server-side change returned by the delta endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChange {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub change_type: ChangeType,
    #[serde(default)]
    pub data: Value,
    /// Server version that produced the change, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaRequest {
    pub cursors: Vec<SyncCursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_changes: Option<u32>,
}

impl DeltaRequest {
    /// Cursor version sent for an entity type (0 when absent)
    pub fn version_for(&self, entity_type: EntityType) -> i64 {
        self.cursors
            .iter()
            .find(|cursor| cursor.entity_type == entity_type)
            .map_or(0, |cursor| cursor.last_sync_version)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaResponse {
    #[serde(default)]
    pub changes: Vec<EntityChange>,
    #[serde(default)]
    pub cursors: Vec<SyncCursor>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveConflictRequest {
    pub conflict: SyncConflict,
    pub resolution: ConflictResolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_data: Option<Value>,
}

/// Server-side view of this client's sync state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSyncStatus {
    #[serde(default)]
    pub last_sync_at: Option<String>,
    #[serde(default)]
    pub pending_actions: usize,
    #[serde(default)]
    pub last_sync_status: Option<String>,
    #[serde(default)]
    pub sync_errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConflictType;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_submit_response_parses_server_shape() {
        let body = json!({
            "processed": 1,
            "failed": 0,
            "conflicts": [{
                "actionId": "a-2",
                "entityType": "STOCK_LEVEL",
                "entityId": "item-42",
                "conflictType": "version_mismatch",
                "serverVersion": 9,
                "clientVersion": 4
            }],
            "newCursors": [{"entityType": "ITEM", "lastSyncVersion": 12, "lastSyncAt": null}]
        });

        let response: SubmitResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.processed, 1);
        assert_eq!(response.conflicts[0].conflict_type, ConflictType::VersionMismatch);
        assert_eq!(response.conflicts[0].server_version, Some(9));
        assert_eq!(response.new_cursors[0].last_sync_version, 12);
    }

    #[test]
    fn test_delta_response_defaults() {
        let response: DeltaResponse = serde_json::from_value(json!({
            "changes": [{
                "entityType": "ITEM",
                "entityId": "item-1",
                "changeType": "delete"
            }]
        }))
        .unwrap();

        assert!(!response.has_more);
        assert!(response.cursors.is_empty());
        assert_eq!(response.changes[0].change_type, ChangeType::Delete);
        assert_eq!(response.changes[0].data, Value::Null);
    }

    #[test]
    fn test_action_serializes_camel_case() {
        let action = SyncAction {
            id: "a-1".into(),
            entity_type: EntityType::PickList,
            entity_id: "pl-1".into(),
            action_type: ActionType::Update,
            payload: json!({"picked": 2}),
            client_timestamp: 1_700_000_000_000,
            client_version: None,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["entityType"], "PICK_LIST");
        assert_eq!(value["actionType"], "UPDATE");
        assert_eq!(value["clientTimestamp"], 1_700_000_000_000_i64);
        assert!(value["clientVersion"].is_null());
    }

    #[test]
    fn test_resolve_request_uses_snake_case_merged_data() {
        let request = ResolveConflictRequest {
            conflict: SyncConflict {
                action_id: "a-1".into(),
                entity_type: EntityType::Item,
                entity_id: "item-1".into(),
                conflict_type: ConflictType::Deleted,
                server_version: None,
                client_version: None,
                resolution: None,
            },
            resolution: ConflictResolution::Merge,
            merged_data: Some(json!({"name": "merged"})),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["resolution"], "merge");
        assert_eq!(value["merged_data"]["name"], "merged");
        assert_eq!(value["conflict"]["actionId"], "a-1");
    }

    #[test]
    fn test_delta_request_version_for() {
        let request = DeltaRequest {
            cursors: vec![SyncCursor {
                entity_type: EntityType::Checkout,
                last_sync_version: 5,
                last_sync_at: None,
            }],
            max_changes: None,
        };
        assert_eq!(request.version_for(EntityType::Checkout), 5);
        assert_eq!(request.version_for(EntityType::Item), 0);
    }
}
