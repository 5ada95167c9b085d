//! In-process server-of-record
//!
//! Stands in for the inventory sync API during development and in tests. It
//! keeps one versioned record per entity, detects the same conflicts the real
//! server reports, pages deltas, and records every request it receives.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;

use super::wire::{
    ActionType, ChangeType, DeltaRequest, DeltaResponse, EntityChange, ResolveConflictRequest,
    ServerSyncStatus, SubmitRequest, SubmitResponse, SyncAction,
};
use super::{SyncTransport, TransportError, TransportResult};
use crate::models::{ConflictResolution, ConflictType, EntityType, SyncConflict, SyncCursor};
use crate::util::now_millis;

type RecordKey = (EntityType, String);

#[derive(Debug, Clone)]
struct Record {
    data: Value,
    version: i64,
    change_type: ChangeType,
}

impl Record {
    fn is_deleted(&self) -> bool {
        self.change_type == ChangeType::Delete
    }
}

#[derive(Debug, Default)]
struct ServerState {
    version: i64,
    records: BTreeMap<RecordKey, Record>,
    denied: HashSet<RecordKey>,
    latency: Option<Duration>,
    failing_submits: usize,
    failing_deltas: usize,
    submits: Vec<SubmitRequest>,
    deltas: Vec<DeltaRequest>,
    resolutions: Vec<ResolveConflictRequest>,
    last_submit_at: Option<i64>,
    errors: Vec<String>,
}

impl ServerState {
    fn write(&mut self, key: RecordKey, change_type: ChangeType, data: Value) -> i64 {
        self.version += 1;
        let version = self.version;
        let data = match (change_type, data) {
            (ChangeType::Delete, data) => data,
            (_, Value::Object(mut fields)) => {
                fields.insert("version".to_string(), Value::from(version));
                Value::Object(fields)
            }
            (_, data) => data,
        };
        self.records.insert(
            key,
            Record {
                data,
                version,
                change_type,
            },
        );
        version
    }

    fn conflict_for(&self, action: &SyncAction, key: &RecordKey) -> Option<SyncConflict> {
        let existing = self.records.get(key);
        let conflict_type = if self.denied.contains(key) {
            ConflictType::PermissionDenied
        } else if action.action_type == ActionType::Update && existing.is_some_and(Record::is_deleted) {
            ConflictType::Deleted
        } else if matches!(
            (action.client_version, existing),
            (Some(client), Some(record)) if !record.is_deleted() && client < record.version
        ) {
            ConflictType::VersionMismatch
        } else {
            return None;
        };

        Some(SyncConflict {
            action_id: action.id.clone(),
            entity_type: action.entity_type,
            entity_id: action.entity_id.clone(),
            conflict_type,
            server_version: existing.map(|record| record.version),
            client_version: action.client_version,
            resolution: None,
        })
    }

    fn apply(&mut self, action: &SyncAction, key: RecordKey) {
        match action.action_type {
            ActionType::Create => {
                self.write(key, ChangeType::Create, action.payload.clone());
            }
            ActionType::Update => {
                let merged = match self.records.get(&key) {
                    Some(record) if !record.is_deleted() => merge(&record.data, &action.payload),
                    _ => action.payload.clone(),
                };
                self.write(key, ChangeType::Update, merged);
            }
            ActionType::Delete => {
                if self.records.get(&key).is_some_and(|record| !record.is_deleted()) {
                    self.write(key, ChangeType::Delete, Value::Null);
                }
            }
        }
    }
}

/// Shallow merge of two JSON objects; anything else is replaced
fn merge(current: &Value, patch: &Value) -> Value {
    match (current, patch) {
        (Value::Object(current), Value::Object(patch)) => {
            let mut merged = current.clone();
            for (field, value) in patch {
                merged.insert(field.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => patch.clone(),
    }
}

/// Cloneable handle to a shared in-memory server
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency`
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn round_trip(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        tokio::task::yield_now().await;
    }

    // -----------------------------------------------------------------------
    // Server-side mutations
    // -----------------------------------------------------------------------

    /// Create or replace an entity as if another client wrote it; returns its version
    pub fn seed(&self, entity_type: EntityType, entity_id: &str, data: Value) -> i64 {
        let mut state = self.lock();
        let change_type = match state.records.get(&(entity_type, entity_id.to_string())) {
            Some(record) if !record.is_deleted() => ChangeType::Update,
            _ => ChangeType::Create,
        };
        state.write((entity_type, entity_id.to_string()), change_type, data)
    }

    /// Delete an entity server-side; returns the tombstone version
    pub fn remove(&self, entity_type: EntityType, entity_id: &str) -> Option<i64> {
        let mut state = self.lock();
        let key = (entity_type, entity_id.to_string());
        if state.records.get(&key).map_or(true, Record::is_deleted) {
            return None;
        }
        Some(state.write(key, ChangeType::Delete, Value::Null))
    }

    /// Reject every future action on this entity
    pub fn deny(&self, entity_type: EntityType, entity_id: &str) {
        self.lock().denied.insert((entity_type, entity_id.to_string()));
    }

    /// Make the next `count` submit calls fail as unreachable
    pub fn fail_next_submits(&self, count: usize) {
        self.lock().failing_submits = count;
    }

    /// Make the next `count` delta calls fail as unreachable
    pub fn fail_next_deltas(&self, count: usize) {
        self.lock().failing_deltas = count;
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Current payload of a live entity
    pub fn entity(&self, entity_type: EntityType, entity_id: &str) -> Option<Value> {
        self.lock()
            .records
            .get(&(entity_type, entity_id.to_string()))
            .filter(|record| !record.is_deleted())
            .map(|record| record.data.clone())
    }

    /// Latest version handed out
    pub fn version(&self) -> i64 {
        self.lock().version
    }

    pub fn submit_requests(&self) -> Vec<SubmitRequest> {
        self.lock().submits.clone()
    }

    pub fn delta_requests(&self) -> Vec<DeltaRequest> {
        self.lock().deltas.clone()
    }

    pub fn resolutions(&self) -> Vec<ResolveConflictRequest> {
        self.lock().resolutions.clone()
    }

    /// Total number of requests received on any endpoint
    pub fn request_count(&self) -> usize {
        let state = self.lock();
        state.submits.len() + state.deltas.len() + state.resolutions.len()
    }
}

impl SyncTransport for MemoryServer {
    async fn submit(&self, request: SubmitRequest) -> TransportResult<SubmitResponse> {
        self.round_trip().await;

        let mut state = self.lock();
        state.submits.push(request.clone());
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            state.errors.push("submit failed".to_string());
            return Err(TransportError::Unreachable("injected submit failure".to_string()));
        }

        let mut response = SubmitResponse::default();
        let mut touched = Vec::new();
        for action in &request.actions {
            let key = (action.entity_type, action.entity_id.clone());
            if let Some(conflict) = state.conflict_for(action, &key) {
                response.conflicts.push(conflict);
                continue;
            }
            state.apply(action, key);
            response.processed += 1;
            if !touched.contains(&action.entity_type) {
                touched.push(action.entity_type);
            }
        }

        let now = now_millis();
        response.new_cursors = touched
            .into_iter()
            .map(|entity_type| SyncCursor {
                entity_type,
                last_sync_version: state.version,
                last_sync_at: Some(now),
            })
            .collect();
        state.last_submit_at = Some(now);

        Ok(response)
    }

    async fn delta(&self, request: DeltaRequest) -> TransportResult<DeltaResponse> {
        self.round_trip().await;

        let mut state = self.lock();
        state.deltas.push(request.clone());
        if state.failing_deltas > 0 {
            state.failing_deltas -= 1;
            state.errors.push("delta failed".to_string());
            return Err(TransportError::Unreachable("injected delta failure".to_string()));
        }

        let requested: Vec<EntityType> = if request.cursors.is_empty() {
            EntityType::ALL.to_vec()
        } else {
            request.cursors.iter().map(|cursor| cursor.entity_type).collect()
        };

        let mut changes: Vec<EntityChange> = state
            .records
            .iter()
            .filter(|((entity_type, _), record)| {
                requested.contains(entity_type) && record.version > request.version_for(*entity_type)
            })
            .map(|((entity_type, entity_id), record)| EntityChange {
                entity_type: *entity_type,
                entity_id: entity_id.clone(),
                change_type: record.change_type,
                data: record.data.clone(),
                version: Some(record.version),
            })
            .collect();
        changes.sort_by_key(|change| change.version);

        let limit = request
            .max_changes
            .map_or(usize::MAX, |max| usize::try_from(max).unwrap_or(usize::MAX).max(1));
        let has_more = changes.len() > limit;
        changes.truncate(limit);

        let now = now_millis();
        let cursors = requested
            .iter()
            .map(|entity_type| {
                let newest = changes
                    .iter()
                    .filter(|change| change.entity_type == *entity_type)
                    .filter_map(|change| change.version)
                    .max()
                    .unwrap_or(0);
                SyncCursor {
                    entity_type: *entity_type,
                    last_sync_version: newest.max(request.version_for(*entity_type)),
                    last_sync_at: Some(now),
                }
            })
            .collect();

        Ok(DeltaResponse {
            changes,
            cursors,
            has_more,
        })
    }

    async fn resolve_conflict(&self, request: ResolveConflictRequest) -> TransportResult<()> {
        self.round_trip().await;

        let mut state = self.lock();
        state.resolutions.push(request.clone());

        let conflict = &request.conflict;
        let key = (conflict.entity_type, conflict.entity_id.clone());
        if request.resolution == ConflictResolution::ServerWins {
            return Ok(());
        }
        if state.denied.contains(&key) {
            return Err(TransportError::Api(format!(
                "permission denied for {} {} (403)",
                conflict.entity_type, conflict.entity_id
            )));
        }

        let data = request.merged_data.clone().unwrap_or(Value::Null);
        let change_type = if state.records.get(&key).map_or(true, Record::is_deleted) {
            ChangeType::Create
        } else {
            ChangeType::Update
        };
        state.write(key, change_type, data);
        Ok(())
    }

    async fn status(&self) -> TransportResult<ServerSyncStatus> {
        self.round_trip().await;

        let state = self.lock();
        let last_sync_at = state
            .last_submit_at
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
            .map(|at| at.to_rfc3339());
        let last_sync_status = match (state.last_submit_at, state.errors.is_empty()) {
            (None, true) => "never",
            (_, true) => "success",
            (_, false) => "failed",
        };

        Ok(ServerSyncStatus {
            last_sync_at,
            pending_actions: 0,
            last_sync_status: Some(last_sync_status.to_string()),
            sync_errors: state.errors.clone(),
        })
    }
}
