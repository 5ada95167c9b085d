//! Offline queue item model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// User actions that can be recorded while offline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    Create,
    Update,
    Delete,
    StockAdjust,
    Checkout,
    Checkin,
    PickItem,
}

impl QueueAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::StockAdjust => "stock_adjust",
            Self::Checkout => "checkout",
            Self::Checkin => "checkin",
            Self::PickItem => "pick_item",
        }
    }
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown queue action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for QueueAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "stock_adjust" => Ok(Self::StockAdjust),
            "checkout" => Ok(Self::Checkout),
            "checkin" => Ok(Self::Checkin),
            "pick_item" => Ok(Self::PickItem),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}

/// A durable record of a mutation awaiting server confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueItem {
    /// Client-generated id (UUID v7, time-ordered)
    pub id: String,
    pub action: QueueAction,
    /// Client-side entity type name (e.g. `item`, `stock`)
    pub entity_type: String,
    pub entity_id: String,
    pub payload: Value,
    /// When the action was recorded (Unix ms)
    pub timestamp: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Earliest time the next push may include this item (Unix ms)
    pub next_attempt_at: Option<i64>,
}

impl OfflineQueueItem {
    /// Create a fresh queue item stamped with the current time
    pub fn new(
        action: QueueAction,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
        }
    }

    /// Whether the backoff window has elapsed at `now_ms`
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now_ms)
    }

    /// Version the client last saw, taken from a numeric `version` in the payload
    pub fn client_version(&self) -> Option<i64> {
        self.payload.get("version").and_then(Value::as_i64)
    }
}

/// A queue item moved out of the primary queue after exhausting its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub item: OfflineQueueItem,
    pub reason: String,
    /// Unix ms
    pub quarantined_at: i64,
}
