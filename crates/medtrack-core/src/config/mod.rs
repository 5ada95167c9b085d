//! Sync engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::EntityType;
use crate::queue::RetryPolicy;

/// Default period between automatic sync cycles
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Default cap on delta requests per cycle
pub const DEFAULT_MAX_PULL_ROUNDS: usize = 50;

/// Default page size requested from the delta endpoint
pub const DEFAULT_MAX_CHANGES: u32 = 500;

/// What the apply phase does with server-side deletions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Remove the entity from the local cache
    #[default]
    Apply,
    /// Leave the cached copy in place
    Ignore,
}

/// Sync engine tuning
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period of the auto-sync ticker; `None` disables it
    pub auto_sync_interval: Option<Duration>,
    pub retry: RetryPolicy,
    pub delete_policy: DeletePolicy,
    /// Upper bound on delta requests while the server reports `hasMore`
    pub max_pull_rounds: usize,
    /// Page size hint sent with every delta request
    pub max_changes: Option<u32>,
    /// Entity types whose cursors are sent on pull
    pub entity_types: Vec<EntityType>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync_interval: Some(DEFAULT_SYNC_INTERVAL),
            retry: RetryPolicy::default(),
            delete_policy: DeletePolicy::default(),
            max_pull_rounds: DEFAULT_MAX_PULL_ROUNDS,
            max_changes: Some(DEFAULT_MAX_CHANGES),
            entity_types: EntityType::ALL.to_vec(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.auto_sync_interval = None;
        self
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_delete_policy(mut self, delete_policy: DeletePolicy) -> Self {
        self.delete_policy = delete_policy;
        self
    }

    /// Cap on delta requests per cycle (at least one)
    #[must_use]
    pub fn with_max_pull_rounds(mut self, rounds: usize) -> Self {
        self.max_pull_rounds = rounds.max(1);
        self
    }

    #[must_use]
    pub const fn with_max_changes(mut self, max_changes: Option<u32>) -> Self {
        self.max_changes = max_changes;
        self
    }

    #[must_use]
    pub fn with_entity_types(mut self, entity_types: impl IntoIterator<Item = EntityType>) -> Self {
        self.entity_types = entity_types.into_iter().collect();
        self.entity_types.sort();
        self.entity_types.dedup();
        self
    }
}
