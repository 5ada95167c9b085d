//! Delta sync engine
//!
//! One cycle pushes the offline queue to the server-of-record, then pulls
//! server-side changes since the stored per-type cursors and applies them to
//! the local store. At most one cycle runs at a time.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::mapping::to_sync_action;
use super::status::{self, CycleMemoHandle, SyncPhase, SyncStatus, SyncStatusAggregator};
use crate::config::{DeletePolicy, SyncConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{
    ConflictResolution, EntityType, OfflineQueueItem, SyncConflict, SyncCursor,
};
use crate::queue::OfflineQueue;
use crate::transport::{
    ChangeType, DeltaRequest, EntityChange, ResolveConflictRequest, ServerSyncStatus,
    SubmitRequest, SyncTransport,
};
use crate::util::now_millis;

/// Shortest period accepted by the auto-sync ticker
const MIN_AUTO_SYNC_INTERVAL: Duration = Duration::from_millis(10);

/// What one completed cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Queue items submitted
    pub pushed: usize,
    /// Submitted items the server accepted (and that left the queue)
    pub accepted: usize,
    /// Conflicts reported for this cycle's submissions
    pub conflicts: Vec<SyncConflict>,
    /// Queue items held back: retry cap reached, backoff pending, or an unresolved conflict
    pub skipped: usize,
    /// Delta requests issued
    pub pull_rounds: usize,
    /// Server changes written to the local cache
    pub applied: usize,
    /// Server deletions removed from the local cache
    pub deleted: usize,
    /// Changes not applied: stale versions, untracked types, or ignored deletions
    pub ignored: usize,
}

/// Result of asking for a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(SyncReport),
    /// Another cycle holds the guard; nothing was sent
    AlreadyRunning,
    /// The client is offline; nothing was sent
    Offline,
}

struct EngineInner<T> {
    queue: OfflineQueue,
    connectivity: ConnectivityMonitor,
    transport: T,
    config: SyncConfig,
    cycle: tokio::sync::Mutex<()>,
    memo: CycleMemoHandle,
    status: SyncStatusAggregator,
    /// Outstanding conflicts keyed by queue item id
    conflicts: Mutex<BTreeMap<String, SyncConflict>>,
    auto_sync_enabled: AtomicBool,
    auto_sync: Mutex<Option<JoinHandle<()>>>,
}

/// Push-then-pull reconciliation against a [`SyncTransport`]
pub struct SyncEngine<T: SyncTransport> {
    inner: Arc<EngineInner<T>>,
}

impl<T: SyncTransport> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SyncTransport + std::fmt::Debug> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncEngine")
            .field("store", self.inner.queue.store())
            .field("transport", &self.inner.transport)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: SyncTransport> SyncEngine<T> {
    pub fn new(
        queue: OfflineQueue,
        connectivity: ConnectivityMonitor,
        transport: T,
        config: SyncConfig,
    ) -> Self {
        let memo = status::memo_channel();
        let status = SyncStatusAggregator::new(
            connectivity.subscribe(),
            queue.subscribe_pending(),
            Arc::clone(&memo),
        );

        Self {
            inner: Arc::new(EngineInner {
                queue,
                connectivity,
                transport,
                config,
                cycle: tokio::sync::Mutex::new(()),
                memo,
                status,
                conflicts: Mutex::new(BTreeMap::new()),
                auto_sync_enabled: AtomicBool::new(false),
                auto_sync: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &LocalStore {
        self.inner.queue.store()
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.inner.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.current()
    }

    pub fn status_aggregator(&self) -> SyncStatusAggregator {
        self.inner.status.clone()
    }

    /// Receiver that observes every status change
    pub fn subscribe_status(&self) -> tokio::sync::watch::Receiver<SyncStatus> {
        self.inner.status.watch()
    }

    /// Conflicts awaiting [`resolve_conflict`](Self::resolve_conflict)
    pub fn conflicts(&self) -> Vec<SyncConflict> {
        lock(&self.inner.conflicts).values().cloned().collect()
    }

    /// Run a cycle unless one is in flight or the client is offline.
    ///
    /// Failures inside the cycle are recorded in the status and returned.
    pub async fn run_sync(&self) -> Result<CycleOutcome> {
        if !self.is_online() {
            tracing::debug!("Skipping sync while offline");
            return Ok(CycleOutcome::Offline);
        }

        let Ok(_guard) = self.inner.cycle.try_lock() else {
            tracing::debug!("Sync already in progress");
            return Ok(CycleOutcome::AlreadyRunning);
        };

        self.run_cycle(false).await.map(CycleOutcome::Completed)
    }

    /// Run a cycle and report the resulting status.
    ///
    /// A concurrent call returns the current status without touching the network.
    pub async fn perform_sync(&self) -> SyncStatus {
        if let Err(error) = self.run_sync().await {
            tracing::warn!("Sync failed: {error}");
        }
        self.status()
    }

    /// Reset every cursor, clear the cache, and run a cycle.
    ///
    /// Waits for an in-flight cycle instead of skipping.
    pub async fn force_full_sync(&self) -> Result<SyncReport> {
        if !self.is_online() {
            return Err(Error::Offline);
        }

        let _guard = self.inner.cycle.lock().await;
        tracing::info!("Starting full resync");
        self.run_cycle(true).await
    }

    async fn run_cycle(&self, full: bool) -> Result<SyncReport> {
        status::begin_cycle(&self.inner.memo);
        let started = std::time::Instant::now();

        let result = self.cycle_steps(full).await;
        match &result {
            Ok(report) => {
                status::finish_success(&self.inner.memo, lock(&self.inner.conflicts).len());
                tracing::info!(
                    accepted = report.accepted,
                    conflicts = report.conflicts.len(),
                    applied = report.applied,
                    deleted = report.deleted,
                    rounds = report.pull_rounds,
                    "Sync completed in {}ms",
                    started.elapsed().as_millis()
                );
            }
            Err(error) => {
                status::finish_failure(&self.inner.memo, error.to_string());
            }
        }
        result
    }

    async fn cycle_steps(&self, full: bool) -> Result<SyncReport> {
        if full {
            self.store().reset_cursors(&EntityType::ALL).await?;
            let cleared = self.store().clear_all_caches().await?;
            tracing::debug!("Cleared {cleared} cached entities");
        }

        let mut report = SyncReport::default();
        self.push(&mut report).await?;
        self.pull(&mut report).await?;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    fn is_eligible(&self, item: &OfflineQueueItem, now: i64, outstanding: &HashSet<String>) -> bool {
        let retry = &self.inner.config.retry;
        if retry.is_exhausted(item.retry_count) {
            tracing::debug!(id = %item.id, retries = item.retry_count, "Holding back exhausted queue item");
            return false;
        }
        item.is_due(now) && !outstanding.contains(&item.id)
    }

    async fn push(&self, report: &mut SyncReport) -> Result<()> {
        let items = self.inner.queue.list().await?;
        if items.is_empty() {
            return Ok(());
        }
        status::set_phase(&self.inner.memo, SyncPhase::Pushing);

        let now = now_millis();
        let outstanding: HashSet<String> = lock(&self.inner.conflicts).keys().cloned().collect();
        let (eligible, held): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|item| self.is_eligible(item, now, &outstanding));
        report.skipped = held.len();
        if eligible.is_empty() {
            return Ok(());
        }

        let actions = eligible.iter().map(to_sync_action).collect();
        tracing::debug!("Pushing {} queued action(s)", eligible.len());

        let response = match self.inner.transport.submit(SubmitRequest { actions }).await {
            Ok(response) => response,
            Err(error) => {
                let message = error.to_string();
                for item in &eligible {
                    self.inner
                        .queue
                        .record_failure(&item.id, &message, &self.inner.config.retry)
                        .await?;
                }
                return Err(error.into());
            }
        };
        report.pushed = eligible.len();

        let submitted: HashSet<&str> = eligible.iter().map(|item| item.id.as_str()).collect();
        let conflicts: Vec<SyncConflict> = response
            .conflicts
            .into_iter()
            .filter(|conflict| submitted.contains(conflict.action_id.as_str()))
            .collect();
        let conflicted: HashSet<&str> = conflicts
            .iter()
            .map(|conflict| conflict.action_id.as_str())
            .collect();

        let accepted: Vec<String> = eligible
            .iter()
            .filter(|item| !conflicted.contains(item.id.as_str()))
            .map(|item| item.id.clone())
            .collect();
        report.accepted = self.inner.queue.remove_many(&accepted).await?;

        if !conflicts.is_empty() {
            tracing::info!("Server reported {} conflict(s)", conflicts.len());
            let mut outstanding = lock(&self.inner.conflicts);
            for conflict in &conflicts {
                outstanding.insert(conflict.action_id.clone(), conflict.clone());
            }
            status::set_conflicts(&self.inner.memo, outstanding.len());
        }
        report.conflicts = conflicts;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pull and apply
    // -----------------------------------------------------------------------

    async fn pull(&self, report: &mut SyncReport) -> Result<()> {
        let config = &self.inner.config;
        let mut cursors = Vec::with_capacity(config.entity_types.len());
        for entity_type in &config.entity_types {
            let cursor = self.store().get_cursor(*entity_type).await?;
            cursors.push(cursor.unwrap_or_else(|| SyncCursor::initial(*entity_type)));
        }

        for _ in 0..config.max_pull_rounds {
            status::set_phase(&self.inner.memo, SyncPhase::Pulling);
            let request = DeltaRequest {
                cursors,
                max_changes: config.max_changes,
            };
            let response = self.inner.transport.delta(request.clone()).await?;
            report.pull_rounds += 1;

            status::set_phase(&self.inner.memo, SyncPhase::Applying);
            cursors = self
                .apply(&request, response.changes, &response.cursors, report)
                .await?;

            if !response.has_more {
                return Ok(());
            }
        }

        tracing::warn!(
            rounds = config.max_pull_rounds,
            "Delta pagination cap reached; remaining changes are pulled next cycle"
        );
        Ok(())
    }

    /// Apply one delta page and advance cursors; returns the cursors for the next request
    async fn apply(
        &self,
        request: &DeltaRequest,
        changes: Vec<EntityChange>,
        response_cursors: &[SyncCursor],
        report: &mut SyncReport,
    ) -> Result<Vec<SyncCursor>> {
        let mut by_type: BTreeMap<EntityType, Vec<EntityChange>> = BTreeMap::new();
        for change in changes {
            by_type.entry(change.entity_type).or_default().push(change);
        }

        let now = now_millis();
        let mut next = Vec::with_capacity(request.cursors.len());
        for requested in &request.cursors {
            let entity_type = requested.entity_type;
            let changes = by_type.remove(&entity_type).unwrap_or_default();
            self.apply_changes(entity_type, requested.last_sync_version, changes, report)
                .await?;

            let advanced = match response_cursors
                .iter()
                .find(|cursor| cursor.entity_type == entity_type)
            {
                Some(incoming) => {
                    let incoming = SyncCursor {
                        last_sync_at: incoming.last_sync_at.or(Some(now)),
                        ..incoming.clone()
                    };
                    self.store().put_cursor(&incoming).await?
                }
                None => requested.clone(),
            };
            next.push(advanced);
        }

        for (entity_type, untracked) in by_type {
            tracing::debug!("Ignoring {} change(s) for untracked type {entity_type}", untracked.len());
            report.ignored += untracked.len();
        }

        Ok(next)
    }

    async fn apply_changes(
        &self,
        entity_type: EntityType,
        floor: i64,
        changes: Vec<EntityChange>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let table = entity_type.cache_table();
        for change in changes {
            if change.version.is_some_and(|version| version <= floor) {
                report.ignored += 1;
                continue;
            }

            let key = table.key_for_change(&change.entity_id, &change.data)?;
            match (change.change_type, self.inner.config.delete_policy) {
                (ChangeType::Delete, DeletePolicy::Apply) => {
                    if self.store().delete(table, &key).await? {
                        report.deleted += 1;
                    }
                }
                (ChangeType::Delete, DeletePolicy::Ignore) => {
                    report.ignored += 1;
                }
                (ChangeType::Create | ChangeType::Update, _) => {
                    self.store().put_with_key(table, &key, &change.data).await?;
                    report.applied += 1;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Conflicts
    // -----------------------------------------------------------------------

    /// Settle a conflict with the server and drop its queue item.
    ///
    /// `ClientWins` re-submits the queued payload (or `merged_data` when the
    /// item is gone), `ServerWins` discards the local action, and `Merge`
    /// submits `merged_data`, which is then required.
    pub async fn resolve_conflict(
        &self,
        conflict: &SyncConflict,
        resolution: ConflictResolution,
        merged_data: Option<Value>,
    ) -> Result<()> {
        let merged_data = match resolution {
            ConflictResolution::Merge => Some(merged_data.ok_or_else(|| {
                Error::InvalidInput("merge resolution requires merged data".into())
            })?),
            ConflictResolution::ClientWins => {
                match self.inner.queue.get(&conflict.action_id).await? {
                    Some(item) => Some(item.payload),
                    None => Some(merged_data.ok_or_else(|| {
                        Error::NotFound(format!("queue item {}", conflict.action_id))
                    })?),
                }
            }
            ConflictResolution::ServerWins => None,
        };

        if !self.is_online() {
            return Err(Error::Offline);
        }

        let request = ResolveConflictRequest {
            conflict: SyncConflict {
                resolution: Some(resolution),
                ..conflict.clone()
            },
            resolution,
            merged_data,
        };
        self.inner.transport.resolve_conflict(request).await?;

        self.inner.queue.remove(&conflict.action_id).await?;
        let outstanding = {
            let mut conflicts = lock(&self.inner.conflicts);
            conflicts.remove(&conflict.action_id);
            conflicts.len()
        };
        status::set_conflicts(&self.inner.memo, outstanding);

        tracing::info!(
            action_id = %conflict.action_id,
            resolution = ?resolution,
            "Resolved sync conflict"
        );
        Ok(())
    }

    /// Server-side view of this client's sync state
    pub async fn server_status(&self) -> Result<ServerSyncStatus> {
        Ok(self.inner.transport.status().await?)
    }

    // -----------------------------------------------------------------------
    // Background triggers
    // -----------------------------------------------------------------------

    /// Start the connectivity listener and, when configured, auto-sync
    pub fn start(&self) -> JoinHandle<()> {
        if let Some(interval) = self.inner.config.auto_sync_interval {
            self.start_auto_sync(interval);
        }
        self.spawn_connectivity_listener()
    }

    /// Run `perform_sync` every `interval` while online.
    ///
    /// Replaces a previously started ticker. The first cycle runs one
    /// interval after the call.
    pub fn start_auto_sync(&self, interval: Duration) {
        self.inner.auto_sync_enabled.store(true, Ordering::SeqCst);
        let period = interval.max(MIN_AUTO_SYNC_INTERVAL);
        let engine = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(engine) = Self::upgrade(&engine) else {
                    break;
                };
                if !engine.inner.auto_sync_enabled.load(Ordering::SeqCst) {
                    break;
                }
                if engine.is_online() {
                    tokio::spawn(async move {
                        engine.perform_sync().await;
                    });
                }
            }
        });

        if let Some(previous) = lock(&self.inner.auto_sync).replace(handle) {
            previous.abort();
        }
        tracing::debug!("Auto-sync every {period:?}");
    }

    /// Stop scheduling cycles; an in-flight cycle runs to completion
    pub fn stop_auto_sync(&self) {
        self.inner.auto_sync_enabled.store(false, Ordering::SeqCst);
        if let Some(ticker) = lock(&self.inner.auto_sync).take() {
            ticker.abort();
        }
    }

    pub fn is_auto_sync_enabled(&self) -> bool {
        self.inner.auto_sync_enabled.load(Ordering::SeqCst)
    }

    /// Trigger `perform_sync` whenever connectivity transitions to online
    pub fn spawn_connectivity_listener(&self) -> JoinHandle<()> {
        let mut online = self.inner.connectivity.subscribe();
        let engine = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut was_online = *online.borrow_and_update();
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if is_online && !was_online {
                    let Some(engine) = Self::upgrade(&engine) else {
                        break;
                    };
                    tokio::spawn(async move {
                        engine.perform_sync().await;
                    });
                }
                was_online = is_online;
            }
        })
    }

    fn upgrade(inner: &Weak<EngineInner<T>>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }
}
