//! Aggregated sync status
//!
//! The status is never stored; it is derived from the connectivity flag, the
//! queue's pending count, and a memo the engine keeps about its last cycle.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::util::now_millis;

/// Where the engine is within a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Pushing,
    Pulling,
    Applying,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Pushing => "pushing",
            Self::Pulling => "pulling",
            Self::Applying => "applying",
        })
    }
}

/// Outcome of the most recent cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastSyncStatus {
    #[default]
    Never,
    Success,
    /// Completed, but conflicts await resolution
    Conflicts,
    Failed,
}

impl fmt::Display for LastSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Never => "never",
            Self::Success => "success",
            Self::Conflicts => "conflicts",
            Self::Failed => "failed",
        })
    }
}

/// Single observable view of the sync core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    /// True for the whole push, pull and apply cycle
    pub is_syncing: bool,
    pub phase: SyncPhase,
    pub pending_changes: usize,
    pub outstanding_conflicts: usize,
    /// Last successful cycle (Unix ms)
    pub last_sync_at: Option<i64>,
    pub last_sync_status: LastSyncStatus,
    pub last_sync_error: Option<String>,
}

/// What the engine remembers about its cycles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CycleMemo {
    pub phase: SyncPhase,
    pub last_sync_at: Option<i64>,
    pub last_sync_status: LastSyncStatus,
    pub last_sync_error: Option<String>,
    pub outstanding_conflicts: usize,
}

pub(crate) type CycleMemoHandle = Arc<watch::Sender<CycleMemo>>;

pub(crate) fn memo_channel() -> CycleMemoHandle {
    let (memo, _) = watch::channel(CycleMemo::default());
    Arc::new(memo)
}

pub(crate) fn begin_cycle(memo: &CycleMemoHandle) {
    set_phase(memo, SyncPhase::Pushing);
}

pub(crate) fn set_phase(memo: &CycleMemoHandle, phase: SyncPhase) {
    memo.send_if_modified(|state| {
        let changed = state.phase != phase;
        state.phase = phase;
        changed
    });
}

pub(crate) fn set_conflicts(memo: &CycleMemoHandle, outstanding: usize) {
    memo.send_if_modified(|state| {
        let changed = state.outstanding_conflicts != outstanding;
        state.outstanding_conflicts = outstanding;
        changed
    });
}

pub(crate) fn finish_success(memo: &CycleMemoHandle, outstanding: usize) {
    memo.send_modify(|state| {
        state.phase = SyncPhase::Idle;
        state.last_sync_at = Some(now_millis());
        state.last_sync_error = None;
        state.outstanding_conflicts = outstanding;
        state.last_sync_status = if outstanding == 0 {
            LastSyncStatus::Success
        } else {
            LastSyncStatus::Conflicts
        };
    });
}

pub(crate) fn finish_failure(memo: &CycleMemoHandle, error: String) {
    memo.send_modify(|state| {
        state.phase = SyncPhase::Idle;
        state.last_sync_error = Some(error);
        state.last_sync_status = LastSyncStatus::Failed;
    });
}

/// Derives [`SyncStatus`] from its three sources
#[derive(Debug, Clone)]
pub struct SyncStatusAggregator {
    online: watch::Receiver<bool>,
    pending: watch::Receiver<usize>,
    memo: CycleMemoHandle,
}

impl SyncStatusAggregator {
    pub(crate) const fn new(
        online: watch::Receiver<bool>,
        pending: watch::Receiver<usize>,
        memo: CycleMemoHandle,
    ) -> Self {
        Self {
            online,
            pending,
            memo,
        }
    }

    /// Status as of now
    pub fn current(&self) -> SyncStatus {
        let memo = self.memo.borrow();
        SyncStatus {
            is_online: *self.online.borrow(),
            is_syncing: memo.phase != SyncPhase::Idle,
            phase: memo.phase,
            pending_changes: *self.pending.borrow(),
            outstanding_conflicts: memo.outstanding_conflicts,
            last_sync_at: memo.last_sync_at,
            last_sync_status: memo.last_sync_status,
            last_sync_error: memo.last_sync_error.clone(),
        }
    }

    /// Receiver republished whenever any source changes.
    ///
    /// Spawns a forwarding task on the current Tokio runtime; the task ends
    /// when every returned receiver is dropped.
    pub fn watch(&self) -> watch::Receiver<SyncStatus> {
        let (tx, rx) = watch::channel(self.current());
        let mut online = self.online.clone();
        let mut pending = self.pending.clone();
        let mut memo = self.memo.subscribe();
        let aggregator = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = online.changed() => if changed.is_err() { break },
                    changed = pending.changed() => if changed.is_err() { break },
                    changed = memo.changed() => if changed.is_err() { break },
                    () = tx.closed() => break,
                }

                let status = aggregator.current();
                tx.send_if_modified(|current| {
                    if *current == status {
                        false
                    } else {
                        *current = status;
                        true
                    }
                });
            }
        });

        rx
    }
}
