//! Offline mutation queue
//!
//! Every user mutation made without connectivity is recorded here and stays
//! until the server confirms it. The queue is backed by the local store, so
//! it survives restarts; the pending count is mirrored on a watch channel
//! for status reporting.

mod retry;

pub use retry::RetryPolicy;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use crate::db::{LocalStore, QueueRepository, SqliteQueueRepository};
use crate::error::{Error, Result};
use crate::models::{DeadLetter, OfflineQueueItem, QueueAction};
use crate::util::now_millis;

/// Durable FIFO of unconfirmed mutations
#[derive(Debug, Clone)]
pub struct OfflineQueue {
    store: LocalStore,
    pending: Arc<watch::Sender<usize>>,
}

impl OfflineQueue {
    /// Queue over the given store.
    ///
    /// The pending count starts at 0 until the first operation (or
    /// [`refresh`](Self::refresh)) reads the persisted queue.
    pub fn new(store: LocalStore) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            store,
            pending: Arc::new(pending),
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Record a mutation; returns the new item's id
    pub async fn enqueue(
        &self,
        action: QueueAction,
        entity_type: &str,
        entity_id: &str,
        payload: Value,
    ) -> Result<String> {
        let entity_type = entity_type.trim();
        let entity_id = entity_id.trim();
        if entity_type.is_empty() {
            return Err(Error::InvalidInput("entity type must not be empty".into()));
        }
        if entity_id.is_empty() {
            return Err(Error::InvalidInput("entity id must not be empty".into()));
        }

        let item = OfflineQueueItem::new(action, entity_type, entity_id, payload);
        let id = item.id.clone();

        let count = self
            .store
            .with_conn(|conn| {
                let repo = SqliteQueueRepository::new(conn);
                repo.insert(&item)?;
                repo.count()
            })
            .await?;
        self.publish(count);

        tracing::debug!(id = %id, action = %action, entity_type, entity_id, "Queued offline action");
        Ok(id)
    }

    /// Every queued item, oldest first
    pub async fn list(&self) -> Result<Vec<OfflineQueueItem>> {
        self.store
            .with_conn(|conn| SqliteQueueRepository::new(conn).list())
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<OfflineQueueItem>> {
        self.store
            .with_conn(|conn| SqliteQueueRepository::new(conn).get(id))
            .await
    }

    /// Drop a confirmed item; returns whether it was queued
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let (removed, count) = self
            .store
            .with_conn(|conn| {
                let repo = SqliteQueueRepository::new(conn);
                let removed = repo.remove(id)?;
                Ok((removed, repo.count()?))
            })
            .await?;
        self.publish(count);
        Ok(removed)
    }

    /// Remove several items in one transaction; returns how many were queued
    pub async fn remove_many(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let (removed, count) = self
            .store
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                let repo = SqliteQueueRepository::new(&tx);
                let mut removed = 0;
                for id in ids {
                    if repo.remove(id)? {
                        removed += 1;
                    }
                }
                let count = repo.count()?;
                tx.commit()?;
                Ok((removed, count))
            })
            .await?;
        self.publish(count);
        Ok(removed)
    }

    /// Discard every queued item
    pub async fn clear(&self) -> Result<usize> {
        let removed = self
            .store
            .with_conn(|conn| SqliteQueueRepository::new(conn).clear())
            .await?;
        self.publish(0);
        Ok(removed)
    }

    pub async fn len(&self) -> Result<usize> {
        let count = self
            .store
            .with_conn(|conn| SqliteQueueRepository::new(conn).count())
            .await?;
        self.publish(count);
        Ok(count)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Re-read the persisted count and publish it
    pub async fn refresh(&self) -> Result<usize> {
        self.len().await
    }

    /// Last published pending count
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Receiver that observes the pending count after every queue mutation
    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    /// Note a failed submission: bump the retry count and schedule the next attempt.
    ///
    /// Returns the updated item, or `None` if it is no longer queued.
    pub async fn record_failure(
        &self,
        id: &str,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<Option<OfflineQueueItem>> {
        let now = now_millis();
        let updated = self
            .store
            .with_conn(|conn| {
                let repo = SqliteQueueRepository::new(conn);
                let Some(mut item) = repo.get(id)? else {
                    return Ok(None);
                };
                item.retry_count = item.retry_count.saturating_add(1);
                item.last_error = Some(error.to_string());
                item.next_attempt_at = Some(policy.next_attempt_at(item.retry_count, now));
                repo.update_retry_state(&item)?;
                Ok(Some(item))
            })
            .await?;

        if let Some(item) = &updated {
            if policy.is_exhausted(item.retry_count) {
                tracing::warn!(
                    id = %item.id,
                    retries = item.retry_count,
                    error,
                    "Queue item reached its retry limit and will no longer be submitted"
                );
            }
        }

        Ok(updated)
    }

    /// Move every item at or over `max_retries` to the dead-letter table
    pub async fn quarantine_exhausted(&self, max_retries: u32) -> Result<usize> {
        let now = now_millis();
        let (moved, count) = self
            .store
            .with_conn(|conn| {
                let repo = SqliteQueueRepository::new(conn);
                let mut moved = 0;
                for item in repo.list()? {
                    if item.retry_count < max_retries {
                        continue;
                    }
                    let reason = item
                        .last_error
                        .clone()
                        .unwrap_or_else(|| format!("exceeded {max_retries} retries"));
                    repo.quarantine(&item, &reason, now)?;
                    moved += 1;
                }
                Ok((moved, repo.count()?))
            })
            .await?;
        self.publish(count);

        if moved > 0 {
            tracing::info!("Quarantined {moved} exhausted queue item(s)");
        }
        Ok(moved)
    }

    /// Quarantined items, newest first
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.store
            .with_conn(|conn| SqliteQueueRepository::new(conn).dead_letters())
            .await
    }

    /// Put a quarantined item back in the queue with a fresh retry budget
    pub async fn requeue_dead_letter(&self, id: &str) -> Result<OfflineQueueItem> {
        let (item, count) = self
            .store
            .with_conn(|conn| {
                let repo = SqliteQueueRepository::new(conn);
                let item = repo.requeue(id)?;
                Ok((item, repo.count()?))
            })
            .await?;
        self.publish(count);

        item.ok_or_else(|| Error::NotFound(format!("dead letter {id}")))
    }

    fn publish(&self, count: usize) {
        self.pending.send_replace(count);
    }
}
