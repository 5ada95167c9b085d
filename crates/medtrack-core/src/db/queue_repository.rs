//! Offline queue repository implementation

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql};

use crate::error::Result;
use crate::models::{DeadLetter, OfflineQueueItem, QueueAction};

impl ToSql for QueueAction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for QueueAction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error| FromSqlError::Other(Box::new(error)))
    }
}

/// Trait for offline queue storage operations
pub trait QueueRepository {
    /// Append an item to the queue
    fn insert(&self, item: &OfflineQueueItem) -> Result<()>;

    /// Every queued item in insertion order
    fn list(&self) -> Result<Vec<OfflineQueueItem>>;

    /// Get a queued item by id
    fn get(&self, id: &str) -> Result<Option<OfflineQueueItem>>;

    /// Remove an item, returning whether it was queued
    fn remove(&self, id: &str) -> Result<bool>;

    /// Remove every queued item
    fn clear(&self) -> Result<usize>;

    /// Number of queued items
    fn count(&self) -> Result<usize>;

    /// Persist retry bookkeeping for an item
    fn update_retry_state(&self, item: &OfflineQueueItem) -> Result<()>;

    /// Move an item to the dead-letter table
    fn quarantine(&self, item: &OfflineQueueItem, reason: &str, at: i64) -> Result<()>;

    /// Quarantined items, newest first
    fn dead_letters(&self) -> Result<Vec<DeadLetter>>;

    /// Move a quarantined item back into the queue with a fresh retry budget
    fn requeue(&self, id: &str) -> Result<Option<OfflineQueueItem>>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

const ITEM_COLUMNS: &str =
    "id, action, entity_type, entity_id, payload, timestamp, retry_count, last_error, next_attempt_at";

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<OfflineQueueItem> {
        Ok(OfflineQueueItem {
            id: row.get(0)?,
            action: row.get(1)?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            payload: row.get(4)?,
            timestamp: row.get(5)?,
            retry_count: row.get(6)?,
            last_error: row.get(7)?,
            next_attempt_at: row.get(8)?,
        })
    }

    fn insert_item(conn: &Connection, item: &OfflineQueueItem) -> Result<()> {
        conn.execute(
            &format!("INSERT INTO offline_queue ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                item.id,
                item.action,
                item.entity_type,
                item.entity_id,
                item.payload,
                item.timestamp,
                item.retry_count,
                item.last_error,
                item.next_attempt_at
            ],
        )?;
        Ok(())
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn insert(&self, item: &OfflineQueueItem) -> Result<()> {
        Self::insert_item(self.conn, item)
    }

    fn list(&self) -> Result<Vec<OfflineQueueItem>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ITEM_COLUMNS} FROM offline_queue ORDER BY seq"))?;

        let items = stmt
            .query_map([], Self::parse_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }

    fn get(&self, id: &str) -> Result<Option<OfflineQueueItem>> {
        let item = self
            .conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM offline_queue WHERE id = ?1"),
                params![id],
                Self::parse_item,
            )
            .optional()?;
        Ok(item)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM offline_queue WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn clear(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM offline_queue", [])?)
    }

    fn count(&self) -> Result<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM offline_queue", [], |row| {
                row.get::<_, usize>(0)
            })?;
        Ok(count)
    }

    fn update_retry_state(&self, item: &OfflineQueueItem) -> Result<()> {
        self.conn.execute(
            "UPDATE offline_queue SET retry_count = ?1, last_error = ?2, next_attempt_at = ?3
             WHERE id = ?4",
            params![
                item.retry_count,
                item.last_error,
                item.next_attempt_at,
                item.id
            ],
        )?;
        Ok(())
    }

    fn quarantine(&self, item: &OfflineQueueItem, reason: &str, at: i64) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO dead_letters (id, item, reason, quarantined_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                item = excluded.item,
                reason = excluded.reason,
                quarantined_at = excluded.quarantined_at",
            params![item.id, serde_json::to_value(item)?, reason, at],
        )?;
        tx.execute("DELETE FROM offline_queue WHERE id = ?1", params![item.id])?;
        tx.commit()?;
        Ok(())
    }

    fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let mut stmt = self.conn.prepare(
            "SELECT item, reason, quarantined_at FROM dead_letters
             ORDER BY quarantined_at DESC, id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, serde_json::Value>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(item, reason, quarantined_at)| -> Result<DeadLetter> {
                Ok(DeadLetter {
                    item: serde_json::from_value(item)?,
                    reason,
                    quarantined_at,
                })
            })
            .collect()
    }

    fn requeue(&self, id: &str) -> Result<Option<OfflineQueueItem>> {
        let tx = self.conn.unchecked_transaction()?;
        let stored: Option<serde_json::Value> = tx
            .query_row(
                "SELECT item FROM dead_letters WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(stored) = stored else {
            return Ok(None);
        };

        let mut item: OfflineQueueItem = serde_json::from_value(stored)?;
        item.retry_count = 0;
        item.last_error = None;
        item.next_attempt_at = None;

        tx.execute("DELETE FROM dead_letters WHERE id = ?1", params![id])?;
        Self::insert_item(&tx, &item)?;
        tx.commit()?;

        Ok(Some(item))
    }
}
