//! Local store connection management

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};

use super::cache_repository::{CacheRepository, SqliteCacheRepository};
use super::meta_repository::{MetaRepository, SqliteMetaRepository};
use super::migrations;
use crate::error::{Error, Result};
use crate::models::{CacheTable, CachedEntity, EntityKey, EntityType, SyncCursor};

#[derive(Debug, Clone)]
enum StoreLocation {
    File(PathBuf),
    Memory,
}

struct StoreInner {
    location: StoreLocation,
    conn: OnceCell<Mutex<Connection>>,
}

/// Durable key/value tables for cached entities, the offline queue, and sync meta.
///
/// The handle is cheap to clone and opens lazily: the `SQLite` connection is
/// created and migrated by the first operation that needs it. An open failure
/// is returned from that operation and retried on the next one.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LocalStore")
            .field("location", &self.inner.location)
            .field("open", &self.inner.conn.initialized())
            .finish()
    }
}

impl LocalStore {
    /// Store backed by a database file, created on first use
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self::with_location(StoreLocation::File(path.into()))
    }

    /// In-memory store (useful for testing)
    pub fn in_memory() -> Self {
        Self::with_location(StoreLocation::Memory)
    }

    fn with_location(location: StoreLocation) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                location,
                conn: OnceCell::new(),
            }),
        }
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        match &self.inner.location {
            StoreLocation::File(path) => Some(path),
            StoreLocation::Memory => None,
        }
    }

    /// Whether the connection has been opened yet
    pub fn is_open(&self) -> bool {
        self.inner.conn.initialized()
    }

    /// Open and migrate eagerly instead of on first use
    pub async fn open(&self) -> Result<()> {
        self.with_conn(|_| Ok(())).await
    }

    /// Run `f` against the connection, opening the store first if needed.
    ///
    /// The connection lock is held for the duration of `f`, so one call is
    /// one unit of work against the database.
    pub(crate) async fn with_conn<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<R>,
    ) -> Result<R> {
        let cell = self
            .inner
            .conn
            .get_or_try_init(|| async { Self::connect(&self.inner.location).map(Mutex::new) })
            .await?;
        let mut conn = cell.lock().await;
        f(&mut conn)
    }

    fn connect(location: &StoreLocation) -> Result<Connection> {
        let mut conn = match location {
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Connection::open(path).map_err(|error| {
                    Error::Database(format!(
                        "failed to open local store at {}: {error}",
                        path.display()
                    ))
                })?
            }
            StoreLocation::Memory => Connection::open_in_memory()?,
        };

        Self::configure(&conn)?;
        migrations::run(&mut conn)?;
        tracing::debug!("Opened local store ({location:?})");
        Ok(conn)
    }

    /// Configure `SQLite` for a single-process client cache
    fn configure(conn: &Connection) -> Result<()> {
        // journal_mode reports the resulting mode as a row; in-memory stores stay "memory"
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cache tables
    // -----------------------------------------------------------------------

    /// Get a cached entity by key
    pub async fn get(&self, table: CacheTable, key: &EntityKey) -> Result<Option<CachedEntity>> {
        self.with_conn(|conn| SqliteCacheRepository::new(conn).get(table, key))
            .await
    }

    /// Get a cached entity and deserialize its payload
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        table: CacheTable,
        key: &EntityKey,
    ) -> Result<Option<T>> {
        self.get(table, key)
            .await?
            .map(|entity| serde_json::from_value(entity.data).map_err(Error::from))
            .transpose()
    }

    /// All cached entities of a table, in key order
    pub async fn get_all(&self, table: CacheTable) -> Result<Vec<CachedEntity>> {
        self.with_conn(|conn| SqliteCacheRepository::new(conn).get_all(table))
            .await
    }

    /// Upsert an entity; the key is derived from its payload
    pub async fn put(&self, table: CacheTable, data: &Value) -> Result<EntityKey> {
        let key = table.key_of(data)?;
        self.put_with_key(table, &key, data).await?;
        Ok(key)
    }

    /// Upsert an entity under an explicit key
    pub async fn put_with_key(&self, table: CacheTable, key: &EntityKey, data: &Value) -> Result<()> {
        self.with_conn(|conn| SqliteCacheRepository::new(conn).put(table, key, data))
            .await
    }

    /// Delete an entity; returns whether a row was removed
    pub async fn delete(&self, table: CacheTable, key: &EntityKey) -> Result<bool> {
        self.with_conn(|conn| SqliteCacheRepository::new(conn).delete(table, key))
            .await
    }

    /// Remove every entity from a table; returns the number removed
    pub async fn clear(&self, table: CacheTable) -> Result<usize> {
        self.with_conn(|conn| SqliteCacheRepository::new(conn).clear(table))
            .await
    }

    /// Clear all four cache tables in one transaction
    pub async fn clear_all_caches(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            for table in CacheTable::ALL {
                removed += SqliteCacheRepository::new(&tx).clear(table)?;
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Sync meta
    // -----------------------------------------------------------------------

    /// Stored cursor for an entity type, if any
    pub async fn get_cursor(&self, entity_type: EntityType) -> Result<Option<SyncCursor>> {
        self.with_conn(|conn| SqliteMetaRepository::new(conn).get_cursor(entity_type))
            .await
    }

    /// Persist a cursor without moving it backwards; returns the stored cursor
    pub async fn put_cursor(&self, cursor: &SyncCursor) -> Result<SyncCursor> {
        self.with_conn(|conn| SqliteMetaRepository::new(conn).advance_cursor(cursor))
            .await
    }

    /// Reset cursors to version 0 (full resync)
    pub async fn reset_cursors(&self, entity_types: &[EntityType]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let repo = SqliteMetaRepository::new(&tx);
            for entity_type in entity_types {
                repo.reset_cursor(*entity_type)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_opens_lazily() {
        let store = LocalStore::in_memory();
        assert!(!store.is_open());

        assert!(store.get_all(CacheTable::Items).await.unwrap().is_empty());
        assert!(store.is_open());
    }

    #[tokio::test]
    async fn test_open_failure_is_surfaced() {
        let tmp = tempdir().unwrap();
        // A directory cannot be opened as a database file
        let store = LocalStore::at_path(tmp.path());

        let result = store.get_all(CacheTable::Items).await;
        assert!(result.is_err());
        assert!(!store.is_open());
    }

    #[tokio::test]
    async fn test_file_store_persists_across_handles() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("medtrack.db");

        let store = LocalStore::at_path(&path);
        store
            .put(CacheTable::Items, &json!({"id": "item-1", "name": "Infusion pump"}))
            .await
            .unwrap();
        drop(store);

        let reopened = LocalStore::at_path(&path);
        let entity = reopened
            .get(CacheTable::Items, &EntityKey::id("item-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.data["name"], "Infusion pump");
    }

    #[tokio::test]
    async fn test_get_as_deserializes_payload() {
        #[derive(Debug, Deserialize, PartialEq)]
        #[serde(rename_all = "camelCase")]
        struct StockLevel {
            item_id: String,
            warehouse_id: String,
            quantity: i64,
        }

        let store = LocalStore::in_memory();
        store
            .put(
                CacheTable::StockLevels,
                &json!({"itemId": "item-1", "warehouseId": "wh-1", "quantity": 12}),
            )
            .await
            .unwrap();

        let level: StockLevel = store
            .get_as(CacheTable::StockLevels, &EntityKey::composite("item-1", "wh-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level.quantity, 12);
        assert_eq!(level.warehouse_id, "wh-1");
        assert_eq!(level.item_id, "item-1");
    }

    #[tokio::test]
    async fn test_clear_all_caches() {
        let store = LocalStore::in_memory();
        store.put(CacheTable::Items, &json!({"id": "a"})).await.unwrap();
        store.put(CacheTable::Checkouts, &json!({"id": "c"})).await.unwrap();
        store.put(CacheTable::PickLists, &json!({"id": "p"})).await.unwrap();

        assert_eq!(store.clear_all_caches().await.unwrap(), 3);
        for table in CacheTable::ALL {
            assert!(store.get_all(table).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_cursor_never_moves_backwards() {
        let store = LocalStore::in_memory();
        assert_eq!(store.get_cursor(EntityType::Item).await.unwrap(), None);

        let mut cursor = SyncCursor::initial(EntityType::Item);
        cursor.last_sync_version = 8;
        store.put_cursor(&cursor).await.unwrap();

        cursor.last_sync_version = 3;
        let stored = store.put_cursor(&cursor).await.unwrap();
        assert_eq!(stored.last_sync_version, 8);

        store.reset_cursors(&[EntityType::Item]).await.unwrap();
        let reset = store.get_cursor(EntityType::Item).await.unwrap().unwrap();
        assert_eq!(reset.last_sync_version, 0);
    }
}
