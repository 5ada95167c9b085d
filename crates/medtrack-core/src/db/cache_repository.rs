//! Cache table repository implementation

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{CacheTable, CachedEntity, EntityKey};
use crate::util::{non_blank, now_millis};

/// Trait for cached entity storage operations
pub trait CacheRepository {
    /// Get an entity by key
    fn get(&self, table: CacheTable, key: &EntityKey) -> Result<Option<CachedEntity>>;

    /// List every entity of a table
    fn get_all(&self, table: CacheTable) -> Result<Vec<CachedEntity>>;

    /// Insert or overwrite an entity
    fn put(&self, table: CacheTable, key: &EntityKey, data: &Value) -> Result<()>;

    /// Delete an entity, returning whether it existed
    fn delete(&self, table: CacheTable, key: &EntityKey) -> Result<bool>;

    /// Remove every entity of a table
    fn clear(&self, table: CacheTable) -> Result<usize>;
}

/// `SQLite` implementation of `CacheRepository`
pub struct SqliteCacheRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCacheRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_keyed(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedEntity> {
        Ok(CachedEntity {
            key: EntityKey::Id(row.get(0)?),
            data: row.get(1)?,
            cached_at: row.get(2)?,
        })
    }

    fn parse_stock_level(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedEntity> {
        Ok(CachedEntity {
            key: EntityKey::Composite {
                item_id: row.get(0)?,
                warehouse_id: row.get(1)?,
            },
            data: row.get(2)?,
            cached_at: row.get(3)?,
        })
    }
}

/// Split a key into the shape its table expects
enum TableKey<'k> {
    Id(&'k str),
    Composite(&'k str, &'k str),
}

fn table_key(table: CacheTable, key: &EntityKey) -> Result<TableKey<'_>> {
    match (table, key) {
        (CacheTable::StockLevels, EntityKey::Composite { item_id, warehouse_id }) => {
            Ok(TableKey::Composite(item_id, warehouse_id))
        }
        (CacheTable::StockLevels, EntityKey::Id(id)) => Err(Error::InvalidInput(format!(
            "stock levels are keyed by item and warehouse, got '{id}'"
        ))),
        (_, EntityKey::Id(id)) => Ok(TableKey::Id(id)),
        (_, EntityKey::Composite { .. }) => Err(Error::InvalidInput(format!(
            "{table} is keyed by id, got composite key '{key}'"
        ))),
    }
}

fn sku_of(data: &Value) -> Option<&str> {
    data.get("sku").and_then(Value::as_str).and_then(non_blank)
}

impl CacheRepository for SqliteCacheRepository<'_> {
    fn get(&self, table: CacheTable, key: &EntityKey) -> Result<Option<CachedEntity>> {
        let entity = match table_key(table, key)? {
            TableKey::Composite(item_id, warehouse_id) => self
                .conn
                .query_row(
                    "SELECT item_id, warehouse_id, data, cached_at FROM stock_levels
                     WHERE item_id = ?1 AND warehouse_id = ?2",
                    params![item_id, warehouse_id],
                    Self::parse_stock_level,
                )
                .optional()?,
            TableKey::Id(id) => self
                .conn
                .query_row(
                    &format!(
                        "SELECT id, data, cached_at FROM {} WHERE id = ?1",
                        table.table_name()
                    ),
                    params![id],
                    Self::parse_keyed,
                )
                .optional()?,
        };

        Ok(entity)
    }

    fn get_all(&self, table: CacheTable) -> Result<Vec<CachedEntity>> {
        let entities = if table == CacheTable::StockLevels {
            let mut stmt = self.conn.prepare(
                "SELECT item_id, warehouse_id, data, cached_at FROM stock_levels
                 ORDER BY item_id, warehouse_id",
            )?;
            let rows = stmt.query_map([], Self::parse_stock_level)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT id, data, cached_at FROM {} ORDER BY id",
                table.table_name()
            ))?;
            let rows = stmt.query_map([], Self::parse_keyed)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(entities)
    }

    fn put(&self, table: CacheTable, key: &EntityKey, data: &Value) -> Result<()> {
        let now = now_millis();

        match (table, table_key(table, key)?) {
            (_, TableKey::Composite(item_id, warehouse_id)) => {
                self.conn.execute(
                    "INSERT INTO stock_levels (item_id, warehouse_id, data, cached_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(item_id, warehouse_id) DO UPDATE SET
                        data = excluded.data,
                        cached_at = excluded.cached_at",
                    params![item_id, warehouse_id, data, now],
                )?;
            }
            (CacheTable::Items, TableKey::Id(id)) => {
                let sku = sku_of(data);
                let tx = self.conn.unchecked_transaction()?;
                // The incoming copy owns its SKU; another row's claim on it is stale
                if let Some(sku) = sku {
                    let released = tx.execute(
                        "UPDATE items SET sku = NULL WHERE sku = ?1 AND id != ?2",
                        params![sku, id],
                    )?;
                    if released > 0 {
                        tracing::debug!(sku, item = id, "Released SKU held by another cached item");
                    }
                }
                tx.execute(
                    "INSERT INTO items (id, sku, data, cached_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        sku = excluded.sku,
                        data = excluded.data,
                        cached_at = excluded.cached_at",
                    params![id, sku, data, now],
                )?;
                tx.commit()?;
            }
            (_, TableKey::Id(id)) => {
                self.conn.execute(
                    &format!(
                        "INSERT INTO {} (id, data, cached_at)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(id) DO UPDATE SET
                            data = excluded.data,
                            cached_at = excluded.cached_at",
                        table.table_name()
                    ),
                    params![id, data, now],
                )?;
            }
        }

        Ok(())
    }

    fn delete(&self, table: CacheTable, key: &EntityKey) -> Result<bool> {
        let rows = match table_key(table, key)? {
            TableKey::Composite(item_id, warehouse_id) => self.conn.execute(
                "DELETE FROM stock_levels WHERE item_id = ?1 AND warehouse_id = ?2",
                params![item_id, warehouse_id],
            )?,
            TableKey::Id(id) => self.conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", table.table_name()),
                params![id],
            )?,
        };

        Ok(rows > 0)
    }

    fn clear(&self, table: CacheTable) -> Result<usize> {
        let rows = self
            .conn
            .execute(&format!("DELETE FROM {}", table.table_name()), [])?;
        Ok(rows)
    }
}
