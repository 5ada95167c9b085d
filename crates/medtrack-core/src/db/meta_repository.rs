//! Sync meta repository implementation

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{EntityType, SyncCursor};

/// Trait for sync bookkeeping storage (cursors and free-form values)
pub trait MetaRepository {
    /// Load the cursor for an entity type
    fn get_cursor(&self, entity_type: EntityType) -> Result<Option<SyncCursor>>;

    /// Store a cursor, keeping the higher of the stored and incoming versions
    fn advance_cursor(&self, cursor: &SyncCursor) -> Result<SyncCursor>;

    /// Force a cursor back to version 0
    fn reset_cursor(&self, entity_type: EntityType) -> Result<()>;
}

/// `SQLite` implementation of `MetaRepository`
pub struct SqliteMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMetaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn cursor_key(entity_type: EntityType) -> String {
        format!("cursor_{}", entity_type.as_str())
    }

    fn write_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        let value = serde_json::to_string(cursor)?;
        self.conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![Self::cursor_key(cursor.entity_type), value],
        )?;
        Ok(())
    }
}

impl MetaRepository for SqliteMetaRepository<'_> {
    fn get_cursor(&self, entity_type: EntityType) -> Result<Option<SyncCursor>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                params![Self::cursor_key(entity_type)],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    fn advance_cursor(&self, cursor: &SyncCursor) -> Result<SyncCursor> {
        let stored = match self.get_cursor(cursor.entity_type)? {
            Some(existing) => {
                if cursor.last_sync_version < existing.last_sync_version {
                    tracing::warn!(
                        entity_type = %cursor.entity_type,
                        stored = existing.last_sync_version,
                        incoming = cursor.last_sync_version,
                        "Ignoring cursor regression"
                    );
                }
                existing.advance(cursor)
            }
            None => cursor.clone(),
        };

        self.write_cursor(&stored)?;
        Ok(stored)
    }

    fn reset_cursor(&self, entity_type: EntityType) -> Result<()> {
        self.write_cursor(&SyncCursor::initial(entity_type))
    }
}
