//! Local store migrations

use crate::error::Result;
use rusqlite::{params, Connection};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    if !table_exists(conn, "schema_version")? {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![name],
        |row| row.get::<_, i32>(0),
    )?;
    Ok(exists != 0)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2)",
        params![table, column],
        |row| row.get::<_, i32>(0),
    )?;
    Ok(exists != 0)
}

/// Apply a batch of statements and record the version in one transaction
fn apply(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        params![version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated local store to version {version}");
    Ok(())
}

/// Migration to version 1: cache tables, offline queue, sync meta
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Inventory items, SKU unique when present
        "CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            sku TEXT,
            data TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_items_sku ON items(sku)",
        // Stock levels keyed by item + warehouse
        "CREATE TABLE IF NOT EXISTS stock_levels (
            item_id TEXT NOT NULL,
            warehouse_id TEXT NOT NULL,
            data TEXT NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (item_id, warehouse_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_stock_levels_warehouse ON stock_levels(warehouse_id)",
        "CREATE TABLE IF NOT EXISTS checkouts (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS pick_lists (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        )",
        // Offline mutation queue; seq preserves insertion order
        "CREATE TABLE IF NOT EXISTS offline_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_offline_queue_entity ON offline_queue(entity_type, entity_id)",
        // Cursors and other sync bookkeeping
        "CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
    ];

    apply(conn, 1, &statements)
}

/// Migration to version 2: retry backoff and dead-letter quarantine
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let mut statements = vec![
        "CREATE TABLE IF NOT EXISTS dead_letters (
            id TEXT PRIMARY KEY,
            item TEXT NOT NULL,
            reason TEXT NOT NULL,
            quarantined_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_dead_letters_quarantined_at ON dead_letters(quarantined_at DESC)",
    ];

    // ALTER TABLE has no IF NOT EXISTS form
    if !column_exists(conn, "offline_queue", "next_attempt_at")? {
        statements.push("ALTER TABLE offline_queue ADD COLUMN next_attempt_at INTEGER");
    }

    apply(conn, 2, &statements)
}
