use std::collections::BTreeMap;

use medtrack_core::transport::ServerSyncStatus;
use medtrack_core::{CacheTable, EntityType, LocalStore, SyncCursor, SyncTransport};
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, Context};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStatus {
    pub db_path: String,
    pub pending_changes: usize,
    pub dead_letters: usize,
    pub cursors: Vec<SyncCursor>,
    pub cached_entities: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<ServerSyncStatus>,
}

pub async fn run_status(context: &Context, as_json: bool, remote: bool) -> Result<(), CliError> {
    let mut status = collect_local_status(context).await?;
    if remote {
        status.remote = Some(context.transport()?.status().await?);
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn collect_local_status(context: &Context) -> Result<LocalStatus, CliError> {
    let queue = context.queue();
    let store: &LocalStore = queue.store();

    let mut cursors = Vec::new();
    for entity_type in EntityType::ALL {
        if let Some(cursor) = store.get_cursor(entity_type).await? {
            cursors.push(cursor);
        }
    }

    let mut cached_entities = BTreeMap::new();
    for table in CacheTable::ALL {
        cached_entities.insert(table.to_string(), store.get_all(table).await?.len());
    }

    Ok(LocalStatus {
        db_path: context.db_path.display().to_string(),
        pending_changes: queue.len().await?,
        dead_letters: queue.dead_letters().await?.len(),
        cursors,
        cached_entities,
        remote: None,
    })
}

pub fn format_status_lines(status: &LocalStatus) -> Vec<String> {
    let mut lines = vec![
        format!("Store: {}", status.db_path),
        format!("Pending changes: {}", status.pending_changes),
        format!("Quarantined: {}", status.dead_letters),
    ];

    if status.cursors.is_empty() {
        lines.push("Cursors: never synced".to_string());
    } else {
        lines.push("Cursors:".to_string());
        for cursor in &status.cursors {
            let synced_at = cursor
                .last_sync_at
                .map_or_else(|| "never".to_string(), format_sync_timestamp);
            lines.push(format!(
                "  {:<10} version {}  ({synced_at})",
                cursor.entity_type, cursor.last_sync_version
            ));
        }
    }

    lines.push("Cached:".to_string());
    for (table, count) in &status.cached_entities {
        lines.push(format!("  {table:<12} {count}"));
    }

    if let Some(remote) = &status.remote {
        lines.push(format!(
            "Server: last sync {} ({}), {} pending action(s)",
            remote.last_sync_at.as_deref().unwrap_or("never"),
            remote.last_sync_status.as_deref().unwrap_or("unknown"),
            remote.pending_actions,
        ));
        for error in &remote.sync_errors {
            lines.push(format!("  error: {error}"));
        }
    }

    lines
}
