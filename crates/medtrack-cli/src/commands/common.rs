use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use medtrack_core::util::normalize_text_option;
use medtrack_core::{
    CachedEntity, ConnectivityMonitor, DeadLetter, HttpTransport, LocalStore, OfflineQueue,
    OfflineQueueItem, SyncConfig, SyncConflict, SyncEngine, SyncReport,
};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::CliError;

const PREVIEW_CHARS: usize = 60;

/// Settings resolved from flags, environment, and the config file
#[derive(Debug, Clone)]
pub struct Context {
    pub db_path: PathBuf,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    pub offline: bool,
}

impl Context {
    pub fn resolve(
        cli_db_path: Option<PathBuf>,
        cli_api_url: Option<String>,
        offline: bool,
        config: ClientConfig,
    ) -> Self {
        Self {
            db_path: cli_db_path
                .or(config.db_path)
                .unwrap_or_else(default_db_path),
            api_url: normalize_text_option(cli_api_url).or(config.api_url),
            api_token: config.api_token,
            request_timeout: config
                .request_timeout_secs
                .map_or(medtrack_core::transport::DEFAULT_REQUEST_TIMEOUT, Duration::from_secs),
            offline,
        }
    }

    pub fn store(&self) -> LocalStore {
        LocalStore::at_path(&self.db_path)
    }

    pub fn queue(&self) -> OfflineQueue {
        OfflineQueue::new(self.store())
    }

    pub fn transport(&self) -> Result<HttpTransport, CliError> {
        let api_url = self.api_url.as_deref().ok_or(CliError::SyncNotConfigured)?;
        Ok(HttpTransport::with_timeout(api_url, self.request_timeout)?
            .with_token(self.api_token.clone()))
    }

    /// Sync engine whose connectivity comes from probing the server
    pub async fn engine(&self) -> Result<SyncEngine<HttpTransport>, CliError> {
        let transport = self.transport()?;
        let connectivity = ConnectivityMonitor::new(false);
        if !self.offline {
            connectivity.poll(&transport).await;
        }
        tracing::debug!(online = connectivity.is_online(), "Probed sync server");

        let queue = self.queue();
        queue.refresh().await?;
        Ok(SyncEngine::new(
            queue,
            connectivity,
            transport,
            SyncConfig::default().without_auto_sync(),
        ))
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("medtrack")
        .join("medtrack.db")
}

pub fn parse_payload(raw: &str) -> Result<Value, CliError> {
    let payload: Value =
        serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    if payload.is_object() {
        Ok(payload)
    } else {
        Err(CliError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        ))
    }
}

pub fn normalize_item_id(id: &str) -> Result<String, CliError> {
    let id = id.trim();
    if id.is_empty() {
        Err(CliError::EmptyItemId)
    } else {
        Ok(id.to_string())
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn preview(value: &Value, max_chars: usize) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() <= max_chars {
        return rendered;
    }
    let truncated: String = rendered.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{truncated}...")
}

pub fn format_queue_lines(items: &[OfflineQueueItem]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    items
        .iter()
        .map(|item| {
            let mut line = format!(
                "{}  {:<12} {}/{}  retries={}  {}",
                short_id(&item.id),
                item.action,
                item.entity_type,
                item.entity_id,
                item.retry_count,
                format_relative_time(item.timestamp, now_ms),
            );
            if let Some(error) = &item.last_error {
                line.push_str(&format!("  last_error={error}"));
            }
            line
        })
        .collect()
}

pub fn format_dead_letter_lines(letters: &[DeadLetter]) -> Vec<String> {
    letters
        .iter()
        .map(|letter| {
            format!(
                "{}  {} {}/{}  quarantined={}  reason={}",
                letter.item.id,
                letter.item.action,
                letter.item.entity_type,
                letter.item.entity_id,
                format_sync_timestamp(letter.quarantined_at),
                letter.reason,
            )
        })
        .collect()
}

pub fn format_cached_lines(entities: &[CachedEntity]) -> Vec<String> {
    entities
        .iter()
        .map(|entity| format!("{}  {}", entity.key, preview(&entity.data, PREVIEW_CHARS)))
        .collect()
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let mut line = format!(
                "conflict {}  {:?} {} {}",
                short_id(&conflict.action_id),
                conflict.conflict_type,
                conflict.entity_type,
                conflict.entity_id,
            );
            if let Some(server) = conflict.server_version {
                line.push_str(&format!("  server={server}"));
            }
            if let Some(client) = conflict.client_version {
                line.push_str(&format!("  client={client}"));
            }
            line
        })
        .collect()
}

pub fn format_report_summary(report: &SyncReport) -> String {
    format!(
        "Sync completed: pushed {} (accepted {}, conflicts {}, held back {}), pulled {} change(s) in {} round(s), deleted {}, ignored {}",
        report.pushed,
        report.accepted,
        report.conflicts.len(),
        report.skipped,
        report.applied,
        report.pull_rounds,
        report.deleted,
        report.ignored,
    )
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
