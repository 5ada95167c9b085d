use medtrack_core::{CycleOutcome, HttpTransport, SyncEngine, SyncReport};
use serde::Serialize;

use crate::cli::ResolutionArg;
use crate::commands::common::{format_conflict_lines, format_report_summary, Context};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncOutput<'a> {
    report: &'a SyncReport,
    resolved: usize,
    status: medtrack_core::SyncStatus,
}

pub async fn run_sync(
    context: &Context,
    resolve: Option<ResolutionArg>,
    as_json: bool,
) -> Result<(), CliError> {
    let engine = context.engine().await?;
    let report = match engine.run_sync().await {
        Ok(CycleOutcome::Completed(report)) => report,
        Ok(CycleOutcome::Offline) => return Err(CliError::Unreachable(engine.queue().pending())),
        Ok(CycleOutcome::AlreadyRunning) => {
            return Err(CliError::SyncFailed("another sync is in progress".to_string()));
        }
        Err(error) => return Err(CliError::SyncFailed(error.to_string())),
    };

    let resolved = match resolve {
        Some(resolution) => resolve_all(&engine, &report, resolution).await?,
        None => 0,
    };

    print_outcome(&engine, &report, resolved, as_json)
}

pub async fn run_full_sync(context: &Context) -> Result<(), CliError> {
    let engine = context.engine().await?;
    let report = engine.force_full_sync().await.map_err(|error| match error {
        medtrack_core::Error::Offline => CliError::Unreachable(engine.queue().pending()),
        other => CliError::SyncFailed(other.to_string()),
    })?;

    print_outcome(&engine, &report, 0, false)
}

async fn resolve_all(
    engine: &SyncEngine<HttpTransport>,
    report: &SyncReport,
    resolution: ResolutionArg,
) -> Result<usize, CliError> {
    for conflict in &report.conflicts {
        engine
            .resolve_conflict(conflict, resolution.into(), None)
            .await?;
    }
    Ok(report.conflicts.len())
}

fn print_outcome(
    engine: &SyncEngine<HttpTransport>,
    report: &SyncReport,
    resolved: usize,
    as_json: bool,
) -> Result<(), CliError> {
    if as_json {
        let output = SyncOutput {
            report,
            resolved,
            status: engine.status(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", format_report_summary(report));
    for line in format_conflict_lines(&report.conflicts) {
        println!("{line}");
    }
    if resolved > 0 {
        println!("Resolved {resolved} conflict(s).");
    }
    println!("{} change(s) still queued.", engine.queue().pending());
    Ok(())
}
