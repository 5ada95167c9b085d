//! medtrack CLI - queue inventory mutations offline and sync them later

mod cli;
mod commands;
mod config;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::common::Context;
use crate::config::ClientConfig;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("medtrack=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load().map_err(CliError::Config)?;
    let context = Context::resolve(cli.db_path, cli.api_url, cli.offline, config);

    match cli.command {
        Commands::Enqueue {
            action,
            entity_type,
            entity_id,
            payload,
        } => {
            commands::queue::run_enqueue(&context, action.into(), &entity_type, &entity_id, &payload)
                .await?;
        }
        Commands::Queue { json } => commands::queue::run_queue(&context, json).await?,
        Commands::Sync { resolve, json } => {
            commands::sync::run_sync(&context, resolve, json).await?;
        }
        Commands::FullSync => commands::sync::run_full_sync(&context).await?,
        Commands::Status { json, remote } => {
            commands::status::run_status(&context, json, remote).await?;
        }
        Commands::Cache { table, json } => commands::cache::run_cache(&context, table, json).await?,
        Commands::DeadLetters { json } => {
            commands::queue::run_dead_letters(&context, json).await?;
        }
        Commands::Quarantine { max_retries } => {
            commands::queue::run_quarantine(&context, max_retries).await?;
        }
        Commands::Requeue { id } => commands::queue::run_requeue(&context, &id).await?,
        Commands::Completions { shell, output } => {
            commands::completions::run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
