use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use medtrack_core::{CacheTable, ConflictResolution, QueueAction};

#[derive(Parser)]
#[command(name = "medtrack")]
#[command(about = "Offline-first inventory sync from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local store file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Inventory API base URL (overrides config and MEDTRACK_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Treat the server as unreachable
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a mutation in the offline queue
    Enqueue {
        /// Local action
        #[arg(value_enum)]
        action: ActionArg,
        /// Entity type (item, stock, checkout, pick_list)
        entity_type: String,
        /// Entity id
        entity_id: String,
        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// List queued mutations
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push queued mutations and pull server changes
    Sync {
        /// Settle every reported conflict with this strategy
        #[arg(long, value_enum)]
        resolve: Option<ResolutionArg>,
        /// Output the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset cursors, clear the local cache, and sync from scratch
    FullSync,
    /// Show local sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Include the server's view of this client
        #[arg(long)]
        remote: bool,
    },
    /// Show cached entities of one table
    Cache {
        /// items, stock_levels, checkouts or pick_lists
        #[arg(value_parser = parse_cache_table)]
        table: CacheTable,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List quarantined mutations
    DeadLetters {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move mutations that exhausted their retries out of the queue
    Quarantine {
        /// Retry count at which an item is quarantined
        #[arg(long, default_value = "5")]
        max_retries: u32,
    },
    /// Put a quarantined mutation back in the queue
    Requeue {
        /// Queue item id
        id: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ActionArg {
    Create,
    Update,
    Delete,
    StockAdjust,
    Checkout,
    Checkin,
    PickItem,
}

impl From<ActionArg> for QueueAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Create => Self::Create,
            ActionArg::Update => Self::Update,
            ActionArg::Delete => Self::Delete,
            ActionArg::StockAdjust => Self::StockAdjust,
            ActionArg::Checkout => Self::Checkout,
            ActionArg::Checkin => Self::Checkin,
            ActionArg::PickItem => Self::PickItem,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolutionArg {
    ClientWins,
    ServerWins,
}

impl From<ResolutionArg> for ConflictResolution {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::ClientWins => Self::ClientWins,
            ResolutionArg::ServerWins => Self::ServerWins,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn parse_cache_table(value: &str) -> Result<CacheTable, String> {
    value.parse().map_err(|error: medtrack_core::Error| error.to_string())
}
