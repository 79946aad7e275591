//! Ward CLI - ward command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;
mod util;

/// Ward - all-or-nothing file edits with checkpoints and leases
#[derive(Parser)]
#[command(name = "ward")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Coordinator directory (relative paths resolve against the cwd)
    #[arg(long, global = true, default_value = coordinator::DEFAULT_ROOT)]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the coordinator directory and a default ward.toml
    Init,
    /// Show checkpoint, transaction and lock counts
    Status {
        /// Print the raw status report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Back up files into a new checkpoint
    Checkpoint {
        /// What the checkpoint protects
        description: String,
        /// Files to back up
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Restore every file of a checkpoint
    Rollback {
        /// Checkpoint ID
        id: u64,
    },
    /// Mark a checkpoint as successful
    Mark {
        /// Checkpoint ID
        id: u64,
    },
    /// Compare current files against a checkpoint
    Verify {
        /// Checkpoint ID
        id: u64,
    },
    /// List checkpoints
    List,
    /// Remove old terminal records and expired locks
    Gc {
        /// Override the configured retention window
        #[arg(long)]
        max_age_hours: Option<u64>,
        /// Print the raw cleanup report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a shell command atomically over a set of files
    Run {
        /// File the command may modify (repeatable)
        #[arg(long = "path", required = true)]
        paths: Vec<PathBuf>,
        /// Description recorded on the checkpoint (default: the command line)
        #[arg(short, long)]
        description: Option<String>,
        /// Total attempts (default: from ward.toml)
        #[arg(long)]
        retries: Option<u32>,
        /// Lease time-to-live in milliseconds (default: from ward.toml)
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Command and arguments, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so JSON output stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.root;

    match cli.command {
        Commands::Init => cmd::init::run(&root).await,
        Commands::Status { json } => cmd::status::run(&root, json).await,
        Commands::Checkpoint { description, paths } => {
            cmd::checkpoint::run(&root, &description, &paths).await
        }
        Commands::Rollback { id } => cmd::rollback::run(&root, id).await,
        Commands::Mark { id } => cmd::mark::run(&root, id).await,
        Commands::Verify { id } => cmd::verify::run(&root, id).await,
        Commands::List => cmd::list::run(&root).await,
        Commands::Gc { max_age_hours, json } => cmd::gc::run(&root, max_age_hours, json).await,
        Commands::Run {
            paths,
            description,
            retries,
            timeout_ms,
            command,
        } => cmd::run::run(&root, &paths, description, retries, timeout_ms, &command).await,
    }
}
