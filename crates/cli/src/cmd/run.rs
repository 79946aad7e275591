//! Run an external command atomically
//!
//! The command runs inside `execute_atomic`: the listed files are locked and
//! checkpointed first, and a non-zero exit restores them before the next
//! attempt.

use crate::util;
use anyhow::{Context, Result};
use coordinator::AtomicOptions;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub async fn run(
    root: &Path,
    paths: &[PathBuf],
    description: Option<String>,
    retries: Option<u32>,
    timeout_ms: Option<u64>,
    command: &[String],
) -> Result<()> {
    let (program, args) = command
        .split_first()
        .context("No command given after '--'")?;
    let command_line = command.join(" ");

    // 1. Open coordinator
    let coordinator = util::open_coordinator(root)?;

    // 2. Build options; unset values fall back to ward.toml
    let mut options =
        AtomicOptions::new(description.unwrap_or_else(|| command_line.clone()), paths);
    if let Some(retries) = retries {
        options = options.with_retries(retries);
    }
    if let Some(timeout_ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(timeout_ms));
    }

    // 3. Execute
    let outcome = coordinator
        .execute_atomic(options, |ctx| {
            let paths = paths.to_vec();
            let command_line = command_line.clone();
            let mut child = Command::new(program);
            child.args(args);
            async move {
                debug!("Attempt {}: running '{}'", ctx.attempt, command_line);
                for path in &paths {
                    ctx.log_operation("run", path, None, Some(&command_line))
                        .await;
                }

                let status = child
                    .status()
                    .await
                    .with_context(|| format!("Failed to spawn '{}'", command_line))?;
                if !status.success() {
                    anyhow::bail!("'{}' exited with {}", command_line, status);
                }
                Ok(())
            }
        })
        .await
        .context("Atomic run failed; files were restored")?;

    // 4. Report
    println!("{}", "Run committed".green().bold());
    println!("  Checkpoint:  {}", outcome.checkpoint_id.to_string().yellow());
    println!("  Transaction: {}", outcome.transaction_id);
    println!("  Attempt:     {}", outcome.attempt);

    Ok(())
}
