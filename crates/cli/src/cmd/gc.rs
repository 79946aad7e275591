//! Run garbage collection

use crate::util;
use anyhow::Result;
use coordinator::CleanupOutcome;
use owo_colors::OwoColorize;
use std::path::Path;
use std::time::Duration;

pub async fn run(root: &Path, max_age_hours: Option<u64>, json: bool) -> Result<()> {
    // 1. Open coordinator
    let coordinator = util::open_coordinator(root)?;

    // 2. Run cleanup; ACTIVE records are always kept
    let max_age = max_age_hours.map(|hours| Duration::from_secs(hours * 60 * 60));
    let outcome = coordinator.cleanup(max_age).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    let report = match outcome {
        CleanupOutcome::Ok(report) => report,
        CleanupOutcome::Failed { error } => anyhow::bail!("Cleanup failed: {}", error),
    };
    if json {
        return Ok(());
    }

    // 3. Display results
    println!("{}", "GC Complete".green().bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    if report.checkpoints_removed == 0
        && report.transactions_removed == 0
        && report.locks_removed == 0
    {
        println!("{}", "No garbage found - coordinator is already clean".dimmed());
    } else {
        println!("Checkpoints removed:  {}", report.checkpoints_removed.to_string().yellow());
        println!("Transactions removed: {}", report.transactions_removed.to_string().yellow());
        println!("Lock records removed: {}", report.locks_removed.to_string().yellow());
    }

    Ok(())
}
