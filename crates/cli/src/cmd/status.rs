//! Show coordinator status

use crate::util;
use anyhow::Result;
use coordinator::StatusReport;
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(root: &Path, json: bool) -> Result<()> {
    // 1. Open coordinator
    let coordinator = util::open_coordinator(root)?;

    // 2. Collect counts
    let report = coordinator.get_status().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        if let StatusReport::Failed { error } = &report {
            anyhow::bail!("Status unavailable: {}", error);
        }
        return Ok(());
    }

    let status = match report {
        StatusReport::Ok(status) => status,
        StatusReport::Failed { error } => anyhow::bail!("Status unavailable: {}", error),
    };

    // 3. Display output
    println!("{}", "Coordinator Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("Root:          {}", status.system.root.display().to_string().cyan());
    println!("Version:       {}", status.system.version);
    println!();

    println!("Checkpoints:");
    println!("  Created:     {}", status.checkpoints.total);
    println!("  Last ID:     {}", status.checkpoints.last_id);
    println!();

    println!("Transactions:");
    println!("  Started:     {}", status.transactions.total);
    println!("  Last ID:     {}", status.transactions.last_id);
    if status.transactions.active > 0 {
        println!("  Active:      {}", status.transactions.active.to_string().yellow());
    } else {
        println!("  Active:      0");
    }
    println!();

    print!("Locks:         ");
    if status.locks.active > 0 {
        println!("{}", format!("{} held", status.locks.active).yellow());
    } else {
        println!("{}", "none held".green());
    }

    if status.transactions.active > 0 {
        println!();
        println!(
            "{}",
            "Note: active transactions belong to running or interrupted operations.".dimmed()
        );
    }

    Ok(())
}
