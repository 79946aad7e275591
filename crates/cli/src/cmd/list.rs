//! List checkpoints

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(root: &Path) -> Result<()> {
    let coordinator = util::open_coordinator(root)?;
    let checkpoints = coordinator.list_checkpoints().await?;

    if checkpoints.is_empty() {
        println!("{}", "No checkpoints yet".dimmed());
        return Ok(());
    }

    println!("{}", "Checkpoints".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for cp in &checkpoints {
        println!(
            "{:>5}  {:<22} {:>3} files  {}  {}",
            cp.id.to_string().yellow(),
            util::state_label(cp.state),
            cp.files_backed_up,
            util::format_relative_time(cp.created_at).dimmed(),
            util::truncate(&cp.description, 60)
        );
    }

    Ok(())
}
