//! Restore the files of a checkpoint

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(root: &Path, id: u64) -> Result<()> {
    let coordinator = util::open_coordinator(root)?;

    let report = coordinator
        .rollback_to_checkpoint(id)
        .await
        .with_context(|| format!("Failed to roll back checkpoint {}", id))?;

    println!(
        "{} to checkpoint {}",
        "Rolled back".green().bold(),
        id.to_string().yellow()
    );
    util::print_rollback_report(&report);

    Ok(())
}
