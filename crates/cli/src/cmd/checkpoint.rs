//! Create a checkpoint manually

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

pub async fn run(root: &Path, description: &str, paths: &[PathBuf]) -> Result<()> {
    let coordinator = util::open_coordinator(root)?;

    let created = coordinator
        .create_checkpoint(description, paths)
        .await
        .context("Failed to create checkpoint")?;

    println!(
        "{} checkpoint {}",
        "Created".green().bold(),
        created.checkpoint_id.to_string().yellow()
    );
    println!("  Description: {}", description);
    println!("  Backed up:   {} of {} files", created.files_backed_up, paths.len());

    Ok(())
}
