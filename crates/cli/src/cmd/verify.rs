//! Compare current files against a checkpoint

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

pub async fn run(root: &Path, id: u64) -> Result<()> {
    let coordinator = util::open_coordinator(root)?;

    let report = coordinator
        .verify_checkpoint(id)
        .await
        .with_context(|| format!("Failed to verify checkpoint {}", id))?;

    println!("{} {}", "Checkpoint".bold(), id.to_string().yellow());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Unchanged: {}", report.unchanged.len());
    print_paths("Modified", &report.modified);
    print_paths("Missing", &report.missing);
    print_paths("Created", &report.created);

    if !report.is_clean() {
        anyhow::bail!("Files differ from checkpoint {}", id);
    }
    println!("{}", "All files match".green());
    Ok(())
}

fn print_paths(label: &str, paths: &[PathBuf]) {
    if paths.is_empty() {
        return;
    }
    println!("{}: {}", label, paths.len().to_string().red());
    for path in paths {
        println!("  - {}", path.display());
    }
}
