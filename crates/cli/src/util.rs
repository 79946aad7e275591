//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use coordinator::Coordinator;
use journal::{CheckpointState, RollbackReport};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

/// Resolve `--root` against the working directory
pub fn resolve_root(root: &Path) -> Result<(PathBuf, PathBuf)> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let root = ward_core::resolve_path(&cwd, root);
    Ok((root, cwd))
}

/// Open an initialized coordinator, reading its ward.toml
pub fn open_coordinator(root: &Path) -> Result<Coordinator> {
    let (root, cwd) = resolve_root(root)?;
    if !root.is_dir() {
        anyhow::bail!(
            "No coordinator at {} (run 'ward init' first)",
            root.display()
        );
    }

    Coordinator::open(&root, cwd)
        .with_context(|| format!("Failed to open coordinator at {}", root.display()))
}

/// Colored label for a checkpoint state
pub fn state_label(state: CheckpointState) -> String {
    match state {
        CheckpointState::Active => state.to_string().yellow().to_string(),
        CheckpointState::Successful => state.to_string().green().to_string(),
        CheckpointState::RolledBack => state.to_string().red().to_string(),
    }
}

pub fn print_rollback_report(report: &RollbackReport) {
    println!("Files restored: {}", report.files_restored.to_string().green());
    if report.files_removed > 0 {
        println!("Files removed:  {}", report.files_removed.to_string().yellow());
    }
    for warning in &report.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
}

/// Format timestamp as relative time ("2 hours ago")
pub fn format_relative_time(ts_ms: u64) -> String {
    let now = ward_core::now_ms();
    if ts_ms > now {
        return "in the future".to_string();
    }

    let seconds = (now - ts_ms) / 1000;
    if seconds < 60 {
        format!("{} seconds ago", seconds)
    } else if seconds < 3600 {
        format!("{} minutes ago", seconds / 60)
    } else if seconds < 86400 {
        format!("{} hours ago", seconds / 3600)
    } else if seconds < 604800 {
        format!("{} days ago", seconds / 86400)
    } else {
        format!("{} weeks ago", seconds / 604800)
    }
}

/// Shorten a description for one-line listings
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    short.push('…');
    short
}
