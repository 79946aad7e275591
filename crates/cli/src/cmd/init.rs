//! Initialize a coordinator directory

use crate::util;
use anyhow::{Context, Result};
use coordinator::Coordinator;
use owo_colors::OwoColorize;
use std::path::Path;
use ward_core::config::CONFIG_FILE;
use ward_core::WardConfig;

pub async fn run(root: &Path) -> Result<()> {
    // 1. Resolve the root and create the layout
    let (root, cwd) = util::resolve_root(root)?;
    let coordinator = Coordinator::new(&root, cwd, WardConfig::default());
    coordinator
        .initialize()
        .await
        .context("Failed to initialize coordinator")?;

    // 2. Write a default config unless one exists
    let config_path = root.join(CONFIG_FILE);
    let wrote_config = if config_path.exists() {
        false
    } else {
        let raw = toml::to_string_pretty(&WardConfig::default())
            .context("Failed to render default config")?;
        tokio::fs::write(&config_path, raw)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        true
    };

    println!("{}", "Ward initialized".green().bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Root: {}", root.display().to_string().cyan());
    println!();
    println!("  - checkpoints/    (checkpoint records and ledger)");
    println!("  - transactions/   (transaction records)");
    println!("  - locks/          (lease and per-file lock records)");
    if wrote_config {
        println!("  - {}         (default configuration)", CONFIG_FILE);
    }
    println!();
    println!("Next steps:");
    println!("  - Run 'ward checkpoint <description> <paths..>' to back up files");
    println!("  - Run 'ward run --path <file> -- <command>' to edit atomically");

    Ok(())
}
