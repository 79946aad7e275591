//! Mark a checkpoint successful

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(root: &Path, id: u64) -> Result<()> {
    let coordinator = util::open_coordinator(root)?;

    coordinator
        .mark_checkpoint_successful(id)
        .await
        .with_context(|| format!("Failed to mark checkpoint {}", id))?;

    println!("Checkpoint {} marked {}", id.to_string().yellow(), "SUCCESSFUL".green());
    Ok(())
}
