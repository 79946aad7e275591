//! Checkpoint store: point-in-time backups of file content and metadata

use crate::ledger::{Ledger, LedgerAction, LedgerEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use ulid::Ulid;
use ward_core::encoding::base64_bytes;
use ward_core::store::{list_records, read_stable, remove_if_exists};
use ward_core::{hash_bytes, now_ms, read_json, Digest, Result, Store, WardError};

/// Read attempts before a file that keeps changing is reported as an I/O failure
const STABLE_READ_RETRIES: u8 = 3;

/// Lifecycle state of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointState {
    Active,
    Successful,
    RolledBack,
}

impl std::fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointState::Active => write!(f, "ACTIVE"),
            CheckpointState::Successful => write!(f, "SUCCESSFUL"),
            CheckpointState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// Metadata captured alongside a backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
    /// Modification time (unix ms), if the platform reports one
    pub modified_ms: Option<u64>,
    /// Unix mode bits, or 0o444/0o644 for read-only/writable elsewhere
    pub permissions: u32,
    pub digest: Digest,
}

/// Verbatim copy of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBackup {
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub metadata: FileMetadata,
}

/// A checkpoint record. Backups are never modified after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: u64,
    pub description: String,
    pub created_at: u64,
    pub updated_at: u64,
    /// Every resolved path in scope
    pub files: Vec<PathBuf>,
    pub backups: BTreeMap<PathBuf, FileBackup>,
    /// Paths in scope that did not exist when the checkpoint was taken
    #[serde(default)]
    pub absent: Vec<PathBuf>,
    pub state: CheckpointState,
}

impl Checkpoint {
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            id: self.id,
            description: self.description.clone(),
            created_at: self.created_at,
            state: self.state,
            files_backed_up: self.backups.len(),
        }
    }
}

/// Checkpoint without its backup payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: u64,
    pub description: String,
    pub created_at: u64,
    pub state: CheckpointState,
    pub files_backed_up: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointCreated {
    pub checkpoint_id: u64,
    pub files_backed_up: usize,
}

/// Outcome of restoring a checkpoint
///
/// Metadata restoration is best effort; its failures land in `warnings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub checkpoint_id: u64,
    pub files_restored: usize,
    /// Files created after the checkpoint that were deleted again
    pub files_removed: usize,
    pub warnings: Vec<String>,
}

/// Comparison of the current files against a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub checkpoint_id: u64,
    pub unchanged: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
    /// Paths absent at checkpoint time that exist now
    pub created: Vec<PathBuf>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.missing.is_empty() && self.created.is_empty()
    }
}

#[derive(Clone)]
pub struct CheckpointStore {
    store: Store,
    ledger: Arc<Ledger>,
}

impl CheckpointStore {
    pub fn new(store: Store, ledger: Arc<Ledger>) -> Self {
        Self { store, ledger }
    }

    /// Back up every existing file in `paths`; missing files are skipped
    pub async fn create_checkpoint<P: AsRef<Path>>(
        &self,
        description: &str,
        paths: &[P],
    ) -> Result<CheckpointCreated> {
        let files = self.store.resolve_all(paths);

        // 1. Read content first so a failing read never burns an id
        let mut backups = BTreeMap::new();
        let mut absent = Vec::new();
        for path in &files {
            match read_stable(path, STABLE_READ_RETRIES).await? {
                Some((content, meta)) => {
                    let metadata = FileMetadata {
                        size: meta.len(),
                        modified_ms: modified_ms(&meta),
                        permissions: permission_bits(&meta),
                        digest: hash_bytes(&content),
                    };
                    backups.insert(path.clone(), FileBackup { content, metadata });
                }
                None => {
                    debug!("Skipping backup of missing file {}", path.display());
                    absent.push(path.clone());
                }
            }
        }

        // 2. Persist under a fresh id
        let id = self.ledger.allocate_checkpoint_id().await?;
        let now = now_ms();
        let checkpoint = Checkpoint {
            id,
            description: description.to_string(),
            created_at: now,
            updated_at: now,
            files,
            backups,
            absent,
            state: CheckpointState::Active,
        };
        self.store
            .write_json(&self.store.checkpoint_path(id), &checkpoint)
            .await?;

        // 3. Record in the ledger
        self.ledger
            .record_checkpoint(LedgerEvent::new(
                LedgerAction::Created,
                id,
                description,
                CheckpointState::Active,
            ))
            .await?;

        info!(
            "Created checkpoint {} ({} files backed up)",
            id,
            checkpoint.backups.len()
        );

        Ok(CheckpointCreated {
            checkpoint_id: id,
            files_backed_up: checkpoint.backups.len(),
        })
    }

    /// Load a checkpoint, failing with a validation error if unknown
    pub async fn get_checkpoint(&self, id: u64) -> Result<Checkpoint> {
        read_json(&self.store.checkpoint_path(id))
            .await?
            .ok_or_else(|| WardError::Validation(format!("checkpoint {id} not found")))
    }

    /// Summaries of every stored checkpoint, oldest first
    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointSummary>> {
        let mut summaries = Vec::new();
        for path in self.record_paths().await? {
            match read_json::<Checkpoint>(&path).await {
                Ok(Some(checkpoint)) => summaries.push(checkpoint.summary()),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable checkpoint record: {}", e),
            }
        }
        summaries.sort_by_key(|s| s.id);
        Ok(summaries)
    }

    /// Restore every backed-up file, then mark the checkpoint ROLLED_BACK
    ///
    /// Content restoration is binding: any file that cannot be written (or a
    /// newly created file that cannot be removed) fails the rollback after all
    /// other files have been attempted. Metadata failures only add warnings.
    pub async fn rollback_to_checkpoint(&self, id: u64) -> Result<RollbackReport> {
        let checkpoint = self.get_checkpoint(id).await?;
        let mut report = RollbackReport {
            checkpoint_id: id,
            ..Default::default()
        };
        let mut failures = Vec::new();

        for (path, backup) in &checkpoint.backups {
            match restore_content(path, backup).await {
                Ok(warnings) => {
                    report.files_restored += 1;
                    report.warnings.extend(warnings);
                }
                Err(e) => failures.push(e.to_string()),
            }
        }

        for path in &checkpoint.absent {
            match remove_if_exists(path).await {
                Ok(true) => report.files_removed += 1,
                Ok(false) => {}
                Err(e) => failures.push(e.to_string()),
            }
        }

        for warning in &report.warnings {
            warn!("Checkpoint {} rollback: {}", id, warning);
        }

        if !failures.is_empty() {
            return Err(WardError::Rollback(format!(
                "checkpoint {id}: {}",
                failures.join("; ")
            )));
        }

        self.set_state(checkpoint, CheckpointState::RolledBack, LedgerAction::RolledBack)
            .await?;

        info!(
            "Rolled back to checkpoint {} ({} restored, {} removed)",
            id, report.files_restored, report.files_removed
        );
        Ok(report)
    }

    pub async fn mark_checkpoint_successful(&self, id: u64) -> Result<()> {
        let checkpoint = self.get_checkpoint(id).await?;
        self.set_state(checkpoint, CheckpointState::Successful, LedgerAction::Successful)
            .await
    }

    /// Compare current file content against the backups
    pub async fn verify_checkpoint(&self, id: u64) -> Result<VerifyReport> {
        let checkpoint = self.get_checkpoint(id).await?;
        let mut report = VerifyReport {
            checkpoint_id: id,
            ..Default::default()
        };

        for (path, backup) in &checkpoint.backups {
            match read_stable(path, STABLE_READ_RETRIES).await? {
                Some((content, _)) if hash_bytes(&content) == backup.metadata.digest => {
                    report.unchanged.push(path.clone())
                }
                Some(_) => report.modified.push(path.clone()),
                None => report.missing.push(path.clone()),
            }
        }

        for path in &checkpoint.absent {
            if tokio::fs::try_exists(path)
                .await
                .map_err(|e| WardError::io(path, e))?
            {
                report.created.push(path.clone());
            }
        }

        Ok(report)
    }

    /// Remove a checkpoint record and log the deletion
    pub async fn delete_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let removed = remove_if_exists(&self.store.checkpoint_path(checkpoint.id)).await?;
        if removed {
            self.ledger
                .record_checkpoint(LedgerEvent::new(
                    LedgerAction::Deleted,
                    checkpoint.id,
                    &checkpoint.description,
                    checkpoint.state,
                ))
                .await?;
        }
        Ok(removed)
    }

    /// Paths of every checkpoint record (the ledger file excluded)
    pub async fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let ledger = self.store.ledger_path();
        Ok(list_records(&self.store.checkpoints_dir(), "checkpoint-", ".json")
            .await?
            .into_iter()
            .filter(|p| *p != ledger)
            .collect())
    }

    async fn set_state(
        &self,
        mut checkpoint: Checkpoint,
        state: CheckpointState,
        action: LedgerAction,
    ) -> Result<()> {
        checkpoint.state = state;
        checkpoint.updated_at = now_ms();
        self.store
            .write_json(&self.store.checkpoint_path(checkpoint.id), &checkpoint)
            .await?;
        self.ledger
            .record_checkpoint(LedgerEvent::new(
                action,
                checkpoint.id,
                &checkpoint.description,
                state,
            ))
            .await
    }
}

/// Replace `path` with the backed-up bytes via a sibling temp file and rename
///
/// The original stays intact until the rename, and a read-only original is
/// replaced rather than opened for writing. Metadata is applied to the temp
/// file first; its failures come back as warnings.
async fn restore_content(path: &Path, backup: &FileBackup) -> Result<Vec<String>> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| WardError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staged = parent.join(format!(".{}.{}.restore", file_name, Ulid::new()));

    let result = stage_and_replace(&staged, path, backup).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&staged).await;
    }
    result
}

async fn stage_and_replace(staged: &Path, path: &Path, backup: &FileBackup) -> Result<Vec<String>> {
    let mut file = tokio::fs::File::create(staged)
        .await
        .map_err(|e| WardError::io(staged, e))?;
    file.write_all(&backup.content)
        .await
        .map_err(|e| WardError::io(staged, e))?;
    file.sync_all().await.map_err(|e| WardError::io(staged, e))?;
    drop(file);

    let warnings = restore_metadata(staged, path, &backup.metadata).await;

    tokio::fs::rename(staged, path)
        .await
        .map_err(|e| WardError::io(path, e))?;
    Ok(warnings)
}

/// Best-effort permission and mtime restore on `path`; returns warnings
/// naming `shown` instead
async fn restore_metadata(path: &Path, shown: &Path, metadata: &FileMetadata) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Err(e) = restore_permissions(path, metadata.permissions).await {
        warnings.push(format!("permissions of {}: {}", shown.display(), e));
    }

    if let Some(ms) = metadata.modified_ms {
        let mtime = filetime::FileTime::from_unix_time(
            (ms / 1000) as i64,
            ((ms % 1000) * 1_000_000) as u32,
        );
        if let Err(e) = filetime::set_file_mtime(path, mtime) {
            warnings.push(format!("modification time of {}: {}", shown.display(), e));
        }
    }

    warnings
}

fn modified_ms(meta: &std::fs::Metadata) -> Option<u64> {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
async fn restore_permissions(path: &Path, bits: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(bits)).await
}

#[cfg(not(unix))]
async fn restore_permissions(path: &Path, bits: u32) -> std::io::Result<()> {
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_readonly(bits & 0o200 == 0);
    tokio::fs::set_permissions(path, perms).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, CheckpointStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::new(".ward", temp_dir.path());
        store.init().await.unwrap();
        let ledger = Arc::new(Ledger::new(store.clone()));
        ledger.init().await.unwrap();
        (temp_dir, CheckpointStore::new(store, ledger))
    }

    #[tokio::test]
    async fn test_create_then_rollback_restores_bytes() {
        let (temp_dir, checkpoints) = setup().await;
        let a = temp_dir.path().join("a.md");
        let b = temp_dir.path().join("nested/b.bin");
        fs::create_dir_all(b.parent().unwrap()).unwrap();
        fs::write(&a, b"alpha").unwrap();
        fs::write(&b, [0u8, 1, 2, 255]).unwrap();

        let created = checkpoints
            .create_checkpoint("before edit", &[&a, &b])
            .await
            .unwrap();
        assert_eq!(created.files_backed_up, 2);

        fs::write(&a, b"mangled").unwrap();
        fs::remove_file(&b).unwrap();

        let report = checkpoints
            .rollback_to_checkpoint(created.checkpoint_id)
            .await
            .unwrap();
        assert_eq!(report.files_restored, 2);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(fs::read(&a).unwrap(), b"alpha");
        assert_eq!(fs::read(&b).unwrap(), vec![0u8, 1, 2, 255]);

        let checkpoint = checkpoints
            .get_checkpoint(created.checkpoint_id)
            .await
            .unwrap();
        assert_eq!(checkpoint.state, CheckpointState::RolledBack);
    }

    #[tokio::test]
    async fn test_missing_files_are_skipped_and_removed_on_rollback() {
        let (temp_dir, checkpoints) = setup().await;
        let existing = temp_dir.path().join("existing.md");
        let fresh = temp_dir.path().join("fresh.md");
        fs::write(&existing, b"here").unwrap();

        let created = checkpoints
            .create_checkpoint("new file", &[&existing, &fresh])
            .await
            .unwrap();
        assert_eq!(created.files_backed_up, 1);

        fs::write(&fresh, b"created later").unwrap();
        let report = checkpoints
            .rollback_to_checkpoint(created.checkpoint_id)
            .await
            .unwrap();

        assert_eq!(report.files_removed, 1);
        assert!(!fresh.exists());
        assert_eq!(fs::read(&existing).unwrap(), b"here");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rollback_restores_permissions_and_mtime() {
        use std::os::unix::fs::PermissionsExt;

        let (temp_dir, checkpoints) = setup().await;
        let path = temp_dir.path().join("script.sh");
        fs::write(&path, b"#!/bin/sh").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o750)).unwrap();
        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old)).unwrap();
        let original_mtime = fs::metadata(&path).unwrap().modified().unwrap();

        let created = checkpoints.create_checkpoint("perms", &[&path]).await.unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        fs::write(&path, b"echo changed").unwrap();

        checkpoints
            .rollback_to_checkpoint(created.checkpoint_id)
            .await
            .unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o750);
        let restored = meta.modified().unwrap();
        let drift = original_mtime
            .duration_since(restored)
            .unwrap_or_else(|e| e.duration());
        assert!(drift < std::time::Duration::from_millis(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rollback_replaces_read_only_file() {
        use std::os::unix::fs::PermissionsExt;

        let (temp_dir, checkpoints) = setup().await;
        let path = temp_dir.path().join("frozen.md");
        fs::write(&path, b"frozen").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).unwrap();

        let created = checkpoints.create_checkpoint("frozen", &[&path]).await.unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        fs::write(&path, b"thawed").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).unwrap();

        let report = checkpoints
            .rollback_to_checkpoint(created.checkpoint_id)
            .await
            .unwrap();

        assert_eq!(report.files_restored, 1);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(fs::read(&path).unwrap(), b"frozen");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o444);

        // no staged files left next to the restored one
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".restore"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_failures_become_warnings() {
        let temp_dir = TempDir::new().unwrap();
        let vanished = temp_dir.path().join("vanished.md");
        let shown = temp_dir.path().join("shown.md");
        let metadata = FileMetadata {
            size: 0,
            modified_ms: Some(1_700_000_000_000),
            permissions: 0o644,
            digest: hash_bytes(b""),
        };

        let warnings = restore_metadata(&vanished, &shown, &metadata).await;

        assert_eq!(warnings.len(), 2, "{warnings:?}");
        assert!(warnings[0].starts_with("permissions of"));
        assert!(warnings[1].starts_with("modification time of"));
        assert!(warnings.iter().all(|w| w.contains("shown.md")));
    }

    #[tokio::test]
    async fn test_failed_restore_leaves_original_and_no_staged_file() {
        let (temp_dir, _checkpoints) = setup().await;
        let path = temp_dir.path().join("target");
        // a directory cannot be replaced by the staged file
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inner.md"), b"kept").unwrap();
        let backup = FileBackup {
            content: b"bytes".to_vec(),
            metadata: FileMetadata {
                size: 5,
                modified_ms: None,
                permissions: 0o644,
                digest: hash_bytes(b"bytes"),
            },
        };

        assert!(restore_content(&path, &backup).await.is_err());
        assert_eq!(fs::read(path.join("inner.md")).unwrap(), b"kept");
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".restore"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_checkpoint_is_validation_failure() {
        let (_temp_dir, checkpoints) = setup().await;

        let err = checkpoints.rollback_to_checkpoint(99).await.unwrap_err();
        assert!(matches!(err, WardError::Validation(_)));
        let err = checkpoints.mark_checkpoint_successful(99).await.unwrap_err();
        assert!(matches!(err, WardError::Validation(_)));
    }

    #[tokio::test]
    async fn test_mark_successful_keeps_backups() {
        let (temp_dir, checkpoints) = setup().await;
        let path = temp_dir.path().join("doc.md");
        fs::write(&path, b"v1").unwrap();

        let created = checkpoints.create_checkpoint("ok", &[&path]).await.unwrap();
        let before = checkpoints.get_checkpoint(created.checkpoint_id).await.unwrap();
        checkpoints
            .mark_checkpoint_successful(created.checkpoint_id)
            .await
            .unwrap();
        let after = checkpoints.get_checkpoint(created.checkpoint_id).await.unwrap();

        assert_eq!(after.state, CheckpointState::Successful);
        assert_eq!(after.backups, before.backups);
    }

    #[tokio::test]
    async fn test_verify_reports_drift() {
        let (temp_dir, checkpoints) = setup().await;
        let same = temp_dir.path().join("same.md");
        let changed = temp_dir.path().join("changed.md");
        let gone = temp_dir.path().join("gone.md");
        let born = temp_dir.path().join("born.md");
        for path in [&same, &changed, &gone] {
            fs::write(path, b"original").unwrap();
        }

        let created = checkpoints
            .create_checkpoint("verify", &[&same, &changed, &gone, &born])
            .await
            .unwrap();
        fs::write(&changed, b"edited").unwrap();
        fs::remove_file(&gone).unwrap();
        fs::write(&born, b"new").unwrap();

        let report = checkpoints.verify_checkpoint(created.checkpoint_id).await.unwrap();
        assert_eq!(report.unchanged, vec![same]);
        assert_eq!(report.modified, vec![changed]);
        assert_eq!(report.missing, vec![gone]);
        assert_eq!(report.created, vec![born]);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_list_and_ledger_events() {
        let (temp_dir, checkpoints) = setup().await;
        let path = temp_dir.path().join("doc.md");
        fs::write(&path, b"v1").unwrap();

        let first = checkpoints.create_checkpoint("one", &[&path]).await.unwrap();
        let second = checkpoints.create_checkpoint("two", &[&path]).await.unwrap();
        assert_eq!(second.checkpoint_id, first.checkpoint_id + 1);

        let listed = checkpoints.list_checkpoints().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].description, "one");
        assert_eq!(listed[1].state, CheckpointState::Active);

        let doc = checkpoints.ledger.snapshot().await.unwrap();
        assert_eq!(doc.last_checkpoint_id, 2);
        assert_eq!(doc.checkpoints_created(), 2);
    }
}
