//! On-disk layout and file helpers for coordinator records

use crate::error::{Result, WardError};
use crate::hash::PathKey;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use ulid::Ulid;

/// Name of the ledger file inside `checkpoints/`
pub const LEDGER_FILE: &str = "checkpoint-log.json";

/// Coordinator root directory
///
/// ```text
/// .ward/
///   ward.toml
///   checkpoints/
///     checkpoint-log.json
///     checkpoint-<id>.json
///   locks/
///     ledger.lock
///     lock-<leaseId>.json
///     file-<pathHash>.lock
///   transactions/
///     transaction-<id>.json
///   tmp/
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    /// Directory holding all coordinator records
    root: PathBuf,
    /// Directory relative file paths are resolved against
    base_dir: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let root = resolve_path(&base_dir, &root.into());
        Self { root, base_dir }
    }

    /// Create the directory tree. Safe to call repeatedly.
    pub async fn init(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.checkpoints_dir(),
            self.locks_dir(),
            self.transactions_dir(),
            self.tmp_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| WardError::io(&dir, e))?;
        }
        debug!("Store layout ready at {}", self.root.display());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn transactions_dir(&self) -> PathBuf {
        self.root.join("transactions")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.checkpoints_dir().join(LEDGER_FILE)
    }

    pub fn ledger_lock_path(&self) -> PathBuf {
        self.locks_dir().join("ledger.lock")
    }

    /// Guard held while lock records are removed or replaced
    pub fn reclaim_guard_path(&self) -> PathBuf {
        self.locks_dir().join("reclaim.guard")
    }

    pub fn checkpoint_path(&self, id: u64) -> PathBuf {
        self.checkpoints_dir().join(format!("checkpoint-{id}.json"))
    }

    pub fn transaction_path(&self, id: u64) -> PathBuf {
        self.transactions_dir().join(format!("transaction-{id}.json"))
    }

    pub fn lease_path(&self, lease_id: &str) -> PathBuf {
        self.locks_dir().join(format!("lock-{lease_id}.json"))
    }

    pub fn path_lock_path(&self, key: &PathKey) -> PathBuf {
        self.locks_dir().join(format!("file-{key}.lock"))
    }

    /// Resolve caller paths to sorted, deduplicated absolute paths
    pub fn resolve_all<P: AsRef<Path>>(&self, paths: &[P]) -> Vec<PathBuf> {
        let mut resolved: Vec<PathBuf> = paths
            .iter()
            .map(|p| resolve_path(&self.base_dir, p.as_ref()))
            .collect();
        resolved.sort();
        resolved.dedup();
        resolved
    }

    /// Serialize `value` and write it atomically to `target`
    pub async fn write_json<T: Serialize>(&self, target: &Path, value: &T) -> Result<()> {
        let data =
            serde_json::to_vec_pretty(value).map_err(|e| WardError::serialization(target, e))?;
        atomic_write(&self.tmp_dir(), target, &data).await
    }
}

/// Read and decode a JSON record; `None` if the file does not exist
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(WardError::io(path, e)),
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| WardError::serialization(path, e))
}

/// Atomic write helper
///
/// Writes data to a temporary file, fsyncs it, then renames it over the target.
pub async fn atomic_write(tmp_dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = tmp_dir.join(format!("{}.tmp", Ulid::new()));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| WardError::io(&tmp_path, e))?;
        file.write_all(data)
            .await
            .map_err(|e| WardError::io(&tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| WardError::io(&tmp_path, e))?;
        drop(file);

        tokio::fs::rename(&tmp_path, target)
            .await
            .map_err(|e| WardError::io(target, e))
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result
}

/// Remove a file, treating "already gone" as success. Returns whether it existed.
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(WardError::io(path, e)),
    }
}

/// List files in `dir` named `<prefix>…<suffix>`, sorted by name
pub async fn list_records(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(WardError::io(dir, e)),
    };

    let mut records = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| WardError::io(dir, e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(prefix) && name.ends_with(suffix) {
            records.push(entry.path());
        }
    }
    records.sort();
    Ok(records)
}

/// Read a file with stability verification (double-stat pattern)
///
/// Returns `None` if the file does not exist. Retries with backoff when size
/// or mtime change during the read.
pub async fn read_stable(path: &Path, max_retries: u8) -> Result<Option<(Vec<u8>, std::fs::Metadata)>> {
    for attempt in 0..max_retries {
        let before = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(WardError::io(path, e)),
        };
        if !before.is_file() {
            return Err(WardError::Validation(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| WardError::io(path, e))?;
        let after = tokio::fs::metadata(path)
            .await
            .map_err(|e| WardError::io(path, e))?;

        if before.len() == after.len() && before.modified().ok() == after.modified().ok() {
            return Ok(Some((data, after)));
        }

        debug!("{} changed while reading (attempt {})", path.display(), attempt + 1);
        if attempt + 1 < max_retries {
            tokio::time::sleep(Duration::from_millis(50 << attempt)).await;
        }
    }

    Err(WardError::io(
        path,
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("file changed during {max_retries} read attempts"),
        ),
    ))
}

/// Lexically resolve `path` against `base` into an absolute path
///
/// Does not touch the filesystem, so paths that do not exist yet resolve too.
/// `.` components are dropped and `..` pops the previous component.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    resolved
}

/// Current wall-clock time in unix milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
