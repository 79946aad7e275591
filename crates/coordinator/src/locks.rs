//! Lease-based lock files over file paths
//!
//! A lease covers a set of paths. Each path gets a `file-<hash>.lock` record
//! pointing back at its lease; the lease itself lives in `lock-<id>.json`.
//! Records are published with a create-exclusive primitive (hard link of a
//! fully written temp file), so two acquirers can never both create the same
//! per-path record. Expiry is the only reclaim mechanism: an expired record is
//! assumed to belong to a dead process and is overwritten.
//!
//! Creating a record needs no coordination, but removing one does: every
//! removal (reclaim, release, sweep) re-reads the record while holding the
//! `locks/reclaim.guard` advisory lock, so a record published by a concurrent
//! winner is never deleted on the strength of a stale read.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use ulid::Ulid;
use ward_core::store::{list_records, remove_if_exists};
use ward_core::{now_ms, read_json, FileGuard, PathKey, Result, Store, WardError};

/// How long removals wait for the reclaim guard
const GUARD_WAIT: Duration = Duration::from_secs(10);

/// Observed lifecycle of a lease or per-path record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseState {
    Held,
    Expired,
}

/// `locks/lock-<leaseId>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub lease_id: String,
    pub paths: Vec<PathBuf>,
    pub path_keys: Vec<PathKey>,
    pub created_at: u64,
    pub expires_at: u64,
    pub pid: u32,
}

impl LeaseRecord {
    pub fn state(&self, now: u64) -> LeaseState {
        if now >= self.expires_at {
            LeaseState::Expired
        } else {
            LeaseState::Held
        }
    }
}

/// `locks/file-<pathHash>.lock`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathLockRecord {
    pub lease_id: String,
    pub path: PathBuf,
    pub acquired_at: u64,
    pub expires_at: u64,
    pub pid: u32,
}

impl PathLockRecord {
    pub fn state(&self, now: u64) -> LeaseState {
        if now >= self.expires_at {
            LeaseState::Expired
        } else {
            LeaseState::Held
        }
    }
}

#[derive(Clone)]
pub struct LockManager {
    store: Store,
}

impl LockManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Acquire one lease over every path, in sorted order
    ///
    /// `timeout` is both the lease time-to-live and the budget for the
    /// acquisition itself. Attempts never wait on a held lock: a live holder
    /// fails the call with `LockConflict` straight away.
    pub async fn acquire_locks<P: AsRef<Path>>(
        &self,
        paths: &[P],
        timeout: Duration,
    ) -> Result<String> {
        let started = Instant::now();
        let paths = self.store.resolve_all(paths);
        let lease_id = Ulid::new().to_string();
        let now = now_ms();
        let expires_at = now + timeout.as_millis() as u64;

        let mut acquired: Vec<PathBuf> = Vec::with_capacity(paths.len());
        for path in &paths {
            if started.elapsed() > timeout {
                self.release_partial(&acquired, &lease_id).await;
                return Err(WardError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    budget_ms: timeout.as_millis() as u64,
                });
            }

            let record = PathLockRecord {
                lease_id: lease_id.clone(),
                path: path.clone(),
                acquired_at: now_ms(),
                expires_at,
                pid: std::process::id(),
            };
            match self.lock_path(&record).await {
                Ok(lock_file) => acquired.push(lock_file),
                Err(e) => {
                    self.release_partial(&acquired, &lease_id).await;
                    return Err(e);
                }
            }
        }

        let lease = LeaseRecord {
            lease_id: lease_id.clone(),
            path_keys: paths.iter().map(|p| PathKey::for_path(p)).collect(),
            paths,
            created_at: now,
            expires_at,
            pid: std::process::id(),
        };
        if let Err(e) = self
            .store
            .write_json(&self.store.lease_path(&lease_id), &lease)
            .await
        {
            self.release_partial(&acquired, &lease_id).await;
            return Err(e);
        }

        debug!("Acquired lease {} over {} paths", lease_id, lease.paths.len());
        Ok(lease_id)
    }

    /// Release every path held under `lease_id`. Releasing twice is a no-op.
    pub async fn release_locks(&self, lease_id: &str) -> Result<()> {
        let lease_path = self.store.lease_path(lease_id);
        let lease: LeaseRecord = match read_json(&lease_path).await? {
            Some(lease) => lease,
            None => {
                debug!("Lease {} already released", lease_id);
                return Ok(());
            }
        };

        let _guard = self.reclaim_guard().await?;
        let mut failures = Vec::new();
        for key in &lease.path_keys {
            if let Err(e) = self.release_path(&self.store.path_lock_path(key), lease_id).await {
                failures.push(e.to_string());
            }
        }
        if let Err(e) = remove_if_exists(&lease_path).await {
            failures.push(e.to_string());
        }

        if failures.is_empty() {
            debug!("Released lease {}", lease_id);
            Ok(())
        } else {
            Err(WardError::Rollback(format!(
                "releasing lease {lease_id}: {}",
                failures.join("; ")
            )))
        }
    }

    /// The live lease record covering `path`, if any
    pub async fn holder_of(&self, path: &Path) -> Result<Option<PathLockRecord>> {
        let resolved = ward_core::resolve_path(self.store.base_dir(), path);
        let record: Option<PathLockRecord> =
            read_json(&self.store.path_lock_path(&PathKey::for_path(&resolved))).await?;
        Ok(record.filter(|r| r.state(now_ms()) == LeaseState::Held))
    }

    /// Number of per-path records that are still live
    pub async fn active_locks(&self) -> Result<usize> {
        let now = now_ms();
        let mut active = 0;
        for path in list_records(&self.store.locks_dir(), "file-", ".lock").await? {
            if let Ok(Some(record)) = read_json::<PathLockRecord>(&path).await {
                if record.state(now) == LeaseState::Held {
                    active += 1;
                }
            }
        }
        Ok(active)
    }

    /// Delete expired (or unreadable) lease and per-path records
    pub async fn sweep_expired(&self) -> Result<usize> {
        let _guard = self.reclaim_guard().await?;
        let now = now_ms();
        let mut removed = 0;

        for path in list_records(&self.store.locks_dir(), "file-", ".lock").await? {
            let expired = match read_json::<PathLockRecord>(&path).await {
                Ok(Some(record)) => record.state(now) == LeaseState::Expired,
                Ok(None) => false,
                Err(_) => true,
            };
            if expired && remove_if_exists(&path).await? {
                removed += 1;
            }
        }

        for path in list_records(&self.store.locks_dir(), "lock-", ".json").await? {
            let expired = match read_json::<LeaseRecord>(&path).await {
                Ok(Some(record)) => record.state(now) == LeaseState::Expired,
                Ok(None) => false,
                Err(_) => true,
            };
            if expired && remove_if_exists(&path).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Removed {} expired lock records", removed);
        }
        Ok(removed)
    }

    /// Claim one path; returns the per-path record file
    async fn lock_path(&self, record: &PathLockRecord) -> Result<PathBuf> {
        let lock_file = self
            .store
            .path_lock_path(&PathKey::for_path(&record.path));
        let data = serde_json::to_vec_pretty(record)
            .map_err(|e| WardError::serialization(&lock_file, e))?;

        // Later rounds only happen after reclaiming an expired record
        for _ in 0..3 {
            if publish_exclusive(&self.store.tmp_dir(), &lock_file, &data).await? {
                return Ok(lock_file);
            }

            match read_json::<PathLockRecord>(&lock_file).await {
                Ok(Some(existing)) if existing.state(now_ms()) == LeaseState::Held => {
                    return Err(conflict(record, existing));
                }
                Ok(None) => continue,
                _ => {}
            }

            // Decide again under the guard; a concurrent reclaimer may have
            // already replaced the record with a live one
            let _guard = self.reclaim_guard().await?;
            match read_json::<PathLockRecord>(&lock_file).await {
                Ok(Some(existing)) if existing.state(now_ms()) == LeaseState::Held => {
                    return Err(conflict(record, existing));
                }
                Ok(Some(existing)) => {
                    warn!(
                        "Reclaiming expired lock on {} from lease {}",
                        record.path.display(),
                        existing.lease_id
                    );
                    remove_if_exists(&lock_file).await?;
                    remove_if_exists(&self.store.lease_path(&existing.lease_id)).await?;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Reclaiming unreadable lock record: {}", e);
                    remove_if_exists(&lock_file).await?;
                }
            }
        }

        Err(WardError::LockConflict {
            path: record.path.clone(),
            holder: "concurrent acquirer".to_string(),
            expires_at_ms: record.expires_at,
        })
    }

    async fn reclaim_guard(&self) -> Result<FileGuard> {
        FileGuard::acquire(&self.store.reclaim_guard_path(), GUARD_WAIT).await
    }

    /// Remove a per-path record if `lease_id` still owns it; caller holds the guard
    async fn release_path(&self, lock_file: &Path, lease_id: &str) -> Result<()> {
        match read_json::<PathLockRecord>(lock_file).await {
            Ok(Some(record)) if record.lease_id == lease_id => {
                remove_if_exists(lock_file).await?;
            }
            Ok(Some(record)) => {
                debug!(
                    "Lock {} now belongs to lease {}, leaving it",
                    lock_file.display(),
                    record.lease_id
                );
            }
            Ok(None) => {}
            // ours or garbage, either way nobody can rely on it
            Err(_) => {
                remove_if_exists(lock_file).await?;
            }
        }
        Ok(())
    }

    async fn release_partial(&self, acquired: &[PathBuf], lease_id: &str) {
        if acquired.is_empty() {
            return;
        }
        let _guard = match self.reclaim_guard().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Leaving {} partial locks to expire: {}", acquired.len(), e);
                return;
            }
        };
        for lock_file in acquired {
            if let Err(e) = self.release_path(lock_file, lease_id).await {
                warn!("Failed to release partial lock {}: {}", lock_file.display(), e);
            }
        }
    }
}

fn conflict(wanted: &PathLockRecord, existing: PathLockRecord) -> WardError {
    WardError::LockConflict {
        path: wanted.path.clone(),
        holder: existing.lease_id,
        expires_at_ms: existing.expires_at,
    }
}

/// Create `target` with `data` only if it does not exist yet
///
/// Returns `false` when another record is already in place.
async fn publish_exclusive(tmp_dir: &Path, target: &Path, data: &[u8]) -> Result<bool> {
    let staged = tmp_dir.join(format!("{}.lock.tmp", Ulid::new()));
    tokio::fs::write(&staged, data)
        .await
        .map_err(|e| WardError::io(&staged, e))?;

    let linked = tokio::fs::hard_link(&staged, target).await;
    let _ = tokio::fs::remove_file(&staged).await;

    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(WardError::io(target, e)),
    }
}
