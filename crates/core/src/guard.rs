//! Exclusive advisory lock on a guard file
//!
//! The lock belongs to the open file, so the OS drops it when the holder
//! exits or crashes. Guard files are never removed; an abandoned one is just
//! an unlocked empty file. Locks taken through separate `FileGuard`s conflict
//! even inside one process.

use crate::error::{Result, WardError};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Held lock; released on drop
#[derive(Debug)]
pub struct FileGuard {
    path: PathBuf,
    file: File,
}

impl FileGuard {
    /// Wait up to `budget` for the exclusive lock on `path`
    pub async fn acquire(path: &Path, budget: Duration) -> Result<Self> {
        let started = Instant::now();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| WardError::io(path, e))?
            .into_std()
            .await;

        loop {
            if platform::try_lock_exclusive(&file, path).map_err(|e| WardError::io(path, e))? {
                return Ok(Self {
                    path: path.to_path_buf(),
                    file,
                });
            }

            if started.elapsed() >= budget {
                debug!("Gave up waiting for {}", path.display());
                return Err(WardError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    budget_ms: budget.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        platform::unlock(&self.file, &self.path);
    }
}

#[cfg(unix)]
mod platform {
    use nix::errno::Errno;
    use nix::fcntl::{flock, FlockArg};
    use std::fs::File;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    pub fn try_lock_exclusive(file: &File, _path: &Path) -> std::io::Result<bool> {
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(true),
            Err(Errno::EWOULDBLOCK) => Ok(false),
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(std::io::Error::from_raw_os_error(e as i32)),
        }
    }

    // Closing the descriptor releases the lock as well
    pub fn unlock(file: &File, _path: &Path) {
        let _ = flock(file.as_raw_fd(), FlockArg::Unlock);
    }
}

/// Without `flock`, exclusion only holds between guards of one process
#[cfg(not(unix))]
mod platform {
    use std::collections::HashSet;
    use std::fs::File;
    use std::path::{Path, PathBuf};
    use std::sync::{Mutex, OnceLock};

    fn held() -> &'static Mutex<HashSet<PathBuf>> {
        static HELD: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
        HELD.get_or_init(|| Mutex::new(HashSet::new()))
    }

    pub fn try_lock_exclusive(_file: &File, path: &Path) -> std::io::Result<bool> {
        let mut held = held()
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "guard registry poisoned"))?;
        Ok(held.insert(path.to_path_buf()))
    }

    pub fn unlock(_file: &File, path: &Path) {
        if let Ok(mut held) = held().lock() {
            held.remove(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_second_guard_waits_for_first() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("x.guard");

        let first = FileGuard::acquire(&path, Duration::from_secs(1)).await.unwrap();
        let err = FileGuard::acquire(&path, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, WardError::Timeout { .. }));

        drop(first);
        let second = FileGuard::acquire(&path, Duration::from_millis(20)).await.unwrap();
        assert_eq!(second.path(), path);
    }

    #[tokio::test]
    async fn test_leftover_guard_file_does_not_block() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("left.guard");
        std::fs::write(&path, b"").unwrap();

        FileGuard::acquire(&path, Duration::ZERO).await.unwrap();
        assert!(path.exists());
    }
}
