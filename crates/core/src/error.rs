//! Error kinds shared by every Ward crate

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, WardError>;

/// Failures surfaced by the lock manager, checkpoint store, transaction
/// manager and atomic executor.
#[derive(Debug, Error)]
pub enum WardError {
    /// Path already leased by a live, non-expired holder
    #[error("lock conflict on {}: held by lease {holder} until {expires_at_ms}", path.display())]
    LockConflict {
        path: PathBuf,
        holder: String,
        expires_at_ms: u64,
    },

    /// Lock acquisition exceeded its wait budget
    #[error("timed out acquiring locks after {elapsed_ms}ms (budget {budget_ms}ms)")]
    Timeout { elapsed_ms: u64, budget_ms: u64 },

    /// Read/write/stat failure against the filesystem
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Referenced checkpoint/transaction/lock does not exist, or bad input
    #[error("validation failure: {0}")]
    Validation(String),

    /// Restoring a backup or releasing a lock failed during unwind
    #[error("rollback failure: {0}")]
    Rollback(String),

    /// A persisted record could not be encoded or decoded
    #[error("malformed record {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid configuration file
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failure returned by the caller-supplied operation
    #[error("operation failed: {0:#}")]
    Operation(anyhow::Error),

    /// Retry budget exhausted; carries the last original failure
    #[error("failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<WardError>,
    },
}

impl WardError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn serialization(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LockConflict { .. } => "lock_conflict",
            Self::Timeout { .. } => "timeout",
            Self::Io { .. } => "io_failure",
            Self::Validation(_) => "validation_failure",
            Self::Rollback(_) => "rollback_failure",
            Self::Serialization { .. } => "serialization_failure",
            Self::Config(_) => "config_failure",
            Self::Operation(_) => "operation_failure",
            Self::Exhausted { source, .. } => source.kind(),
        }
    }

    /// Attempt count for an exhausted executor run
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The original failure behind any executor annotation
    pub fn root(&self) -> &WardError {
        match self {
            Self::Exhausted { source, .. } => source.root(),
            other => other,
        }
    }
}
