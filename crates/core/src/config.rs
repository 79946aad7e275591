//! Coordinator configuration (`ward.toml`)
//!
//! Every section is optional; missing keys fall back to defaults.
//!
//! ```toml
//! [locks]
//! timeout_ms = 30000
//!
//! [executor]
//! retries = 3
//! backoff_base_ms = 1000
//!
//! [retention]
//! max_age_hours = 24
//!
//! [transactions]
//! preview_chars = 200
//! ```

use crate::error::{Result, WardError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Name of the config file inside the coordinator root
pub const CONFIG_FILE: &str = "ward.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardConfig {
    pub locks: LockConfig,
    pub executor: ExecutorConfig,
    pub retention: RetentionConfig,
    pub transactions: TransactionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease time-to-live and acquisition budget
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Total attempts per `execute_atomic` call
    pub retries: u32,
    /// Backoff after attempt `n` is `backoff_base_ms * 2^n`
    pub backoff_base_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_base_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Terminal checkpoints/transactions older than this are collected
    pub max_age_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { max_age_hours: 24 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Characters kept from old/new content in the operation log
    pub preview_chars: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self { preview_chars: 200 }
    }
}

impl WardConfig {
    /// Load `ward.toml` from the coordinator root, or defaults if absent
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No {} at {}, using defaults", CONFIG_FILE, root.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(WardError::io(&path, e)),
        };

        Self::parse(&raw)
    }

    /// Parse and validate a TOML document
    pub fn parse(raw: &str) -> Result<Self> {
        let config: WardConfig =
            toml::from_str(raw).map_err(|e| WardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.executor.retries == 0 {
            return Err(WardError::Config("executor.retries must be at least 1".into()));
        }
        if self.locks.timeout_ms == 0 {
            return Err(WardError::Config("locks.timeout_ms must be positive".into()));
        }
        if self.executor.backoff_base_ms > 60_000 {
            return Err(WardError::Config(
                "executor.backoff_base_ms must be at most 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.locks.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.executor.backoff_base_ms)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.retention.max_age_hours * 60 * 60)
    }
}
