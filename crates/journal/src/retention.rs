//! Retention policy and garbage collection of checkpoint/transaction records

use crate::checkpoint::{Checkpoint, CheckpointState, CheckpointStore};
use crate::transaction::{TransactionManager, TransactionState};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use ward_core::{now_ms, read_json, Result};

/// Retention policy configuration
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Terminal records older than this are deleted (default: 24h)
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RetentionPolicy {
    /// Whether a record created at `created_at` in `state` may be collected.
    /// ACTIVE records are in-flight recovery data and are never collected.
    fn expired(&self, created_at: u64, active: bool, now: u64) -> bool {
        !active && now.saturating_sub(created_at) > self.max_age.as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcMetrics {
    pub checkpoints_removed: usize,
    pub transactions_removed: usize,
}

/// Garbage collector
pub struct GarbageCollector {
    policy: RetentionPolicy,
}

impl GarbageCollector {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    /// Delete terminal checkpoint and transaction records past the retention window
    pub async fn collect(
        &self,
        checkpoints: &CheckpointStore,
        transactions: &TransactionManager,
    ) -> Result<GcMetrics> {
        let now = now_ms();
        let mut metrics = GcMetrics::default();

        for path in checkpoints.record_paths().await? {
            let checkpoint: Checkpoint = match read_json(&path).await {
                Ok(Some(checkpoint)) => checkpoint,
                Ok(None) => continue,
                Err(e) => {
                    warn!("GC skipping unreadable checkpoint record: {}", e);
                    continue;
                }
            };

            let active = checkpoint.state == CheckpointState::Active;
            if self.policy.expired(checkpoint.created_at, active, now)
                && checkpoints.delete_checkpoint(&checkpoint).await?
            {
                debug!("GC removed checkpoint {}", checkpoint.id);
                metrics.checkpoints_removed += 1;
            }
        }

        for transaction in transactions.list_transactions().await? {
            let active = transaction.state == TransactionState::Active;
            if self.policy.expired(transaction.created_at, active, now)
                && transactions.delete_transaction(&transaction).await?
            {
                debug!("GC removed transaction {}", transaction.id);
                metrics.transactions_removed += 1;
            }
        }

        info!(
            "GC removed {} checkpoints and {} transactions",
            metrics.checkpoints_removed, metrics.transactions_removed
        );
        Ok(metrics)
    }
}
