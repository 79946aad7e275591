//! Atomic executor: lock → checkpoint → transaction → operation → commit
//!
//! Each attempt walks the stages in a fixed order and records which resources
//! it holds. Any failure after the locks are taken unwinds exactly those
//! resources (transaction rollback, checkpoint rollback, lock release), each
//! step independently, before the next attempt starts from scratch.

use journal::{CheckpointStore, TransactionManager};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use ward_core::{Result, WardError};

use crate::locks::LockManager;

/// Stages of one attempt, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AcquireLocks,
    CreateCheckpoint,
    StartTransaction,
    RunOperation,
    Commit,
    MarkSuccessful,
    ReleaseLocks,
    Done,
}

/// Options for one `execute_atomic` call
#[derive(Debug, Clone)]
pub struct AtomicOptions {
    pub description: String,
    pub file_paths: Vec<PathBuf>,
    /// Lease TTL and lock budget; coordinator default when `None`
    pub timeout: Option<Duration>,
    /// Total attempts; coordinator default when `None`
    pub retries: Option<u32>,
}

impl AtomicOptions {
    pub fn new<P: AsRef<Path>>(description: impl Into<String>, file_paths: &[P]) -> Self {
        Self {
            description: description.into(),
            file_paths: file_paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            timeout: None,
            retries: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Result of the winning attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtomicOutcome<T> {
    pub result: T,
    pub checkpoint_id: u64,
    pub transaction_id: u64,
    pub attempt: u32,
}

/// Handed to the operation on every attempt
#[derive(Clone)]
pub struct AttemptContext {
    pub attempt: u32,
    pub checkpoint_id: u64,
    pub transaction_id: u64,
    transactions: TransactionManager,
}

impl AttemptContext {
    /// Audit a mutation on this attempt's transaction
    pub async fn log_operation(
        &self,
        operation: &str,
        file_path: &Path,
        old_content: Option<&str>,
        new_content: Option<&str>,
    ) -> Option<u64> {
        self.transactions
            .log_operation(self.transaction_id, operation, file_path, old_content, new_content)
            .await
    }
}

/// Resources held by an in-flight attempt
#[derive(Debug)]
struct Held {
    stage: Stage,
    lease_id: String,
    checkpoint_id: Option<u64>,
    transaction_id: Option<u64>,
}

#[derive(Clone)]
pub struct AtomicExecutor {
    locks: LockManager,
    checkpoints: CheckpointStore,
    transactions: TransactionManager,
    timeout: Duration,
    retries: u32,
    backoff_base: Duration,
}

impl AtomicExecutor {
    pub fn new(
        locks: LockManager,
        checkpoints: CheckpointStore,
        transactions: TransactionManager,
        timeout: Duration,
        retries: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            locks,
            checkpoints,
            transactions,
            timeout,
            retries,
            backoff_base,
        }
    }

    /// Run `operation` so that its file mutations either all stick or are undone
    ///
    /// Retries the whole sequence up to `retries` times with exponential
    /// backoff. On exhaustion the last original failure is returned wrapped in
    /// `WardError::Exhausted` with the attempt count.
    pub async fn execute_atomic<T, F, Fut>(
        &self,
        options: AtomicOptions,
        mut operation: F,
    ) -> Result<AtomicOutcome<T>>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let retries = options.retries.unwrap_or(self.retries).max(1);
        let timeout = options.timeout.unwrap_or(self.timeout);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_attempt(&options, timeout, attempt, &mut operation).await {
                Ok(outcome) => {
                    info!(
                        "'{}' succeeded on attempt {} (checkpoint {}, transaction {})",
                        options.description, attempt, outcome.checkpoint_id, outcome.transaction_id
                    );
                    return Ok(outcome);
                }
                Err(e) if attempt >= retries => {
                    warn!(
                        "'{}' failed after {} attempts: {}",
                        options.description, attempt, e
                    );
                    return Err(WardError::Exhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "'{}' attempt {} failed: {}; retrying in {:?}",
                        options.description, attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// `backoff_base * 2^attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    async fn run_attempt<T, F, Fut>(
        &self,
        options: &AtomicOptions,
        timeout: Duration,
        attempt: u32,
        operation: &mut F,
    ) -> Result<AtomicOutcome<T>>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        // 1. Acquire locks. Nothing to unwind if this fails.
        let lease_id = self
            .locks
            .acquire_locks(&options.file_paths, timeout)
            .await?;

        let mut held = Held {
            stage: Stage::CreateCheckpoint,
            lease_id,
            checkpoint_id: None,
            transaction_id: None,
        };

        match self.run_stages(options, attempt, operation, &mut held).await {
            Ok(outcome) => {
                // 7. Release locks; a leftover lease simply expires
                held.stage = Stage::ReleaseLocks;
                if let Err(e) = self.locks.release_locks(&held.lease_id).await {
                    warn!("Failed to release lease {} after commit: {}", held.lease_id, e);
                }
                held.stage = Stage::Done;
                Ok(outcome)
            }
            Err(e) => {
                debug!("Attempt {} failed at {:?}: {}", attempt, held.stage, e);
                self.unwind(held).await;
                Err(e)
            }
        }
    }

    async fn run_stages<T, F, Fut>(
        &self,
        options: &AtomicOptions,
        attempt: u32,
        operation: &mut F,
        held: &mut Held,
    ) -> Result<AtomicOutcome<T>>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        // 2. Checkpoint
        let checkpoint = self
            .checkpoints
            .create_checkpoint(&options.description, &options.file_paths)
            .await?;
        held.checkpoint_id = Some(checkpoint.checkpoint_id);

        // 3. Transaction
        held.stage = Stage::StartTransaction;
        let transaction_id = self
            .transactions
            .start_transaction(
                &options.description,
                checkpoint.checkpoint_id,
                &options.file_paths,
            )
            .await?;
        held.transaction_id = Some(transaction_id);

        // 4. Caller work
        held.stage = Stage::RunOperation;
        let context = AttemptContext {
            attempt,
            checkpoint_id: checkpoint.checkpoint_id,
            transaction_id,
            transactions: self.transactions.clone(),
        };
        let result = operation(context).await.map_err(WardError::Operation)?;

        // 5. Commit
        held.stage = Stage::Commit;
        self.transactions.commit_transaction(transaction_id).await?;

        // 6. Mark checkpoint successful
        held.stage = Stage::MarkSuccessful;
        self.checkpoints
            .mark_checkpoint_successful(checkpoint.checkpoint_id)
            .await?;

        Ok(AtomicOutcome {
            result,
            checkpoint_id: checkpoint.checkpoint_id,
            transaction_id,
            attempt,
        })
    }

    /// Undo whatever `held` owns. Failures and restore warnings are logged,
    /// never propagated; the caller reports the original error.
    async fn unwind(&self, held: Held) {
        let mut failures = Vec::new();
        let mut restored = false;

        if let Some(transaction_id) = held.transaction_id {
            match self.transactions.rollback_transaction(transaction_id).await {
                Ok(report) => {
                    restored = true;
                    for warning in &report.warnings {
                        warn!("Transaction {} rollback: {}", transaction_id, warning);
                    }
                }
                Err(e) => failures.push(WardError::Rollback(format!(
                    "transaction {transaction_id}: {e}"
                ))),
            }
        }

        // The transaction rollback already restored its checkpoint
        if !restored {
            if let Some(checkpoint_id) = held.checkpoint_id {
                if let Err(e) = self.checkpoints.rollback_to_checkpoint(checkpoint_id).await {
                    failures.push(WardError::Rollback(format!(
                        "checkpoint {checkpoint_id}: {e}"
                    )));
                }
            }
        }

        if let Err(e) = self.locks.release_locks(&held.lease_id).await {
            failures.push(WardError::Rollback(format!("lease {}: {e}", held.lease_id)));
        }

        for failure in &failures {
            warn!("Unwind step failed: {}", failure);
        }
    }
}
