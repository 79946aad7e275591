//! Atomic checkpoint/transaction coordinator
//!
//! `Coordinator` is the public surface consumed by request handlers and the
//! CLI. It wires the lock manager, checkpoint store, transaction manager and
//! ledger over one on-disk `Store`, and exposes:
//! - `initialize`
//! - `create_checkpoint` / `rollback_to_checkpoint` / `mark_checkpoint_successful`
//! - `execute_atomic`
//! - `get_status` / `cleanup`
//! - `audit_record` for payloads outside the rollback guarantee

pub mod executor;
pub mod locks;
pub mod status;

use journal::{
    AuditRecord, Checkpoint, CheckpointCreated, CheckpointStore, CheckpointSummary,
    GarbageCollector, Ledger, RetentionPolicy, RollbackReport, Transaction, TransactionManager,
    TransactionState, VerifyReport,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use ward_core::{now_ms, Result, Store, WardConfig};

// Re-exports
pub use executor::{AtomicExecutor, AtomicOptions, AtomicOutcome, AttemptContext, Stage};
pub use locks::{LeaseRecord, LeaseState, LockManager, PathLockRecord};
pub use status::{CleanupOutcome, CleanupReport, Status, StatusReport};

/// Default coordinator directory, relative to the working directory
pub const DEFAULT_ROOT: &str = ".ward";

pub struct Coordinator {
    store: Store,
    config: WardConfig,
    ledger: Arc<Ledger>,
    checkpoints: CheckpointStore,
    transactions: TransactionManager,
    locks: LockManager,
    executor: AtomicExecutor,
}

impl Coordinator {
    /// Build a coordinator rooted at `root`; relative file paths resolve against `base_dir`
    pub fn new(root: impl Into<PathBuf>, base_dir: impl Into<PathBuf>, config: WardConfig) -> Self {
        let store = Store::new(root, base_dir);
        let ledger = Arc::new(Ledger::new(store.clone()));
        let checkpoints = CheckpointStore::new(store.clone(), ledger.clone());
        let transactions = TransactionManager::new(
            store.clone(),
            ledger.clone(),
            checkpoints.clone(),
            config.transactions.preview_chars,
        );
        let locks = LockManager::new(store.clone());
        let executor = AtomicExecutor::new(
            locks.clone(),
            checkpoints.clone(),
            transactions.clone(),
            config.lock_timeout(),
            config.executor.retries,
            config.backoff_base(),
        );

        Self {
            store,
            config,
            ledger,
            checkpoints,
            transactions,
            locks,
            executor,
        }
    }

    /// Like [`Coordinator::new`], reading `ward.toml` from the resolved root
    pub fn open(root: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let root = ward_core::resolve_path(&base_dir, &root.into());
        let config = WardConfig::load(&root)?;
        Ok(Self::new(root, base_dir, config))
    }

    /// Create directories and the ledger. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        self.store.init().await?;
        self.ledger.init().await?;
        info!("Coordinator ready at {}", self.store.root().display());
        Ok(())
    }

    pub async fn create_checkpoint<P: AsRef<Path>>(
        &self,
        description: &str,
        file_paths: &[P],
    ) -> Result<CheckpointCreated> {
        self.checkpoints
            .create_checkpoint(description, file_paths)
            .await
    }

    pub async fn execute_atomic<T, F, Fut>(
        &self,
        options: AtomicOptions,
        operation: F,
    ) -> Result<AtomicOutcome<T>>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.executor.execute_atomic(options, operation).await
    }

    pub async fn rollback_to_checkpoint(&self, checkpoint_id: u64) -> Result<RollbackReport> {
        self.checkpoints.rollback_to_checkpoint(checkpoint_id).await
    }

    pub async fn mark_checkpoint_successful(&self, checkpoint_id: u64) -> Result<()> {
        self.checkpoints
            .mark_checkpoint_successful(checkpoint_id)
            .await
    }

    pub async fn verify_checkpoint(&self, checkpoint_id: u64) -> Result<VerifyReport> {
        self.checkpoints.verify_checkpoint(checkpoint_id).await
    }

    pub async fn get_checkpoint(&self, checkpoint_id: u64) -> Result<Checkpoint> {
        self.checkpoints.get_checkpoint(checkpoint_id).await
    }

    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointSummary>> {
        self.checkpoints.list_checkpoints().await
    }

    pub async fn get_transaction(&self, transaction_id: u64) -> Result<Transaction> {
        self.transactions.get_transaction(transaction_id).await
    }

    /// Counts from the ledger and live records. Never fails.
    pub async fn get_status(&self) -> StatusReport {
        match self.collect_status().await {
            Ok(status) => StatusReport::Ok(status),
            Err(e) => {
                warn!("Status collection failed: {}", e);
                StatusReport::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Remove terminal records older than `max_age` (config default when
    /// `None`) and every expired lock record. Never fails.
    pub async fn cleanup(&self, max_age: Option<Duration>) -> CleanupOutcome {
        let policy = RetentionPolicy {
            max_age: max_age.unwrap_or_else(|| self.config.max_age()),
        };
        match self.run_cleanup(policy).await {
            Ok(report) => CleanupOutcome::Ok(report),
            Err(e) => {
                warn!("Cleanup failed: {}", e);
                CleanupOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Identity + timestamp + payload, with no file backup and no ledger entry
    pub fn audit_record(&self, payload: serde_json::Value) -> AuditRecord {
        AuditRecord::new(payload)
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    pub fn config(&self) -> &WardConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    async fn collect_status(&self) -> Result<Status> {
        let ledger = self.ledger.snapshot().await?;
        let active_transactions = self
            .transactions
            .list_transactions()
            .await?
            .iter()
            .filter(|t| t.state == TransactionState::Active)
            .count();
        let active_locks = self.locks.active_locks().await?;

        Ok(Status {
            checkpoints: status::CheckpointCounts {
                total: ledger.checkpoints_created(),
                last_id: ledger.last_checkpoint_id,
            },
            transactions: status::TransactionCounts {
                total: ledger.transactions_started(),
                last_id: ledger.last_transaction_id,
                active: active_transactions,
            },
            locks: status::LockCounts {
                active: active_locks,
            },
            system: status::SystemInfo {
                root: self.store.root().to_path_buf(),
                pid: std::process::id(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                timestamp: now_ms(),
            },
        })
    }

    async fn run_cleanup(&self, policy: RetentionPolicy) -> Result<CleanupReport> {
        let metrics = GarbageCollector::new(policy)
            .collect(&self.checkpoints, &self.transactions)
            .await?;
        let locks_removed = self.locks.sweep_expired().await?;

        Ok(CleanupReport {
            checkpoints_removed: metrics.checkpoints_removed,
            transactions_removed: metrics.transactions_removed,
            locks_removed,
        })
    }
}
