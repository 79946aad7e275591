//! Transaction manager: begin/commit/rollback lifecycle plus an operation log

use crate::checkpoint::{CheckpointStore, RollbackReport};
use crate::ledger::{Ledger, LedgerAction, LedgerEvent};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use ward_core::store::{list_records, remove_if_exists};
use ward_core::{now_ms, read_json, resolve_path, Result, Store, WardError};

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// One audited mutation. Content is kept as a bounded preview only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub id: u64,
    pub operation: String,
    pub file_path: PathBuf,
    pub old_preview: Option<String>,
    pub new_preview: Option<String>,
    pub old_len: usize,
    pub new_len: usize,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub description: String,
    /// The one checkpoint this transaction restores from
    pub checkpoint_id: u64,
    pub files: Vec<PathBuf>,
    pub operations: Vec<OperationLogEntry>,
    pub state: TransactionState,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Clone)]
pub struct TransactionManager {
    store: Store,
    ledger: Arc<Ledger>,
    checkpoints: CheckpointStore,
    preview_chars: usize,
}

impl TransactionManager {
    pub fn new(
        store: Store,
        ledger: Arc<Ledger>,
        checkpoints: CheckpointStore,
        preview_chars: usize,
    ) -> Self {
        Self {
            store,
            ledger,
            checkpoints,
            preview_chars,
        }
    }

    /// Open an ACTIVE transaction paired with an existing checkpoint
    pub async fn start_transaction<P: AsRef<Path>>(
        &self,
        description: &str,
        checkpoint_id: u64,
        paths: &[P],
    ) -> Result<u64> {
        // Pairing with an unknown checkpoint would make rollback impossible
        self.checkpoints.get_checkpoint(checkpoint_id).await?;

        let id = self.ledger.allocate_transaction_id().await?;
        let now = now_ms();
        let transaction = Transaction {
            id,
            description: description.to_string(),
            checkpoint_id,
            files: self.store.resolve_all(paths),
            operations: Vec::new(),
            state: TransactionState::Active,
            created_at: now,
            updated_at: now,
        };
        self.store
            .write_json(&self.store.transaction_path(id), &transaction)
            .await?;
        self.ledger
            .record_transaction(LedgerEvent::new(
                LedgerAction::Started,
                id,
                description,
                TransactionState::Active,
            ))
            .await?;

        debug!("Started transaction {} on checkpoint {}", id, checkpoint_id);
        Ok(id)
    }

    /// Append an audit entry. Never fails the caller; returns the entry id.
    pub async fn log_operation(
        &self,
        transaction_id: u64,
        operation: &str,
        file_path: &Path,
        old_content: Option<&str>,
        new_content: Option<&str>,
    ) -> Option<u64> {
        let entry = |id| OperationLogEntry {
            id,
            operation: operation.to_string(),
            file_path: resolve_path(self.store.base_dir(), file_path),
            old_preview: old_content.map(|c| truncate_chars(c, self.preview_chars)),
            new_preview: new_content.map(|c| truncate_chars(c, self.preview_chars)),
            old_len: old_content.map_or(0, str::len),
            new_len: new_content.map_or(0, str::len),
            timestamp: now_ms(),
        };

        let result = async {
            let mut transaction = self.get_transaction(transaction_id).await?;
            let op_id = transaction.operations.len() as u64 + 1;
            transaction.operations.push(entry(op_id));
            transaction.updated_at = now_ms();
            self.store
                .write_json(&self.store.transaction_path(transaction_id), &transaction)
                .await?;
            Ok::<_, WardError>(op_id)
        }
        .await;

        match result {
            Ok(op_id) => Some(op_id),
            Err(e) => {
                warn!(
                    "Failed to log {} on transaction {}: {}",
                    operation, transaction_id, e
                );
                None
            }
        }
    }

    pub async fn commit_transaction(&self, transaction_id: u64) -> Result<()> {
        let transaction = self.get_transaction(transaction_id).await?;
        if transaction.state != TransactionState::Active {
            return Err(WardError::Validation(format!(
                "transaction {transaction_id} is {} and cannot commit",
                transaction.state
            )));
        }

        self.set_state(transaction, TransactionState::Committed, LedgerAction::Committed)
            .await?;
        info!("Committed transaction {}", transaction_id);
        Ok(())
    }

    /// Restore the linked checkpoint, then mark the transaction ROLLED_BACK
    pub async fn rollback_transaction(&self, transaction_id: u64) -> Result<RollbackReport> {
        let transaction = self.get_transaction(transaction_id).await?;
        let report = self
            .checkpoints
            .rollback_to_checkpoint(transaction.checkpoint_id)
            .await?;

        self.set_state(transaction, TransactionState::RolledBack, LedgerAction::RolledBack)
            .await?;
        info!("Rolled back transaction {}", transaction_id);
        Ok(report)
    }

    pub async fn get_transaction(&self, transaction_id: u64) -> Result<Transaction> {
        read_json(&self.store.transaction_path(transaction_id))
            .await?
            .ok_or_else(|| {
                WardError::Validation(format!("transaction {transaction_id} not found"))
            })
    }

    /// Every readable transaction record
    pub async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let mut transactions = Vec::new();
        for path in list_records(&self.store.transactions_dir(), "transaction-", ".json").await? {
            match read_json::<Transaction>(&path).await {
                Ok(Some(transaction)) => transactions.push(transaction),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable transaction record: {}", e),
            }
        }
        transactions.sort_by_key(|t| t.id);
        Ok(transactions)
    }

    pub async fn delete_transaction(&self, transaction: &Transaction) -> Result<bool> {
        let removed = remove_if_exists(&self.store.transaction_path(transaction.id)).await?;
        if removed {
            self.ledger
                .record_transaction(LedgerEvent::new(
                    LedgerAction::Deleted,
                    transaction.id,
                    &transaction.description,
                    transaction.state,
                ))
                .await?;
        }
        Ok(removed)
    }

    async fn set_state(
        &self,
        mut transaction: Transaction,
        state: TransactionState,
        action: LedgerAction,
    ) -> Result<()> {
        transaction.state = state;
        transaction.updated_at = now_ms();
        self.store
            .write_json(&self.store.transaction_path(transaction.id), &transaction)
            .await?;
        self.ledger
            .record_transaction(LedgerEvent::new(
                action,
                transaction.id,
                &transaction.description,
                state,
            ))
            .await
    }
}

/// First `max` characters of `s`, on a char boundary
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
