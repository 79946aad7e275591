//! Append-only ledger of checkpoint and transaction lifecycle events
//!
//! The ledger is the only home of the id counters. Every mutation is a
//! read-modify-write of `checkpoints/checkpoint-log.json`, serialized by an
//! in-process mutex and a cross-process advisory lock on `locks/ledger.lock`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use ward_core::store::read_json;
use ward_core::{now_ms, FileGuard, Result, Store};

/// Current ledger format version
pub const LEDGER_VERSION: u32 = 1;

/// How long to wait for the cross-process ledger lock
const LOCK_WAIT: Duration = Duration::from_secs(10);

/// What happened to a checkpoint or transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Created,
    Started,
    Successful,
    Committed,
    RolledBack,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub action: LedgerAction,
    pub id: u64,
    pub timestamp: u64,
    pub description: String,
    pub state: String,
}

impl LedgerEvent {
    pub fn new(action: LedgerAction, id: u64, description: &str, state: impl ToString) -> Self {
        Self {
            action,
            id,
            timestamp: now_ms(),
            description: description.to_string(),
            state: state.to_string(),
        }
    }
}

/// Persisted ledger document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub version: u32,
    pub checkpoints: Vec<LedgerEvent>,
    pub transactions: Vec<LedgerEvent>,
    pub last_checkpoint_id: u64,
    pub last_transaction_id: u64,
}

impl Default for LedgerDocument {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            checkpoints: Vec::new(),
            transactions: Vec::new(),
            last_checkpoint_id: 0,
            last_transaction_id: 0,
        }
    }
}

impl LedgerDocument {
    /// Number of checkpoints ever created
    pub fn checkpoints_created(&self) -> usize {
        count_action(&self.checkpoints, LedgerAction::Created)
    }

    /// Number of transactions ever started
    pub fn transactions_started(&self) -> usize {
        count_action(&self.transactions, LedgerAction::Started)
    }
}

fn count_action(events: &[LedgerEvent], action: LedgerAction) -> usize {
    events.iter().filter(|e| e.action == action).count()
}

pub struct Ledger {
    store: Store,
    guard: Mutex<()>,
}

impl Ledger {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            guard: Mutex::new(()),
        }
    }

    /// Write an empty ledger if none exists yet
    pub async fn init(&self) -> Result<()> {
        let _guard = self.guard.lock().await;
        let _file_lock = FileGuard::acquire(&self.store.ledger_lock_path(), LOCK_WAIT).await?;

        let path = self.store.ledger_path();
        if read_json::<LedgerDocument>(&path).await?.is_none() {
            debug!("Creating ledger at {}", path.display());
            self.store.write_json(&path, &LedgerDocument::default()).await?;
        }
        Ok(())
    }

    /// Read the current ledger (empty if never initialized)
    pub async fn snapshot(&self) -> Result<LedgerDocument> {
        Ok(read_json(&self.store.ledger_path())
            .await?
            .unwrap_or_default())
    }

    /// Apply `f` to the ledger under both locks and persist the result
    pub async fn update<R>(&self, f: impl FnOnce(&mut LedgerDocument) -> R) -> Result<R> {
        let _guard = self.guard.lock().await;
        let _file_lock = FileGuard::acquire(&self.store.ledger_lock_path(), LOCK_WAIT).await?;

        let path = self.store.ledger_path();
        let mut doc: LedgerDocument = read_json(&path).await?.unwrap_or_default();
        let result = f(&mut doc);
        self.store.write_json(&path, &doc).await?;
        Ok(result)
    }

    pub async fn allocate_checkpoint_id(&self) -> Result<u64> {
        self.update(|doc| {
            doc.last_checkpoint_id += 1;
            doc.last_checkpoint_id
        })
        .await
    }

    pub async fn allocate_transaction_id(&self) -> Result<u64> {
        self.update(|doc| {
            doc.last_transaction_id += 1;
            doc.last_transaction_id
        })
        .await
    }

    pub async fn record_checkpoint(&self, event: LedgerEvent) -> Result<()> {
        self.update(|doc| doc.checkpoints.push(event)).await
    }

    pub async fn record_transaction(&self, event: LedgerEvent) -> Result<()> {
        self.update(|doc| doc.transactions.push(event)).await
    }
}
