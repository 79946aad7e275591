//! Checkpoint journal and transaction state
//!
//! This crate provides:
//! - The ledger (lifecycle events + id counters)
//! - The checkpoint store (file backup / restore / verify)
//! - The transaction manager (begin / commit / rollback + operation log)
//! - Retention policies & GC
//! - Lightweight audit records

pub mod audit;
pub mod checkpoint;
pub mod ledger;
pub mod retention;
pub mod transaction;

// Re-exports
pub use audit::AuditRecord;
pub use checkpoint::{
    Checkpoint, CheckpointCreated, CheckpointState, CheckpointStore, CheckpointSummary,
    RollbackReport, VerifyReport,
};
pub use ledger::{Ledger, LedgerAction, LedgerDocument, LedgerEvent};
pub use retention::{GarbageCollector, GcMetrics, RetentionPolicy};
pub use transaction::{OperationLogEntry, Transaction, TransactionManager, TransactionState};
