//! Status and cleanup reports
//!
//! Both are returned to collaborators as data. Internal failures become the
//! `Failed { error }` shape instead of an `Err`.

use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub checkpoints: CheckpointCounts,
    pub transactions: TransactionCounts,
    pub locks: LockCounts,
    pub system: SystemInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckpointCounts {
    pub total: usize,
    pub last_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransactionCounts {
    pub total: usize,
    pub last_id: u64,
    pub active: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockCounts {
    pub active: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub root: PathBuf,
    pub pid: u32,
    pub version: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusReport {
    Ok(Status),
    Failed { error: String },
}

impl StatusReport {
    pub fn status(&self) -> Option<&Status> {
        match self {
            StatusReport::Ok(status) => Some(status),
            StatusReport::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub checkpoints_removed: usize,
    pub transactions_removed: usize,
    pub locks_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CleanupOutcome {
    Ok(CleanupReport),
    Failed { error: String },
}

impl CleanupOutcome {
    pub fn report(&self) -> Option<&CleanupReport> {
        match self {
            CleanupOutcome::Ok(report) => Some(report),
            CleanupOutcome::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_shapes_serialize_as_error_payload() {
        let status = StatusReport::Failed {
            error: "ledger unreadable".into(),
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({"error": "ledger unreadable"})
        );
        assert!(status.status().is_none());

        let cleanup = CleanupOutcome::Ok(CleanupReport {
            locks_removed: 2,
            ..Default::default()
        });
        let value = serde_json::to_value(&cleanup).unwrap();
        assert_eq!(value["locks_removed"], 2);
        assert_eq!(cleanup.report().unwrap().checkpoints_removed, 0);
    }
}
