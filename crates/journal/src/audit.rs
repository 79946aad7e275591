//! Lightweight audit records
//!
//! An `AuditRecord` is identity + timestamp + opaque payload with no file
//! backup behind it. It sits outside the checkpoint/rollback guarantee and is
//! meant for collaborator-level history (comments, approvals, presence).

use serde::{Deserialize, Serialize};
use ulid::Ulid;
use ward_core::now_ms;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Ulid,
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

impl AuditRecord {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Ulid::new(),
            timestamp: now_ms(),
            payload,
        }
    }
}
