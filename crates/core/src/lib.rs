//! Shared building blocks for the Ward coordinator
//!
//! This crate provides:
//! - Error kinds (`WardError`)
//! - Configuration (`ward.toml`)
//! - The on-disk `Store` layout and atomic JSON I/O
//! - `FileGuard`, an exclusive advisory lock on a guard file
//! - Path resolution and BLAKE3 path keys

pub mod config;
pub mod encoding;
pub mod error;
pub mod guard;
pub mod hash;
pub mod store;

// Re-exports
pub use config::WardConfig;
pub use error::{Result, WardError};
pub use guard::FileGuard;
pub use hash::{hash_bytes, Digest, PathKey};
pub use store::{now_ms, read_json, resolve_path, Store};
