//! CLI command implementations

pub mod checkpoint;
pub mod gc;
pub mod init;
pub mod list;
pub mod mark;
pub mod rollback;
pub mod run;
pub mod status;
pub mod verify;
