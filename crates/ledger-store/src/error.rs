//! Storage-layer error type.
//!
//! Follows the same hand-rolled idiom as `ledger_consensus::ChainError`:
//! a stable reason code plus a human-readable message, `Display`/`Error`
//! implemented by hand rather than pulled in through a derive-macro crate.

use std::fmt;

use ledger_consensus::{ChainError, ErrorCode};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreError {
    pub code: ErrorCode,
    pub msg: String,
}

impl StoreError {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self { code, msg: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::error!("storage I/O error: {msg}");
        Self::new(ErrorCode::StorageIo, msg)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{}", self.code.as_str())
        } else {
            write!(f, "{}: {}", self.code.as_str(), self.msg)
        }
    }
}

impl std::error::Error for StoreError {}

impl From<ChainError> for StoreError {
    fn from(e: ChainError) -> Self {
        Self::new(e.code, e.msg)
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        Self::io(e.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::io(e.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        Self::io(e.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        Self::io(e.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        Self::io(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}
