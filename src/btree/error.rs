use thiserror::Error;

use crate::file::{PageId, StorageError};

/// Errors that can occur during B+ tree operations
#[derive(Debug, Error)]
pub enum BTreeError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid {kind} max size {requested} (allowed range up to {limit})")]
    InvalidMaxSize {
        kind: &'static str,
        requested: usize,
        limit: usize,
    },

    #[error("Key size mismatch: expected {expected} bytes, got {actual}")]
    KeySize { expected: usize, actual: usize },

    #[error("Corrupt tree page {page_id}: {reason}")]
    CorruptPage { page_id: PageId, reason: String },

    #[error("Index roots page is full")]
    RootsPageFull,

    #[error("Invalid tree state: {0}")]
    InvalidState(String),
}

pub type BTreeResult<T> = Result<T, BTreeError>;
