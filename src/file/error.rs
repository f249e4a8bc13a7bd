use std::io;
use thiserror::Error;

use super::PageId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid page id: {0}")]
    InvalidPageId(PageId),

    #[error("Buffer pool exhausted: all {pool_size} frames are pinned")]
    BufferPoolExhausted { pool_size: usize },

    #[error("Database file is full: no logical page id left to allocate")]
    DiskFull,

    #[error("Page is pinned: page_id={page_id}, pin_count={pin_count}")]
    PagePinned { page_id: PageId, pin_count: u32 },

    #[error("Corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },
}

pub type StorageResult<T> = Result<T, StorageError>;
