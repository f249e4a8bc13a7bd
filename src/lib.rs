pub mod btree;
pub mod config;
pub mod engine;
pub mod file;

pub use btree::{
    BPlusTree, BTreeError, BTreeResult, BytewiseComparator, GenericKey, IndexIterator,
    IntegerComparator, KeyComparator, Rebalance, TreeStats,
};
pub use config::{ConfigError, EngineConfig};
pub use engine::StorageEngine;
pub use file::{
    BufferPoolManager, DiskManager, INVALID_PAGE_ID, LruReplacer, PAGE_SIZE, PageGuard, PageId,
    Replacer, RowId, StorageError, StorageResult,
};
