//! Storage context: one page file, its buffer pool and the indexes on it.

use std::sync::Arc;

use tracing::info;

use crate::btree::{
    BPlusTree, BTreeError, BTreeResult, BytewiseComparator, KeyComparator, TreePageHeader, roots,
};
use crate::config::EngineConfig;
use crate::file::{
    BufferPoolManager, CATALOG_META_PAGE_ID, DiskManager, INDEX_ROOTS_PAGE_ID, PageId,
};

/// Owns the buffer pool (and through it the disk manager) for one database
/// file. Trees opened from the engine share its pool.
pub struct StorageEngine {
    config: EngineConfig,
    pool: Arc<BufferPoolManager>,
}

impl StorageEngine {
    /// Open or create the database file named by `config`.
    ///
    /// A new file gets its two reserved pages allocated and an empty index
    /// roots page. An existing file must carry a valid roots page.
    pub fn open(config: EngineConfig) -> BTreeResult<Self> {
        config
            .validate()
            .map_err(|e| BTreeError::InvalidState(e.to_string()))?;

        let disk = DiskManager::open(&config.db_file, config.sync_on_write)?;
        let fresh = disk.num_allocated_pages() == 0;
        let pool = Arc::new(BufferPoolManager::new(disk, config.pool_size));

        if fresh {
            for expected in [CATALOG_META_PAGE_ID, INDEX_ROOTS_PAGE_ID] {
                let page_id = pool.new_page()?.page_id();
                if page_id != expected {
                    return Err(BTreeError::InvalidState(format!(
                        "reserved page {} was allocated as {}",
                        expected, page_id
                    )));
                }
            }
            roots::format(&pool)?;
            pool.flush_all()?;
        } else if pool.is_page_free(INDEX_ROOTS_PAGE_ID)? {
            return Err(BTreeError::CorruptPage {
                page_id: INDEX_ROOTS_PAGE_ID,
                reason: "index roots page is not allocated".to_string(),
            });
        }

        let directory = roots::load(&pool)?;
        info!(
            event = "engine.open",
            path = %config.db_file.display(),
            fresh,
            pool_size = config.pool_size,
            indexes = directory.len(),
            allocated_pages = pool.num_allocated_pages(),
        );

        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.pool
    }

    /// Open `index_id` with the configured key width and page capacities
    pub fn open_index<C: KeyComparator>(&self, index_id: u32, comparator: C) -> BTreeResult<BPlusTree<C>> {
        self.open_index_with(
            index_id,
            comparator,
            self.config.key_size,
            self.config.leaf_max_size,
            self.config.internal_max_size,
        )
    }

    pub fn open_index_with<C: KeyComparator>(
        &self,
        index_id: u32,
        comparator: C,
        key_size: usize,
        leaf_max_size: Option<usize>,
        internal_max_size: Option<usize>,
    ) -> BTreeResult<BPlusTree<C>> {
        BPlusTree::with_max_sizes(
            index_id,
            Arc::clone(&self.pool),
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
        )
    }

    /// Ids of every index registered in the roots page
    pub fn index_ids(&self) -> BTreeResult<Vec<u32>> {
        Ok(roots::load(&self.pool)?.index_ids().collect())
    }

    /// Root page of `index_id`, None when the index is unknown or empty
    pub fn index_root(&self, index_id: u32) -> BTreeResult<Option<PageId>> {
        roots::load_root(&self.pool, index_id)
    }

    /// Free every page of `index_id` and unregister it.
    /// Returns false if no such index was registered.
    pub fn drop_index(&self, index_id: u32) -> BTreeResult<bool> {
        let directory = roots::load(&self.pool)?;
        if !directory.contains(index_id) {
            return Ok(false);
        }

        // Destroying never compares keys, so any comparator will do
        let key_size = match directory.get(index_id) {
            Some(root) => {
                let guard = self.pool.fetch_page(root)?;
                let header = TreePageHeader::decode(&guard.data())?;
                header.key_size
            }
            None => self.config.key_size,
        };
        let mut tree = self.open_index_with(index_id, BytewiseComparator, key_size, None, None)?;
        tree.destroy()?;

        info!(event = "engine.drop_index", index_id);
        Ok(true)
    }

    /// Write every dirty page and the disk metadata
    pub fn flush(&self) -> BTreeResult<()> {
        self.pool.flush_all()?;
        Ok(())
    }

    /// Flush everything and sync the file
    pub fn close(self) -> BTreeResult<()> {
        if !self.pool.check_all_unpinned() {
            return Err(BTreeError::InvalidState(
                "closing with pages still pinned".to_string(),
            ));
        }
        self.pool.close()?;
        info!(
            event = "engine.close",
            path = %self.config.db_file.display(),
            allocated_pages = self.pool.num_allocated_pages(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{GenericKey, IntegerComparator};
    use crate::file::RowId;

    fn config_in(temp_dir: &tempfile::TempDir) -> EngineConfig {
        EngineConfig {
            pool_size: 16,
            leaf_max_size: Some(4),
            internal_max_size: Some(4),
            ..EngineConfig::with_db_file(temp_dir.path().join("engine.db"))
        }
    }

    fn key(value: i64) -> Vec<u8> {
        GenericKey::from_i64(value, 8).unwrap().into_bytes()
    }

    #[test]
    fn test_fresh_file_reserves_pages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(config_in(&temp_dir)).unwrap();

        let pool = engine.buffer_pool();
        assert_eq!(pool.num_allocated_pages(), 2);
        assert!(!pool.is_page_free(CATALOG_META_PAGE_ID).unwrap());
        assert!(!pool.is_page_free(INDEX_ROOTS_PAGE_ID).unwrap());
        assert!(engine.index_ids().unwrap().is_empty());
        engine.close().unwrap();
    }

    #[test]
    fn test_reopen_keeps_indexes() {
        let temp_dir = tempfile::tempdir().unwrap();

        {
            let engine = StorageEngine::open(config_in(&temp_dir)).unwrap();
            let mut tree = engine.open_index(3, IntegerComparator::i64()).unwrap();
            for v in 0..100 {
                tree.insert(&key(v), RowId::new(v as u32, 1)).unwrap();
            }
            drop(tree);
            engine.close().unwrap();
        }

        let engine = StorageEngine::open(config_in(&temp_dir)).unwrap();
        assert_eq!(engine.index_ids().unwrap(), vec![3]);
        let tree = engine.open_index(3, IntegerComparator::i64()).unwrap();
        assert_eq!(tree.get_value(&key(77)).unwrap(), Some(RowId::new(77, 1)));
        assert_eq!(tree.check().unwrap().entries, 100);
    }

    #[test]
    fn test_drop_index() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(config_in(&temp_dir)).unwrap();

        let mut tree = engine.open_index(1, IntegerComparator::i64()).unwrap();
        for v in 0..50 {
            tree.insert(&key(v), RowId::new(1, v as u32)).unwrap();
        }
        drop(tree);
        assert!(engine.buffer_pool().num_allocated_pages() > 2);

        assert!(engine.drop_index(1).unwrap());
        assert!(!engine.drop_index(1).unwrap());
        assert_eq!(engine.buffer_pool().num_allocated_pages(), 2);
        assert_eq!(engine.index_root(1).unwrap(), None);
    }

    #[test]
    fn test_corrupt_roots_page_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = config_in(&temp_dir);

        {
            let engine = StorageEngine::open(config.clone()).unwrap();
            let mut guard = engine.buffer_pool().fetch_page(INDEX_ROOTS_PAGE_ID).unwrap();
            guard.data_mut().fill(0xAB);
            drop(guard);
            engine.close().unwrap();
        }

        assert!(matches!(
            StorageEngine::open(config),
            Err(BTreeError::CorruptPage {
                page_id: INDEX_ROOTS_PAGE_ID,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            pool_size: 0,
            ..config_in(&temp_dir)
        };
        assert!(matches!(
            StorageEngine::open(config),
            Err(BTreeError::InvalidState(_))
        ));
    }
}
