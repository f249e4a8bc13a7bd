use std::collections::VecDeque;

use ahash::AHashMap;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use tracing::{debug, error, warn};

use super::disk_manager::DiskManager;
use super::error::{StorageError, StorageResult};
use super::replacer::{LruReplacer, Replacer};
use super::{FrameId, INVALID_PAGE_ID, PAGE_SIZE, PageId};

type PageData = [u8; PAGE_SIZE];

/// Bookkeeping for one frame
#[derive(Debug, Clone, Copy, Default)]
struct FrameMeta {
    page_id: Option<PageId>,
    pin_count: u32,
    dirty: bool,
}

/// Everything the pool mutates together under one lock
struct PoolState {
    /// Resident page -> frame
    page_table: AHashMap<PageId, FrameId>,
    /// Frames holding no page
    free_list: VecDeque<FrameId>,
    meta: Vec<FrameMeta>,
    replacer: Box<dyn Replacer>,
}

/// Fixed-size cache of pages over a `DiskManager`.
///
/// Pages are handed out as `PageGuard`s. A guard keeps its page pinned
/// (resident and never evicted) until it is dropped. Frame bytes sit behind
/// per-frame locks so page contents can be read and written without holding
/// the pool lock.
///
/// Lock order is pool state, then frame, then disk. Never call back into the
/// pool while holding a `data()` / `data_mut()` borrow of the same page.
pub struct BufferPoolManager {
    frames: Vec<RwLock<Box<PageData>>>,
    state: Mutex<PoolState>,
    disk: Mutex<DiskManager>,
}

impl BufferPoolManager {
    /// Create a buffer pool with an LRU replacer
    pub fn new(disk: DiskManager, pool_size: usize) -> Self {
        Self::with_replacer(disk, pool_size, Box::new(LruReplacer::new()))
    }

    /// Create a buffer pool with a custom replacement policy
    pub fn with_replacer(disk: DiskManager, pool_size: usize, replacer: Box<dyn Replacer>) -> Self {
        let frames = (0..pool_size)
            .map(|_| RwLock::new(Box::new([0u8; PAGE_SIZE])))
            .collect();

        Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: AHashMap::with_capacity(pool_size),
                free_list: (0..pool_size).collect(),
                meta: vec![FrameMeta::default(); pool_size],
                replacer,
            }),
            disk: Mutex::new(disk),
        }
    }

    /// Pin `page_id`, reading it from disk if it is not resident
    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageGuard<'_>> {
        if page_id == INVALID_PAGE_ID {
            return Err(StorageError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.meta[frame_id].pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(PageGuard::new(self, frame_id, page_id, false));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let loaded = {
            let mut data = self.frames[frame_id].write();
            self.disk.lock().read_page(page_id, &mut data[..])
        };
        if let Err(e) = loaded {
            state.free_list.push_back(frame_id);
            return Err(e);
        }

        self.install(&mut state, frame_id, page_id, false);
        Ok(PageGuard::new(self, frame_id, page_id, false))
    }

    /// Allocate a fresh page on disk and pin a zeroed frame for it
    pub fn new_page(&self) -> StorageResult<PageGuard<'_>> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;

        let page_id = match self.disk.lock().allocate_page() {
            Ok(INVALID_PAGE_ID) => {
                state.free_list.push_back(frame_id);
                warn!(event = "buffer_pool.disk_full");
                return Err(StorageError::DiskFull);
            }
            Ok(page_id) => page_id,
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        // A page deallocated behind the pool's back may still be cached
        if let Some(&stale) = state.page_table.get(&page_id) {
            if state.meta[stale].pin_count > 0 {
                state.free_list.push_back(frame_id);
                return Err(StorageError::CorruptMetadata(format!(
                    "page {} was reallocated while still pinned",
                    page_id
                )));
            }
            Self::discard_frame(&mut state, stale);
        }

        self.frames[frame_id].write().fill(0);
        // New pages are dirty so the zeroed image reaches disk
        self.install(&mut state, frame_id, page_id, true);

        debug!(event = "buffer_pool.new_page", page_id, frame_id);
        Ok(PageGuard::new(self, frame_id, page_id, false))
    }

    /// Drop one pin on `page_id`. Returns false if it is not resident.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let meta = &mut state.meta[frame_id];
        meta.dirty |= is_dirty;
        meta.pin_count = meta.pin_count.saturating_sub(1);
        if meta.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    /// Drop `page_id` from the pool and release it on disk.
    ///
    /// Returns false, without touching the disk, while the page is pinned.
    /// A page that is not resident is still released and reported as
    /// deleted, so deleting twice is not an error.
    pub fn delete_page(&self, page_id: PageId) -> StorageResult<bool> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let pin_count = state.meta[frame_id].pin_count;
            if pin_count > 0 {
                debug!(event = "buffer_pool.delete_pinned", page_id, pin_count);
                return Ok(false);
            }
            Self::discard_frame(&mut state, frame_id);
        }

        self.disk.lock().deallocate_page(page_id)?;
        debug!(event = "buffer_pool.delete", page_id);
        Ok(true)
    }

    /// Write `page_id` to disk whether or not it is dirty.
    /// Returns false if it is not resident.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<bool> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };

        self.write_frame(frame_id, page_id)?;
        state.meta[frame_id].dirty = false;
        Ok(true)
    }

    /// Write every dirty resident page and sync the file
    pub fn flush_all(&self) -> StorageResult<()> {
        let mut state = self.state.lock();

        let mut flushed = 0usize;
        for frame_id in 0..state.meta.len() {
            let meta = state.meta[frame_id];
            if let (Some(page_id), true) = (meta.page_id, meta.dirty) {
                self.write_frame(frame_id, page_id)?;
                state.meta[frame_id].dirty = false;
                flushed += 1;
            }
        }

        self.disk.lock().sync()?;
        debug!(event = "buffer_pool.flush_all", flushed);
        Ok(())
    }

    /// Flush everything, then persist disk metadata and sync
    pub fn close(&self) -> StorageResult<()> {
        self.flush_all()?;
        self.disk.lock().close()
    }

    /// Debug aid: logs every page that still holds a pin.
    /// Returns true when nothing is pinned.
    pub fn check_all_unpinned(&self) -> bool {
        let state = self.state.lock();

        let mut all_unpinned = true;
        for (frame_id, meta) in state.meta.iter().enumerate() {
            if let (Some(page_id), pins) = (meta.page_id, meta.pin_count) {
                if pins > 0 {
                    error!(event = "buffer_pool.pin_leak", page_id, frame_id, pin_count = pins);
                    all_unpinned = false;
                }
            }
        }
        all_unpinned
    }

    /// Reserve a page id on disk without caching it
    pub fn allocate_page(&self) -> StorageResult<PageId> {
        let page_id = self.disk.lock().allocate_page()?;
        if page_id == INVALID_PAGE_ID {
            warn!(event = "buffer_pool.disk_full");
            return Err(StorageError::DiskFull);
        }
        Ok(page_id)
    }

    /// Release a page id on disk. Cached copies are left to `delete_page`.
    pub fn deallocate_page(&self, page_id: PageId) -> StorageResult<bool> {
        self.disk.lock().deallocate_page(page_id)
    }

    pub fn is_page_free(&self, page_id: PageId) -> StorageResult<bool> {
        self.disk.lock().is_page_free(page_id)
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Pin count of a resident page
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.meta[frame_id].pin_count)
    }

    pub fn num_allocated_pages(&self) -> u32 {
        self.disk.lock().num_allocated_pages()
    }

    /// Take a frame from the free list, else evict the replacer's victim
    fn acquire_frame(&self, state: &mut PoolState) -> StorageResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.victim() else {
            warn!(event = "buffer_pool.exhausted", pool_size = self.frames.len());
            return Err(StorageError::BufferPoolExhausted {
                pool_size: self.frames.len(),
            });
        };

        let victim = state.meta[frame_id];
        if let Some(old_page_id) = victim.page_id {
            if victim.dirty {
                if let Err(e) = self.write_frame(frame_id, old_page_id) {
                    state.replacer.restore_victim(frame_id);
                    return Err(e);
                }
            }
            state.page_table.remove(&old_page_id);
            debug!(
                event = "buffer_pool.evict",
                page_id = old_page_id,
                frame_id,
                dirty = victim.dirty,
            );
        }

        state.meta[frame_id] = FrameMeta::default();
        Ok(frame_id)
    }

    fn install(&self, state: &mut PoolState, frame_id: FrameId, page_id: PageId, dirty: bool) {
        state.page_table.insert(page_id, frame_id);
        state.meta[frame_id] = FrameMeta {
            page_id: Some(page_id),
            pin_count: 1,
            dirty,
        };
        state.replacer.pin(frame_id);
    }

    /// Forget an unpinned frame's page and return it to the free list
    fn discard_frame(state: &mut PoolState, frame_id: FrameId) {
        if let Some(page_id) = state.meta[frame_id].page_id {
            state.page_table.remove(&page_id);
        }
        state.meta[frame_id] = FrameMeta::default();
        state.replacer.pin(frame_id);
        state.free_list.push_back(frame_id);
    }

    fn write_frame(&self, frame_id: FrameId, page_id: PageId) -> StorageResult<()> {
        let data = self.frames[frame_id].read();
        self.disk.lock().write_page(page_id, &data[..])
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            error!(event = "buffer_pool.flush_on_drop", error = %e);
        }
    }
}

/// A pinned page. Dropping the guard releases the pin exactly once,
/// reporting the page dirty if `data_mut` was ever called.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    dirty: bool,
}

impl<'a> PageGuard<'a> {
    fn new(pool: &'a BufferPoolManager, frame_id: FrameId, page_id: PageId, dirty: bool) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            dirty,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Shared view of the page bytes. The view borrows the guard, so it
    /// cannot outlive the pin.
    ///
    /// ```compile_fail
    /// use tessera::file::{BufferPoolManager, DiskManager};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let disk = DiskManager::open(dir.path().join("view.db"), false).unwrap();
    /// let pool = BufferPoolManager::new(disk, 1);
    /// let view = {
    ///     let guard = pool.new_page().unwrap();
    ///     guard.data()
    /// };
    /// assert_eq!(view[0], 0);
    /// ```
    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.pool.frames[self.frame_id].read(), |data| &data[..])
    }

    /// Exclusive view of the page bytes; marks the page dirty
    pub fn data_mut(&mut self) -> MappedRwLockWriteGuard<'_, [u8]> {
        self.dirty = true;
        RwLockWriteGuard::map(self.pool.frames[self.frame_id].write(), |data| &mut data[..])
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame_id)
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn setup_pool(pool_size: usize) -> (TempDir, BufferPoolManager) {
        let temp_dir = tempfile::tempdir().unwrap();
        let disk = DiskManager::open(temp_dir.path().join("test.db"), false).unwrap();
        (temp_dir, BufferPoolManager::new(disk, pool_size))
    }

    /// Allocate `count` pages and write a marker byte into each
    fn populate(pool: &BufferPoolManager, count: usize) -> Vec<PageId> {
        (0..count)
            .map(|i| {
                let mut page = pool.new_page().unwrap();
                page.data_mut()[0] = i as u8 + 1;
                page.page_id()
            })
            .collect()
    }

    #[test]
    fn test_new_page_is_zeroed_and_pinned() {
        let (_dir, pool) = setup_pool(4);

        let page = pool.new_page().unwrap();
        assert!(page.data().iter().all(|&b| b == 0));
        assert_eq!(pool.pin_count(page.page_id()), Some(1));
        assert_eq!(pool.free_frame_count(), 3);

        let page_id = page.page_id();
        drop(page);
        assert_eq!(pool.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_fetch_resident_increments_pin() {
        let (_dir, pool) = setup_pool(4);
        let page_id = populate(&pool, 1)[0];

        let a = pool.fetch_page(page_id).unwrap();
        let b = pool.fetch_page(page_id).unwrap();
        assert_eq!(pool.pin_count(page_id), Some(2));
        assert_eq!(a.data()[0], 1);

        drop(a);
        assert_eq!(pool.pin_count(page_id), Some(1));
        drop(b);
        assert_eq!(pool.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_exhausted_pool_then_evicts_after_unpin() {
        let (_dir, pool) = setup_pool(2);
        let ids = populate(&pool, 3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        let page_a = pool.fetch_page(a).unwrap();
        let page_b = pool.fetch_page(b).unwrap();

        let result = pool.fetch_page(c);
        assert!(matches!(
            result,
            Err(StorageError::BufferPoolExhausted { pool_size: 2 })
        ));

        drop(page_a);
        let page_c = pool.fetch_page(c).unwrap();
        assert_eq!(page_c.data()[0], 3);
        assert!(!pool.is_resident(a));
        assert!(pool.is_resident(b));

        // A's marker survived eviction
        drop(page_b);
        drop(page_c);
        let page_a = pool.fetch_page(a).unwrap();
        assert_eq!(page_a.data()[0], 1);
    }

    #[test]
    fn test_dirty_victim_is_flushed() {
        let (_dir, pool) = setup_pool(1);

        let first = {
            let mut page = pool.new_page().unwrap();
            page.data_mut()[10] = 0xAB;
            page.page_id()
        };
        let second = pool.new_page().unwrap().page_id();
        assert!(!pool.is_resident(first));

        let page = pool.fetch_page(first).unwrap();
        assert_eq!(page.data()[10], 0xAB);
        drop(page);
        assert!(!pool.is_resident(second));
    }

    #[test]
    fn test_unpin_semantics() {
        let (_dir, pool) = setup_pool(2);
        let page_id = populate(&pool, 1)[0];

        assert!(!pool.unpin_page(999, false));

        // Clamped at zero
        assert!(pool.unpin_page(page_id, false));
        assert_eq!(pool.pin_count(page_id), Some(0));

        let page = pool.fetch_page(page_id).unwrap();
        std::mem::forget(page);
        assert_eq!(pool.pin_count(page_id), Some(1));
        assert!(pool.unpin_page(page_id, true));
        assert_eq!(pool.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_delete_page() {
        let (_dir, pool) = setup_pool(4);
        let page = pool.new_page().unwrap();
        let page_id = page.page_id();

        // Pinned pages are refused and stay allocated
        assert!(!pool.delete_page(page_id).unwrap());
        assert!(!pool.is_page_free(page_id).unwrap());

        drop(page);
        assert!(pool.delete_page(page_id).unwrap());
        assert!(!pool.is_resident(page_id));
        assert!(pool.is_page_free(page_id).unwrap());
        assert_eq!(pool.free_frame_count(), 4);

        // Deleting again is still a success
        assert!(pool.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_deleted_page_id_is_reused_zeroed() {
        let (_dir, pool) = setup_pool(4);
        let page_id = populate(&pool, 1)[0];
        pool.flush_page(page_id).unwrap();
        pool.delete_page(page_id).unwrap();

        let page = pool.new_page().unwrap();
        assert_eq!(page.page_id(), page_id);
        assert_eq!(page.data()[0], 0);
    }

    #[test]
    fn test_flush_page() {
        let (_dir, pool) = setup_pool(2);
        let page_id = populate(&pool, 1)[0];

        assert!(pool.flush_page(page_id).unwrap());
        assert!(!pool.flush_page(4242).unwrap());
    }

    #[test]
    fn test_at_most_one_frame_per_page() {
        let (_dir, pool) = setup_pool(3);
        let ids = populate(&pool, 6);

        for &page_id in ids.iter().chain(ids.iter().rev()) {
            let page = pool.fetch_page(page_id).unwrap();
            let again = pool.fetch_page(page_id).unwrap();
            assert_eq!(page.frame_id, again.frame_id);
        }

        let state = pool.state.lock();
        let mut seen = ahash::AHashSet::new();
        for meta in &state.meta {
            if let Some(page_id) = meta.page_id {
                assert!(seen.insert(page_id));
                let frame_id = state.page_table[&page_id];
                assert_eq!(state.meta[frame_id].page_id, Some(page_id));
            }
        }
    }

    #[test]
    fn test_check_all_unpinned() {
        let (_dir, pool) = setup_pool(2);
        let page = pool.new_page().unwrap();
        assert!(!pool.check_all_unpinned());
        drop(page);
        assert!(pool.check_all_unpinned());
    }

    #[test]
    fn test_drop_flushes_to_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test.db");

        let page_id = {
            let disk = DiskManager::open(&path, false).unwrap();
            let pool = BufferPoolManager::new(disk, 4);
            let mut page = pool.new_page().unwrap();
            page.data_mut()[PAGE_SIZE - 1] = 77;
            page.page_id()
        };

        let disk = DiskManager::open(&path, false).unwrap();
        let pool = BufferPoolManager::new(disk, 4);
        let page = pool.fetch_page(page_id).unwrap();
        assert_eq!(page.data()[PAGE_SIZE - 1], 77);
    }

    #[test]
    fn test_new_page_on_full_disk() {
        let dir = tempfile::tempdir().unwrap();
        let disk = crate::file::disk_manager::tests::open_full_disk(&dir);
        let pool = BufferPoolManager::new(disk, 2);

        assert!(matches!(pool.new_page(), Err(StorageError::DiskFull)));
        assert_eq!(pool.free_frame_count(), 2);
        assert!(matches!(pool.allocate_page(), Err(StorageError::DiskFull)));

        // The frame went back to the free list and is still usable
        let page = pool.fetch_page(0).unwrap();
        assert_eq!(pool.free_frame_count(), 1);
        drop(page);
        assert!(matches!(pool.new_page(), Err(StorageError::DiskFull)));
        assert_eq!(pool.free_frame_count(), 1);
    }

    #[test]
    fn test_released_page_is_evictable_in_single_frame_pool() {
        let (_dir, pool) = setup_pool(1);

        let first = {
            let mut page = pool.new_page().unwrap();
            page.data_mut()[0] = 9;
            let view = page.data();
            assert_eq!(view[0], 9);
            drop(view);
            page.page_id()
        };
        assert_eq!(pool.pin_count(first), Some(0));

        // The only frame is free to be reused once the guard is gone
        let second = pool.new_page().unwrap();
        assert_ne!(second.page_id(), first);
        assert!(!pool.is_resident(first));
        drop(second);

        let page = pool.fetch_page(first).unwrap();
        assert_eq!(page.data()[0], 9);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_pins_never_negative_and_pinned_never_evicted(
            ops in proptest::collection::vec((0usize..6, any::<bool>()), 1..64)
        ) {
            let (_dir, pool) = setup_pool(3);
            let ids = populate(&pool, 6);
            let mut held: Vec<PageGuard<'_>> = Vec::new();

            for (index, fetch) in ops {
                if fetch {
                    match pool.fetch_page(ids[index]) {
                        Ok(guard) => held.push(guard),
                        Err(StorageError::BufferPoolExhausted { .. }) => {
                            let pinned: ahash::AHashSet<_> =
                                held.iter().map(|g| g.page_id()).collect();
                            prop_assert_eq!(pinned.len(), 3);
                        }
                        Err(e) => return Err(TestCaseError::fail(e.to_string())),
                    }
                } else if !held.is_empty() {
                    held.remove(index % held.len());
                }

                for guard in &held {
                    prop_assert!(pool.is_resident(guard.page_id()));
                    prop_assert!(pool.pin_count(guard.page_id()).unwrap() >= 1);
                }
            }
        }
    }
}
