use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::bitmap::{BitmapPage, DiskMetaPage};
use super::error::{StorageError, StorageResult};
use super::{INVALID_PAGE_ID, PAGE_SIZE, PageId};

/// Physical page holding the disk meta page
const META_PHYSICAL_PAGE: u64 = 0;

/// Owns the database file and the logical -> physical page mapping.
///
/// The file is a meta page followed by extents. Each extent is one bitmap
/// page and `BitmapPage::capacity()` data pages, so the logical page id
/// space is dense while allocation state lives next to the data it tracks.
pub struct DiskManager {
    file: File,
    path: PathBuf,
    meta: DiskMetaPage,
    /// Call `sync_data` after every physical write
    sync_on_write: bool,
}

impl DiskManager {
    /// Open or create the database file at `path`
    pub fn open<P: AsRef<Path>>(path: P, sync_on_write: bool) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        // The file may live in a directory nobody has made yet
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut manager = Self {
            file,
            path,
            meta: DiskMetaPage::new(),
            sync_on_write,
        };

        let mut buf = vec![0u8; PAGE_SIZE];
        manager.read_physical(META_PHYSICAL_PAGE, &mut buf)?;
        manager.meta = DiskMetaPage::decode(&buf)?;

        debug!(
            event = "disk.open",
            path = %manager.path.display(),
            allocated = manager.meta.allocated_pages(),
            extents = manager.meta.num_extents(),
        );

        Ok(manager)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read logical page `page_id` into `buffer`.
    /// Pages past the end of the file read back as zeros.
    pub fn read_page(&mut self, page_id: PageId, buffer: &mut [u8]) -> StorageResult<()> {
        Self::check_buffer(buffer.len())?;
        let physical = Self::checked_map(page_id)?;
        self.read_physical(physical, buffer)
    }

    /// Write `buffer` to logical page `page_id`, extending the file if needed
    pub fn write_page(&mut self, page_id: PageId, buffer: &[u8]) -> StorageResult<()> {
        Self::check_buffer(buffer.len())?;
        let physical = Self::checked_map(page_id)?;
        self.write_physical(physical, buffer)
    }

    /// Reserve a free logical page id.
    ///
    /// Returns `INVALID_PAGE_ID` when every extent is full and no new
    /// extent can be described by the meta page.
    pub fn allocate_page(&mut self) -> StorageResult<PageId> {
        let extent_id = match self.meta.first_extent_with_space() {
            Some(extent_id) => extent_id,
            None => match self.meta.add_extent() {
                Some(extent_id) => extent_id,
                None => {
                    warn!(
                        event = "disk.full",
                        allocated = self.meta.allocated_pages(),
                    );
                    return Ok(INVALID_PAGE_ID);
                }
            },
        };

        let mut bitmap = self.read_bitmap(extent_id)?;
        let offset = bitmap.allocate_page().ok_or_else(|| {
            StorageError::CorruptMetadata(format!(
                "extent {} reports {} used pages but its bitmap is full",
                extent_id,
                self.meta.extent_used_pages(extent_id)
            ))
        })?;

        self.write_bitmap(extent_id, &bitmap)?;
        self.meta.record_allocation(extent_id);
        self.write_meta()?;

        let page_id = extent_id * BitmapPage::capacity() + offset;
        debug!(event = "disk.allocate", page_id, extent_id);
        Ok(page_id)
    }

    /// Release a logical page id. Returns false if it was not allocated.
    pub fn deallocate_page(&mut self, page_id: PageId) -> StorageResult<bool> {
        let (extent_id, offset) = Self::split_id(page_id);
        if page_id >= DiskMetaPage::max_valid_page_id() || extent_id >= self.meta.num_extents() {
            return Ok(false);
        }

        let mut bitmap = self.read_bitmap(extent_id)?;
        if !bitmap.deallocate_page(offset) {
            return Ok(false);
        }

        self.write_bitmap(extent_id, &bitmap)?;
        self.meta.record_deallocation(extent_id);
        self.write_meta()?;

        debug!(event = "disk.deallocate", page_id, extent_id);
        Ok(true)
    }

    pub fn is_page_free(&mut self, page_id: PageId) -> StorageResult<bool> {
        let (extent_id, offset) = Self::split_id(page_id);
        if page_id >= DiskMetaPage::max_valid_page_id() || extent_id >= self.meta.num_extents() {
            return Ok(true);
        }

        let bitmap = self.read_bitmap(extent_id)?;
        Ok(bitmap.is_page_free(offset))
    }

    /// Physical page number of logical page `page_id`
    pub fn map_page_id(page_id: PageId) -> u64 {
        let (extent_id, offset) = Self::split_id(page_id);
        let extent_id = extent_id as u64;
        2 + extent_id + extent_id * BitmapPage::capacity() as u64 + offset as u64
    }

    /// Persist the meta page and sync the file
    pub fn close(&mut self) -> StorageResult<()> {
        self.write_meta()?;
        self.file.sync_all()?;
        debug!(event = "disk.close", path = %self.path.display());
        Ok(())
    }

    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    pub fn num_allocated_pages(&self) -> u32 {
        self.meta.allocated_pages()
    }

    pub fn num_extents(&self) -> u32 {
        self.meta.num_extents()
    }

    fn split_id(page_id: PageId) -> (u32, u32) {
        let capacity = BitmapPage::capacity();
        (page_id / capacity, page_id % capacity)
    }

    fn checked_map(page_id: PageId) -> StorageResult<u64> {
        if page_id >= DiskMetaPage::max_valid_page_id() {
            return Err(StorageError::InvalidPageId(page_id));
        }
        Ok(Self::map_page_id(page_id))
    }

    fn check_buffer(len: usize) -> StorageResult<()> {
        if len != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: len,
            });
        }
        Ok(())
    }

    fn bitmap_physical_page(extent_id: u32) -> u64 {
        1 + extent_id as u64 * (1 + BitmapPage::capacity() as u64)
    }

    fn read_bitmap(&mut self, extent_id: u32) -> StorageResult<BitmapPage> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.read_physical(Self::bitmap_physical_page(extent_id), &mut buf)?;
        BitmapPage::decode(&buf)
    }

    fn write_bitmap(&mut self, extent_id: u32, bitmap: &BitmapPage) -> StorageResult<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        bitmap.encode(&mut buf);
        self.write_physical(Self::bitmap_physical_page(extent_id), &buf)
    }

    fn write_meta(&mut self) -> StorageResult<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.meta.encode(&mut buf);
        self.write_physical(META_PHYSICAL_PAGE, &buf)
    }

    fn read_physical(&mut self, physical: u64, buffer: &mut [u8]) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(physical * PAGE_SIZE as u64))?;

        let mut filled = 0;
        while filled < buffer.len() {
            match self.file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        // Short read past EOF, fill the rest with zeros
        buffer[filled..].fill(0);
        Ok(())
    }

    fn write_physical(&mut self, physical: u64, buffer: &[u8]) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(physical * PAGE_SIZE as u64))?;
        self.file.write_all(buffer)?;
        self.file.flush()?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn open_manager(dir: &TempDir) -> DiskManager {
        DiskManager::open(dir.path().join("test.db"), false).unwrap()
    }

    #[test]
    fn test_open_creates_file() {
        let temp_dir = setup_test_dir();
        let path = temp_dir.path().join("nested").join("test.db");

        let manager = DiskManager::open(&path, false).unwrap();
        assert!(path.exists());
        assert_eq!(manager.num_allocated_pages(), 0);
        assert_eq!(manager.num_extents(), 0);
    }

    #[test]
    fn test_map_page_id() {
        let capacity = BitmapPage::capacity();
        assert_eq!(DiskManager::map_page_id(0), 2);
        assert_eq!(DiskManager::map_page_id(5), 7);
        assert_eq!(
            DiskManager::map_page_id(capacity - 1),
            capacity as u64 + 1
        );
        // First page of the second extent sits after its bitmap page
        assert_eq!(DiskManager::map_page_id(capacity), capacity as u64 + 3);
        assert_eq!(
            DiskManager::bitmap_physical_page(1),
            capacity as u64 + 2
        );
    }

    #[test]
    fn test_allocate_sequential_ids() {
        let temp_dir = setup_test_dir();
        let mut manager = open_manager(&temp_dir);

        for expected in 0..16 {
            assert_eq!(manager.allocate_page().unwrap(), expected);
        }
        assert_eq!(manager.num_allocated_pages(), 16);
        assert_eq!(manager.num_extents(), 1);
    }

    #[test]
    fn test_deallocate_and_reuse() {
        let temp_dir = setup_test_dir();
        let mut manager = open_manager(&temp_dir);

        for _ in 0..4 {
            manager.allocate_page().unwrap();
        }
        assert!(!manager.is_page_free(2).unwrap());

        assert!(manager.deallocate_page(2).unwrap());
        assert!(manager.is_page_free(2).unwrap());
        assert_eq!(manager.num_allocated_pages(), 3);

        // Freeing twice leaves the counters alone
        assert!(!manager.deallocate_page(2).unwrap());
        assert_eq!(manager.num_allocated_pages(), 3);

        assert_eq!(manager.allocate_page().unwrap(), 2);
    }

    #[test]
    fn test_unknown_extent_is_free() {
        let temp_dir = setup_test_dir();
        let mut manager = open_manager(&temp_dir);

        assert!(manager.is_page_free(BitmapPage::capacity() * 3).unwrap());
        assert!(!manager.deallocate_page(BitmapPage::capacity() * 3).unwrap());
    }

    #[test]
    fn test_read_write_page() {
        let temp_dir = setup_test_dir();
        let mut manager = open_manager(&temp_dir);
        let page_id = manager.allocate_page().unwrap();

        let mut write_buffer = vec![0u8; PAGE_SIZE];
        write_buffer[0] = 42;
        write_buffer[100] = 99;
        write_buffer[PAGE_SIZE - 1] = 255;
        manager.write_page(page_id, &write_buffer).unwrap();

        let mut read_buffer = vec![0u8; PAGE_SIZE];
        manager.read_page(page_id, &mut read_buffer).unwrap();
        assert_eq!(read_buffer, write_buffer);
    }

    #[test]
    fn test_read_past_eof_is_zeroed() {
        let temp_dir = setup_test_dir();
        let mut manager = open_manager(&temp_dir);

        let mut buffer = vec![7u8; PAGE_SIZE];
        manager.read_page(100, &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_buffer_size() {
        let temp_dir = setup_test_dir();
        let mut manager = open_manager(&temp_dir);

        let mut small = vec![0u8; 100];
        let result = manager.read_page(0, &mut small);
        assert!(matches!(result, Err(StorageError::InvalidPageSize { .. })));
    }

    #[test]
    fn test_out_of_range_page_id() {
        let temp_dir = setup_test_dir();
        let mut manager = open_manager(&temp_dir);

        let mut buffer = vec![0u8; PAGE_SIZE];
        let result = manager.read_page(DiskMetaPage::max_valid_page_id(), &mut buffer);
        assert!(matches!(result, Err(StorageError::InvalidPageId(_))));
    }

    /// Open a database file whose meta page claims every page is in use
    pub(crate) fn open_full_disk(dir: &TempDir) -> DiskManager {
        let path = dir.path().join("full.db");
        let mut buf = vec![0u8; PAGE_SIZE];
        DiskMetaPage::full().encode(&mut buf);
        std::fs::write(&path, &buf).unwrap();
        DiskManager::open(&path, false).unwrap()
    }

    #[test]
    fn test_allocate_on_full_disk_returns_invalid() {
        let dir = setup_test_dir();
        let mut dm = open_full_disk(&dir);

        assert_eq!(dm.num_extents(), DiskMetaPage::max_extents());
        assert_eq!(dm.num_allocated_pages(), DiskMetaPage::max_valid_page_id());
        assert_eq!(dm.allocate_page().unwrap(), INVALID_PAGE_ID);
        // Nothing was recorded for the failed attempt
        assert_eq!(dm.num_allocated_pages(), DiskMetaPage::max_valid_page_id());
        assert_eq!(dm.allocate_page().unwrap(), INVALID_PAGE_ID);
    }

    #[test]
    fn test_meta_survives_reopen() {
        let temp_dir = setup_test_dir();
        let path = temp_dir.path().join("test.db");

        {
            let mut manager = DiskManager::open(&path, true).unwrap();
            for _ in 0..10 {
                manager.allocate_page().unwrap();
            }
            manager.deallocate_page(4).unwrap();
            let buffer = vec![9u8; PAGE_SIZE];
            manager.write_page(3, &buffer).unwrap();
            manager.close().unwrap();
        }

        let mut manager = DiskManager::open(&path, false).unwrap();
        assert_eq!(manager.num_allocated_pages(), 9);
        assert_eq!(manager.num_extents(), 1);
        assert!(manager.is_page_free(4).unwrap());
        assert!(!manager.is_page_free(3).unwrap());

        let mut buffer = vec![0u8; PAGE_SIZE];
        manager.read_page(3, &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 9));

        assert_eq!(manager.allocate_page().unwrap(), 4);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_allocator_round_trip(frees in proptest::collection::vec(0u32..64, 0..32)) {
            let temp_dir = setup_test_dir();
            let mut manager = open_manager(&temp_dir);

            let mut allocated = Vec::new();
            for _ in 0..64 {
                let page_id = manager.allocate_page().unwrap();
                prop_assert!(!manager.is_page_free(page_id).unwrap());
                allocated.push(page_id);
            }

            let mut freed = std::collections::BTreeSet::new();
            for page_id in frees {
                let released = manager.deallocate_page(page_id).unwrap();
                prop_assert_eq!(released, freed.insert(page_id));
                prop_assert!(manager.is_page_free(page_id).unwrap());
            }

            for &page_id in &allocated {
                prop_assert_eq!(manager.is_page_free(page_id).unwrap(), freed.contains(&page_id));
            }
            prop_assert_eq!(manager.num_allocated_pages() as usize, 64 - freed.len());

            // A new allocation never hands out a live page
            for _ in 0..freed.len() {
                let page_id = manager.allocate_page().unwrap();
                prop_assert!(freed.contains(&page_id) || page_id >= 64);
                freed.remove(&page_id);
            }
        }
    }
}
