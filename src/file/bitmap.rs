//! Allocation metadata pages of the page file: the per-extent bitmap page
//! and the file-wide meta page at physical offset 0.

use super::error::{StorageError, StorageResult};
use super::{PAGE_SIZE, read_u32, write_u32};

/// Bitmap page header: allocated count (4 bytes) + next free hint (4 bytes)
const BITMAP_HEADER_SIZE: usize = 8;

/// Bytes available for allocation bits in one bitmap page
const BITMAP_BYTES: usize = PAGE_SIZE - BITMAP_HEADER_SIZE;

/// Meta page header: allocated pages (4 bytes) + extent count (4 bytes)
const META_HEADER_SIZE: usize = 8;

/// Free/used bits for one extent.
///
/// Bit `i` (most significant bit first within each byte) is set when
/// page `i` of the extent is allocated. `next_free_page` is a hint: it
/// points at a free slot whenever one exists, but a stale hint is
/// tolerated and re-scanned on allocation.
#[derive(Debug, Clone)]
pub struct BitmapPage {
    page_allocated: u32,
    next_free_page: u32,
    bytes: Vec<u8>,
}

impl BitmapPage {
    /// Number of pages one bitmap page can track
    pub const fn capacity() -> u32 {
        (BITMAP_BYTES * 8) as u32
    }

    pub fn new() -> Self {
        Self {
            page_allocated: 0,
            next_free_page: 0,
            bytes: vec![0u8; BITMAP_BYTES],
        }
    }

    pub fn decode(buf: &[u8]) -> StorageResult<Self> {
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let page_allocated = read_u32(buf, 0);
        let next_free_page = read_u32(buf, 4);
        if page_allocated > Self::capacity() {
            return Err(StorageError::CorruptMetadata(format!(
                "bitmap page claims {} allocated pages (capacity {})",
                page_allocated,
                Self::capacity()
            )));
        }

        Ok(Self {
            page_allocated,
            next_free_page: next_free_page % Self::capacity(),
            bytes: buf[BITMAP_HEADER_SIZE..].to_vec(),
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        write_u32(buf, 0, self.page_allocated);
        write_u32(buf, 4, self.next_free_page);
        buf[BITMAP_HEADER_SIZE..].copy_from_slice(&self.bytes);
    }

    pub fn allocated(&self) -> u32 {
        self.page_allocated
    }

    pub fn next_free_hint(&self) -> u32 {
        self.next_free_page
    }

    /// Take a free slot, returning its offset in the extent.
    /// Returns None when every slot is in use.
    pub fn allocate_page(&mut self) -> Option<u32> {
        if self.page_allocated == Self::capacity() {
            return None;
        }

        if !self.is_page_free(self.next_free_page) {
            self.next_free_page = self.scan_free_from(self.next_free_page)?;
        }

        let offset = self.next_free_page;
        self.set_bit(offset);
        self.page_allocated += 1;

        if self.page_allocated < Self::capacity() {
            if let Some(next) = self.scan_free_from(offset) {
                self.next_free_page = next;
            }
        }

        Some(offset)
    }

    /// Clear the bit for `offset`. Returns false if it was already free.
    pub fn deallocate_page(&mut self, offset: u32) -> bool {
        if offset >= Self::capacity() || self.is_page_free(offset) {
            return false;
        }

        self.clear_bit(offset);
        self.page_allocated -= 1;
        self.next_free_page = offset;
        true
    }

    pub fn is_page_free(&self, offset: u32) -> bool {
        let (byte, mask) = Self::locate(offset);
        self.bytes[byte] & mask == 0
    }

    /// Find the first free slot after `start`, wrapping around
    fn scan_free_from(&self, start: u32) -> Option<u32> {
        let capacity = Self::capacity();
        (1..=capacity)
            .map(|step| (start + step) % capacity)
            .find(|&offset| self.is_page_free(offset))
    }

    fn set_bit(&mut self, offset: u32) {
        let (byte, mask) = Self::locate(offset);
        self.bytes[byte] |= mask;
    }

    fn clear_bit(&mut self, offset: u32) {
        let (byte, mask) = Self::locate(offset);
        self.bytes[byte] &= !mask;
    }

    fn locate(offset: u32) -> (usize, u8) {
        ((offset >> 3) as usize, 1u8 << (7 - (offset & 0x7)))
    }
}

impl Default for BitmapPage {
    fn default() -> Self {
        Self::new()
    }
}

/// File-wide allocation summary stored at physical page 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskMetaPage {
    num_allocated_pages: u32,
    extent_used_page: Vec<u32>,
}

impl DiskMetaPage {
    /// Maximum number of extents one meta page can describe
    pub const fn max_extents() -> u32 {
        ((PAGE_SIZE - META_HEADER_SIZE) / 4) as u32
    }

    /// Number of logical pages the file can ever address
    pub const fn max_valid_page_id() -> u32 {
        Self::max_extents() * BitmapPage::capacity()
    }

    pub fn new() -> Self {
        Self {
            num_allocated_pages: 0,
            extent_used_page: Vec::new(),
        }
    }

    pub fn decode(buf: &[u8]) -> StorageResult<Self> {
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let num_allocated_pages = read_u32(buf, 0);
        let num_extents = read_u32(buf, 4);
        if num_extents > Self::max_extents() {
            return Err(StorageError::CorruptMetadata(format!(
                "meta page lists {} extents (max {})",
                num_extents,
                Self::max_extents()
            )));
        }

        let extent_used_page: Vec<u32> = (0..num_extents as usize)
            .map(|i| read_u32(buf, META_HEADER_SIZE + i * 4))
            .collect();

        if extent_used_page.iter().any(|&used| used > BitmapPage::capacity()) {
            return Err(StorageError::CorruptMetadata(
                "extent used-page counter exceeds extent capacity".to_string(),
            ));
        }

        Ok(Self {
            num_allocated_pages,
            extent_used_page,
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        write_u32(buf, 0, self.num_allocated_pages);
        write_u32(buf, 4, self.extent_used_page.len() as u32);
        for (i, &used) in self.extent_used_page.iter().enumerate() {
            write_u32(buf, META_HEADER_SIZE + i * 4, used);
        }
    }

    pub fn allocated_pages(&self) -> u32 {
        self.num_allocated_pages
    }

    pub fn num_extents(&self) -> u32 {
        self.extent_used_page.len() as u32
    }

    pub fn extent_used_pages(&self, extent_id: u32) -> u32 {
        self.extent_used_page
            .get(extent_id as usize)
            .copied()
            .unwrap_or(0)
    }

    /// First extent with room left, if any
    pub fn first_extent_with_space(&self) -> Option<u32> {
        self.extent_used_page
            .iter()
            .position(|&used| used < BitmapPage::capacity())
            .map(|i| i as u32)
    }

    /// Open a new, empty extent and return its id
    pub fn add_extent(&mut self) -> Option<u32> {
        if self.num_extents() >= Self::max_extents() {
            return None;
        }
        self.extent_used_page.push(0);
        Some(self.num_extents() - 1)
    }

    pub fn record_allocation(&mut self, extent_id: u32) {
        self.extent_used_page[extent_id as usize] += 1;
        self.num_allocated_pages += 1;
    }

    pub fn record_deallocation(&mut self, extent_id: u32) {
        let used = &mut self.extent_used_page[extent_id as usize];
        *used = used.saturating_sub(1);
        self.num_allocated_pages = self.num_allocated_pages.saturating_sub(1);
    }
}

impl Default for DiskMetaPage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl DiskMetaPage {
    /// Meta page of a file whose every addressable page is allocated
    pub(crate) fn full() -> Self {
        Self {
            num_allocated_pages: Self::max_valid_page_id(),
            extent_used_page: vec![BitmapPage::capacity(); Self::max_extents() as usize],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_allocate_sequential() {
        let mut bitmap = BitmapPage::new();

        for expected in 0..10 {
            assert_eq!(bitmap.allocate_page(), Some(expected));
        }
        assert_eq!(bitmap.allocated(), 10);
        assert_eq!(bitmap.next_free_hint(), 10);
        assert!(!bitmap.is_page_free(3));
        assert!(bitmap.is_page_free(10));
    }

    #[test]
    fn test_bitmap_deallocate_reuses_slot() {
        let mut bitmap = BitmapPage::new();
        for _ in 0..5 {
            bitmap.allocate_page();
        }

        assert!(bitmap.deallocate_page(2));
        assert!(bitmap.is_page_free(2));
        assert_eq!(bitmap.allocated(), 4);

        // Double free is rejected
        assert!(!bitmap.deallocate_page(2));
        assert_eq!(bitmap.allocated(), 4);

        assert_eq!(bitmap.allocate_page(), Some(2));
        assert_eq!(bitmap.allocate_page(), Some(5));
    }

    #[test]
    fn test_bitmap_full() {
        let mut bitmap = BitmapPage::new();
        for _ in 0..BitmapPage::capacity() {
            assert!(bitmap.allocate_page().is_some());
        }
        assert_eq!(bitmap.allocate_page(), None);

        assert!(bitmap.deallocate_page(100));
        assert_eq!(bitmap.allocate_page(), Some(100));
    }

    #[test]
    fn test_bitmap_stale_hint_is_rescanned() {
        let mut bitmap = BitmapPage::new();
        bitmap.allocate_page();
        bitmap.allocate_page();

        // Forge a hint that points at an allocated slot
        let mut buf = vec![0u8; PAGE_SIZE];
        bitmap.encode(&mut buf);
        write_u32(&mut buf, 4, 0);

        let mut reloaded = BitmapPage::decode(&buf).unwrap();
        assert_eq!(reloaded.allocate_page(), Some(2));
    }

    #[test]
    fn test_bitmap_codec() {
        let mut bitmap = BitmapPage::new();
        for _ in 0..20 {
            bitmap.allocate_page();
        }
        bitmap.deallocate_page(7);

        let mut buf = vec![0u8; PAGE_SIZE];
        bitmap.encode(&mut buf);
        let decoded = BitmapPage::decode(&buf).unwrap();

        assert_eq!(decoded.allocated(), 19);
        assert_eq!(decoded.next_free_hint(), 7);
        assert!(decoded.is_page_free(7));
        assert!(!decoded.is_page_free(8));
    }

    #[test]
    fn test_bitmap_msb_first_layout() {
        let mut bitmap = BitmapPage::new();
        bitmap.allocate_page();

        let mut buf = vec![0u8; PAGE_SIZE];
        bitmap.encode(&mut buf);
        assert_eq!(buf[BITMAP_HEADER_SIZE], 0b1000_0000);
    }

    #[test]
    fn test_meta_page_codec() {
        let mut meta = DiskMetaPage::new();
        let extent = meta.add_extent().unwrap();
        meta.record_allocation(extent);
        meta.record_allocation(extent);

        let mut buf = vec![0u8; PAGE_SIZE];
        meta.encode(&mut buf);
        let decoded = DiskMetaPage::decode(&buf).unwrap();

        assert_eq!(decoded, meta);
        assert_eq!(decoded.allocated_pages(), 2);
        assert_eq!(decoded.num_extents(), 1);
        assert_eq!(decoded.extent_used_pages(0), 2);
    }

    #[test]
    fn test_zeroed_meta_page_is_empty_file() {
        let buf = vec![0u8; PAGE_SIZE];
        let meta = DiskMetaPage::decode(&buf).unwrap();
        assert_eq!(meta.num_extents(), 0);
        assert_eq!(meta.first_extent_with_space(), None);
    }

    #[test]
    fn test_corrupt_meta_page() {
        let mut buf = vec![0u8; PAGE_SIZE];
        write_u32(&mut buf, 4, u32::MAX);
        assert!(matches!(
            DiskMetaPage::decode(&buf),
            Err(StorageError::CorruptMetadata(_))
        ));
    }
}
