mod bitmap;
mod buffer_pool;
mod disk_manager;
mod error;
mod replacer;

pub use bitmap::{BitmapPage, DiskMetaPage};
pub use buffer_pool::{BufferPoolManager, PageGuard};
pub use disk_manager::DiskManager;
pub use error::{StorageError, StorageResult};
pub use replacer::{LruReplacer, Replacer};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Number of frames in the buffer pool when no size is configured
pub const DEFAULT_POOL_SIZE: usize = 1024;

/// Logical page ID type
pub type PageId = u32;

/// Frame index into the buffer pool's frame array
pub type FrameId = usize;

/// Reserved sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// Logical page reserved for the catalog's top-level metadata
pub const CATALOG_META_PAGE_ID: PageId = 0;

/// Logical page holding the index_id -> root page directory
pub const INDEX_ROOTS_PAGE_ID: PageId = 1;

/// Physical identifier for a row in the table heap (page + slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl RowId {
    /// Serialized width inside a leaf page
    pub const SIZE: usize = 8;

    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot_num.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            page_id: read_u32(buf, 0),
            slot_num: read_u32(buf, 4),
        }
    }
}

/// Read a little-endian u32 at `offset`
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Write a little-endian u32 at `offset`
pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
