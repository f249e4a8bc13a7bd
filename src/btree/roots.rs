//! Index roots page: the persisted `index_id -> root page id` directory.
//!
//! Layout: magic (4 bytes), entry count (4 bytes), then `(index_id, root)`
//! pairs of 4 bytes each. An empty tree stores `INVALID_PAGE_ID` as root.

use crate::file::{BufferPoolManager, INDEX_ROOTS_PAGE_ID, PAGE_SIZE, PageId, read_u32, write_u32};

use super::error::{BTreeError, BTreeResult};
use super::page::{decode_page_id, encode_page_id};

/// "IRTS" in ASCII
pub const ROOTS_MAGIC: u32 = 0x4952_5453;

const HEADER_SIZE: usize = 8;
const ENTRY_SIZE: usize = 8;

/// Number of indexes one roots page can track
pub const MAX_ROOT_ENTRIES: usize = (PAGE_SIZE - HEADER_SIZE) / ENTRY_SIZE;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRootsPage {
    entries: Vec<(u32, Option<PageId>)>,
}

impl IndexRootsPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(buf: &[u8]) -> BTreeResult<Self> {
        let magic = read_u32(buf, 0);
        if magic != ROOTS_MAGIC {
            return Err(BTreeError::CorruptPage {
                page_id: INDEX_ROOTS_PAGE_ID,
                reason: format!("bad roots page magic {:#010x}", magic),
            });
        }

        let count = read_u32(buf, 4) as usize;
        if count > MAX_ROOT_ENTRIES {
            return Err(BTreeError::CorruptPage {
                page_id: INDEX_ROOTS_PAGE_ID,
                reason: format!("roots page lists {} entries", count),
            });
        }

        let entries = (0..count)
            .map(|i| {
                let offset = HEADER_SIZE + i * ENTRY_SIZE;
                (read_u32(buf, offset), decode_page_id(read_u32(buf, offset + 4)))
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        write_u32(buf, 0, ROOTS_MAGIC);
        write_u32(buf, 4, self.entries.len() as u32);
        for (i, &(index_id, root)) in self.entries.iter().enumerate() {
            let offset = HEADER_SIZE + i * ENTRY_SIZE;
            write_u32(buf, offset, index_id);
            write_u32(buf, offset + 4, encode_page_id(root));
        }
    }

    /// Root of `index_id`; None when the index is unknown or empty
    pub fn get(&self, index_id: u32) -> Option<PageId> {
        self.entries
            .iter()
            .find(|(id, _)| *id == index_id)
            .and_then(|&(_, root)| root)
    }

    pub fn contains(&self, index_id: u32) -> bool {
        self.entries.iter().any(|(id, _)| *id == index_id)
    }

    /// Insert or update the entry for `index_id`
    pub fn upsert(&mut self, index_id: u32, root: Option<PageId>) -> BTreeResult<()> {
        if let Some(entry) = self.entries.iter_mut().find(|(id, _)| *id == index_id) {
            entry.1 = root;
            return Ok(());
        }
        if self.entries.len() >= MAX_ROOT_ENTRIES {
            return Err(BTreeError::RootsPageFull);
        }
        self.entries.push((index_id, root));
        Ok(())
    }

    pub fn remove(&mut self, index_id: u32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(id, _)| *id != index_id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|&(id, _)| id)
    }
}

/// Write an empty directory to the roots page
pub fn format(pool: &BufferPoolManager) -> BTreeResult<()> {
    let mut guard = pool.fetch_page(INDEX_ROOTS_PAGE_ID)?;
    IndexRootsPage::new().encode(&mut guard.data_mut());
    Ok(())
}

pub fn load(pool: &BufferPoolManager) -> BTreeResult<IndexRootsPage> {
    let guard = pool.fetch_page(INDEX_ROOTS_PAGE_ID)?;
    let data = guard.data();
    IndexRootsPage::decode(&data)
}

pub fn load_root(pool: &BufferPoolManager, index_id: u32) -> BTreeResult<Option<PageId>> {
    Ok(load(pool)?.get(index_id))
}

pub fn store_root(pool: &BufferPoolManager, index_id: u32, root: Option<PageId>) -> BTreeResult<()> {
    let mut guard = pool.fetch_page(INDEX_ROOTS_PAGE_ID)?;
    let mut roots = IndexRootsPage::decode(&guard.data())?;
    roots.upsert(index_id, root)?;
    roots.encode(&mut guard.data_mut());
    Ok(())
}

pub fn remove_root(pool: &BufferPoolManager, index_id: u32) -> BTreeResult<bool> {
    let mut guard = pool.fetch_page(INDEX_ROOTS_PAGE_ID)?;
    let mut roots = IndexRootsPage::decode(&guard.data())?;
    if !roots.remove(index_id) {
        return Ok(false);
    }
    roots.encode(&mut guard.data_mut());
    Ok(true)
}
