//! Common header of B+ tree pages and the decoded node type.
//!
//! Header layout (28 bytes, little endian):
//! - page type (1 byte: 1 = internal, 2 = leaf) + 3 reserved bytes
//! - size (4 bytes), max size (4 bytes)
//! - parent page id (4 bytes, `INVALID_PAGE_ID` for the root)
//! - page id (4 bytes), key size (4 bytes)
//! - next leaf page id (4 bytes, leaves only)

use crate::file::{BufferPoolManager, INVALID_PAGE_ID, PAGE_SIZE, PageId, RowId, read_u32, write_u32};

use super::error::{BTreeError, BTreeResult};
use super::internal::InternalPage;
use super::leaf::LeafPage;

pub const HEADER_SIZE: usize = 28;

const TYPE_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 4;
const MAX_SIZE_OFFSET: usize = 8;
const PARENT_OFFSET: usize = 12;
const PAGE_ID_OFFSET: usize = 16;
const KEY_SIZE_OFFSET: usize = 20;
const NEXT_OFFSET: usize = 24;

/// Smallest leaf capacity that still allows a split
pub const MIN_LEAF_MAX_SIZE: usize = 2;

/// Smallest internal capacity (in keys) that still allows a split
pub const MIN_INTERNAL_MAX_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Internal = 1,
    Leaf = 2,
}

/// Decoded page header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreePageHeader {
    pub page_type: PageType,
    pub size: usize,
    pub max_size: usize,
    pub parent: Option<PageId>,
    pub page_id: PageId,
    pub key_size: usize,
    pub next: Option<PageId>,
}

impl TreePageHeader {
    pub fn decode(buf: &[u8]) -> BTreeResult<Self> {
        let page_id = read_u32(buf, PAGE_ID_OFFSET);
        let page_type = match buf[TYPE_OFFSET] {
            1 => PageType::Internal,
            2 => PageType::Leaf,
            other => {
                return Err(BTreeError::CorruptPage {
                    page_id,
                    reason: format!("unknown page type {}", other),
                });
            }
        };

        let header = Self {
            page_type,
            size: read_u32(buf, SIZE_OFFSET) as usize,
            max_size: read_u32(buf, MAX_SIZE_OFFSET) as usize,
            parent: decode_page_id(read_u32(buf, PARENT_OFFSET)),
            page_id,
            key_size: read_u32(buf, KEY_SIZE_OFFSET) as usize,
            next: decode_page_id(read_u32(buf, NEXT_OFFSET)),
        };

        let limit = match page_type {
            PageType::Internal => internal_max_limit(header.key_size),
            PageType::Leaf => leaf_max_limit(header.key_size),
        };
        if header.key_size == 0 || header.max_size == 0 || header.max_size > limit {
            return Err(BTreeError::CorruptPage {
                page_id,
                reason: format!(
                    "max size {} out of range for key size {}",
                    header.max_size, header.key_size
                ),
            });
        }
        if header.size > header.max_size {
            return Err(BTreeError::CorruptPage {
                page_id,
                reason: format!("size {} exceeds max size {}", header.size, header.max_size),
            });
        }

        Ok(header)
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..HEADER_SIZE].fill(0);
        buf[TYPE_OFFSET] = self.page_type as u8;
        write_u32(buf, SIZE_OFFSET, self.size as u32);
        write_u32(buf, MAX_SIZE_OFFSET, self.max_size as u32);
        write_u32(buf, PARENT_OFFSET, encode_page_id(self.parent));
        write_u32(buf, PAGE_ID_OFFSET, self.page_id);
        write_u32(buf, KEY_SIZE_OFFSET, self.key_size as u32);
        write_u32(buf, NEXT_OFFSET, encode_page_id(self.next));
    }
}

pub(crate) fn decode_page_id(raw: u32) -> Option<PageId> {
    (raw != INVALID_PAGE_ID).then_some(raw)
}

pub(crate) fn encode_page_id(page_id: Option<PageId>) -> u32 {
    page_id.unwrap_or(INVALID_PAGE_ID)
}

/// Largest number of entries a leaf with `key_size` keys can hold
pub fn leaf_max_limit(key_size: usize) -> usize {
    (PAGE_SIZE - HEADER_SIZE) / (key_size + RowId::SIZE)
}

/// Largest number of keys an internal page with `key_size` keys can hold
/// (one more child id than keys)
pub fn internal_max_limit(key_size: usize) -> usize {
    (PAGE_SIZE - HEADER_SIZE - 4) / (key_size + 4)
}

/// Rewrite only the parent field of a tree page
pub fn set_parent(pool: &BufferPoolManager, page_id: PageId, parent: Option<PageId>) -> BTreeResult<()> {
    let mut guard = pool.fetch_page(page_id)?;
    let mut data = guard.data_mut();
    write_u32(&mut data, PARENT_OFFSET, encode_page_id(parent));
    Ok(())
}

/// A tree page decoded into owned memory
#[derive(Debug, Clone)]
pub enum Node {
    Internal(InternalPage),
    Leaf(LeafPage),
}

impl Node {
    pub fn decode(buf: &[u8]) -> BTreeResult<Self> {
        let header = TreePageHeader::decode(buf)?;
        match header.page_type {
            PageType::Internal => Ok(Node::Internal(InternalPage::decode_with(&header, buf)?)),
            PageType::Leaf => Ok(Node::Leaf(LeafPage::decode_with(&header, buf)?)),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        match self {
            Node::Internal(page) => page.encode(buf),
            Node::Leaf(page) => page.encode(buf),
        }
    }

    pub fn page_id(&self) -> PageId {
        match self {
            Node::Internal(page) => page.page_id(),
            Node::Leaf(page) => page.page_id(),
        }
    }

    pub fn parent(&self) -> Option<PageId> {
        match self {
            Node::Internal(page) => page.parent(),
            Node::Leaf(page) => page.parent(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Node::Internal(page) => page.size(),
            Node::Leaf(page) => page.size(),
        }
    }

    pub fn min_size(&self) -> usize {
        match self {
            Node::Internal(page) => page.min_size(),
            Node::Leaf(page) => page.min_size(),
        }
    }

    pub fn max_size(&self) -> usize {
        match self {
            Node::Internal(page) => page.max_size(),
            Node::Leaf(page) => page.max_size(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Internal(_) => "internal",
            Node::Leaf(_) => "leaf",
        }
    }
}
