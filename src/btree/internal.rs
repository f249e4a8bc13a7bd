use std::cmp::Ordering;

use crate::file::{BufferPoolManager, INVALID_PAGE_ID, PageId, read_u32, write_u32};

use super::error::{BTreeError, BTreeResult};
use super::key::KeyComparator;
use super::page::{self, HEADER_SIZE, PageType, TreePageHeader};

/// Routing node: `size` keys and `size + 1` child page ids.
///
/// `children[i]` covers keys below `keys[i]`, and the last child covers
/// everything at or above the last key. Keys are stored contiguously after
/// the header, then the child ids start at `HEADER_SIZE + max_size * key_size`.
#[derive(Debug, Clone)]
pub struct InternalPage {
    page_id: PageId,
    parent: Option<PageId>,
    max_size: usize,
    key_size: usize,
    keys: Vec<Vec<u8>>,
    children: Vec<PageId>,
}

impl InternalPage {
    pub fn new(page_id: PageId, parent: Option<PageId>, max_size: usize, key_size: usize) -> Self {
        Self {
            page_id,
            parent,
            max_size,
            key_size,
            keys: Vec::with_capacity(max_size),
            children: Vec::with_capacity(max_size + 1),
        }
    }

    pub fn decode(buf: &[u8]) -> BTreeResult<Self> {
        let header = TreePageHeader::decode(buf)?;
        if header.page_type != PageType::Internal {
            return Err(BTreeError::CorruptPage {
                page_id: header.page_id,
                reason: "expected an internal page".to_string(),
            });
        }
        Self::decode_with(&header, buf)
    }

    pub(crate) fn decode_with(header: &TreePageHeader, buf: &[u8]) -> BTreeResult<Self> {
        let key_size = header.key_size;
        let children_offset = HEADER_SIZE + header.max_size * key_size;

        let keys = (0..header.size)
            .map(|i| {
                let start = HEADER_SIZE + i * key_size;
                buf[start..start + key_size].to_vec()
            })
            .collect();
        let children: Vec<PageId> = (0..=header.size)
            .map(|i| read_u32(buf, children_offset + i * 4))
            .collect();

        if header.size == 0 && children[0] == INVALID_PAGE_ID {
            return Err(BTreeError::CorruptPage {
                page_id: header.page_id,
                reason: "internal page without children".to_string(),
            });
        }

        Ok(Self {
            page_id: header.page_id,
            parent: header.parent,
            max_size: header.max_size,
            key_size,
            keys,
            children,
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        TreePageHeader {
            page_type: PageType::Internal,
            size: self.size(),
            max_size: self.max_size,
            parent: self.parent,
            page_id: self.page_id,
            key_size: self.key_size,
            next: None,
        }
        .encode(buf);

        for (i, key) in self.keys.iter().enumerate() {
            let start = HEADER_SIZE + i * self.key_size;
            buf[start..start + self.key_size].copy_from_slice(key);
        }
        let children_offset = HEADER_SIZE + self.max_size * self.key_size;
        for (i, &child) in self.children.iter().enumerate() {
            write_u32(buf, children_offset + i * 4, child);
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn parent(&self) -> Option<PageId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<PageId>) {
        self.parent = parent;
    }

    /// Number of keys
    pub fn size(&self) -> usize {
        self.keys.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Fewest keys a non-root internal page may keep.
    /// Both halves of a split satisfy it.
    pub fn min_size(&self) -> usize {
        (self.max_size - 1) / 2
    }

    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        &self.keys[index]
    }

    pub fn set_key_at(&mut self, index: usize, key: Vec<u8>) {
        self.keys[index] = key;
    }

    pub fn children(&self) -> &[PageId] {
        &self.children
    }

    pub fn child_at(&self, index: usize) -> PageId {
        self.children[index]
    }

    /// Position of `child` among this page's children
    pub fn child_index(&self, child: PageId) -> Option<usize> {
        self.children.iter().position(|&id| id == child)
    }

    /// First index whose key is strictly greater than `key`.
    /// Equal keys route to the right of their separator.
    pub fn key_index<C: KeyComparator + ?Sized>(&self, key: &[u8], cmp: &C) -> usize {
        self.keys
            .partition_point(|probe| cmp.compare(probe, key) != Ordering::Greater)
    }

    /// Child that may contain `key`
    pub fn lookup<C: KeyComparator + ?Sized>(&self, key: &[u8], cmp: &C) -> PageId {
        self.children[self.key_index(key, cmp)]
    }

    /// Turn an empty page into a root over two children
    pub fn populate_new_root(&mut self, left: PageId, key: Vec<u8>, right: PageId) {
        self.keys.clear();
        self.children.clear();
        self.keys.push(key);
        self.children.push(left);
        self.children.push(right);
    }

    /// Insert `key` / `new_child` right after `old_child`. Returns the new size.
    pub fn insert_node_after(
        &mut self,
        old_child: PageId,
        key: Vec<u8>,
        new_child: PageId,
    ) -> BTreeResult<usize> {
        let index = self
            .child_index(old_child)
            .ok_or_else(|| BTreeError::CorruptPage {
                page_id: self.page_id,
                reason: format!("page {} is not a child", old_child),
            })?;

        self.keys.insert(index, key);
        self.children.insert(index + 1, new_child);
        Ok(self.size())
    }

    /// Drop the child at `child_index` together with the key to its left
    pub fn remove_child(&mut self, child_index: usize) {
        self.keys.remove(child_index - 1);
        self.children.remove(child_index);
    }

    /// Move the upper half to an empty `recipient` and return the separator
    /// to push into the parent. The separator leaves both pages.
    pub fn move_half_to(&mut self, recipient: &mut InternalPage) -> Vec<u8> {
        let half = self.size() / 2;

        recipient.keys = self.keys.split_off(half + 1);
        recipient.children = self.children.split_off(half + 1);
        self.keys.pop().unwrap_or_default()
    }

    /// Append everything onto `recipient`, joined by the parent's separator
    pub fn move_all_to(&mut self, recipient: &mut InternalPage, middle_key: Vec<u8>) {
        recipient.keys.push(middle_key);
        recipient.keys.append(&mut self.keys);
        recipient.children.append(&mut self.children);
    }

    /// Rotate the first child onto the end of the left neighbour `recipient`.
    /// Returns the new separator between the two pages.
    pub fn move_first_to_end_of(&mut self, recipient: &mut InternalPage, middle_key: Vec<u8>) -> Vec<u8> {
        recipient.keys.push(middle_key);
        recipient.children.push(self.children.remove(0));
        self.keys.remove(0)
    }

    /// Rotate the last child onto the front of the right neighbour `recipient`.
    /// Returns the new separator between the two pages.
    pub fn move_last_to_front_of(&mut self, recipient: &mut InternalPage, middle_key: Vec<u8>) -> Vec<u8> {
        recipient.keys.insert(0, middle_key);
        if let Some(child) = self.children.pop() {
            recipient.children.insert(0, child);
        }
        self.keys.pop().unwrap_or_default()
    }
}

/// Point every page in `children` at `parent`
pub fn adopt_children(pool: &BufferPoolManager, children: &[PageId], parent: PageId) -> BTreeResult<()> {
    for &child in children {
        page::set_parent(pool, child, Some(parent))?;
    }
    Ok(())
}
