use std::cmp::Ordering;

use crate::file::{PageId, RowId};

use super::error::{BTreeError, BTreeResult};
use super::key::KeyComparator;
use super::page::{HEADER_SIZE, PageType, TreePageHeader};

/// Data node: sorted `(key, RowId)` entries plus a link to the next leaf.
///
/// Keys are stored contiguously after the header, values start at
/// `HEADER_SIZE + max_size * key_size`.
#[derive(Debug, Clone)]
pub struct LeafPage {
    page_id: PageId,
    parent: Option<PageId>,
    max_size: usize,
    key_size: usize,
    next: Option<PageId>,
    keys: Vec<Vec<u8>>,
    values: Vec<RowId>,
}

impl LeafPage {
    pub fn new(page_id: PageId, parent: Option<PageId>, max_size: usize, key_size: usize) -> Self {
        Self {
            page_id,
            parent,
            max_size,
            key_size,
            next: None,
            keys: Vec::with_capacity(max_size),
            values: Vec::with_capacity(max_size),
        }
    }

    pub fn decode(buf: &[u8]) -> BTreeResult<Self> {
        let header = TreePageHeader::decode(buf)?;
        if header.page_type != PageType::Leaf {
            return Err(BTreeError::CorruptPage {
                page_id: header.page_id,
                reason: "expected a leaf page".to_string(),
            });
        }
        Self::decode_with(&header, buf)
    }

    pub(crate) fn decode_with(header: &TreePageHeader, buf: &[u8]) -> BTreeResult<Self> {
        let key_size = header.key_size;
        let values_offset = HEADER_SIZE + header.max_size * key_size;

        let keys = (0..header.size)
            .map(|i| {
                let start = HEADER_SIZE + i * key_size;
                buf[start..start + key_size].to_vec()
            })
            .collect();
        let values = (0..header.size)
            .map(|i| RowId::decode(&buf[values_offset + i * RowId::SIZE..]))
            .collect();

        Ok(Self {
            page_id: header.page_id,
            parent: header.parent,
            max_size: header.max_size,
            key_size,
            next: header.next,
            keys,
            values,
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        TreePageHeader {
            page_type: PageType::Leaf,
            size: self.size(),
            max_size: self.max_size,
            parent: self.parent,
            page_id: self.page_id,
            key_size: self.key_size,
            next: self.next,
        }
        .encode(buf);

        for (i, key) in self.keys.iter().enumerate() {
            let start = HEADER_SIZE + i * self.key_size;
            buf[start..start + self.key_size].copy_from_slice(key);
        }
        let values_offset = HEADER_SIZE + self.max_size * self.key_size;
        for (i, value) in self.values.iter().enumerate() {
            let start = values_offset + i * RowId::SIZE;
            value.encode(&mut buf[start..start + RowId::SIZE]);
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

    pub fn next(&self) -> Option<PageId> {
        self.next
    }

    pub fn size(&self) -> usize {
        self.keys.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn min_size(&self) -> usize {
        self.max_size / 2
    }

    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        &self.keys[index]
    }

    pub fn value_at(&self, index: usize) -> RowId {
        self.values[index]
    }

    /// First index whose key is not less than `key`
    pub fn key_index<C: KeyComparator + ?Sized>(&self, key: &[u8], cmp: &C) -> usize {
        self.keys
            .partition_point(|probe| cmp.compare(probe, key) == Ordering::Less)
    }

    pub fn lookup<C: KeyComparator + ?Sized>(&self, key: &[u8], cmp: &C) -> Option<RowId> {
        let index = self.key_index(key, cmp);
        (index < self.size() && cmp.compare(&self.keys[index], key) == Ordering::Equal)
            .then(|| self.values[index])
    }

    /// Insert in key order. Returns the new size; the size is unchanged when
    /// `key` is already present.
    pub fn insert<C: KeyComparator + ?Sized>(&mut self, key: &[u8], value: RowId, cmp: &C) -> usize {
        let mut index = self.size();
        for (i, probe) in self.keys.iter().enumerate() {
            match cmp.compare(probe, key) {
                Ordering::Less => continue,
                Ordering::Equal => return self.size(),
                Ordering::Greater => {
                    index = i;
                    break;
                }
            }
        }

        self.keys.insert(index, key.to_vec());
        self.values.insert(index, value);
        self.size()
    }

    /// Remove `key`. Returns false if it is absent.
    pub fn remove<C: KeyComparator + ?Sized>(&mut self, key: &[u8], cmp: &C) -> bool {
        let index = self.key_index(key, cmp);
        if index >= self.size() || cmp.compare(&self.keys[index], key) != Ordering::Equal {
            return false;
        }
        self.keys.remove(index);
        self.values.remove(index);
        true
    }

    /// Move the upper half to an empty right sibling, link it in after this
    /// page, and return its first key as the separator.
    pub fn move_half_to(&mut self, recipient: &mut LeafPage) -> Vec<u8> {
        let half = self.size() / 2;

        recipient.keys = self.keys.split_off(half);
        recipient.values = self.values.split_off(half);
        recipient.next = self.next;
        self.next = Some(recipient.page_id);

        recipient.keys[0].clone()
    }

    /// Append everything onto the left neighbour `recipient` and unlink
    /// this page from the leaf chain
    pub fn move_all_to(&mut self, recipient: &mut LeafPage) {
        recipient.keys.append(&mut self.keys);
        recipient.values.append(&mut self.values);
        recipient.next = self.next;
    }

    /// Move the first entry onto the end of the left neighbour `recipient`
    pub fn move_first_to_end_of(&mut self, recipient: &mut LeafPage) {
        recipient.keys.push(self.keys.remove(0));
        recipient.values.push(self.values.remove(0));
    }

    /// Move the last entry onto the front of the right neighbour `recipient`
    pub fn move_last_to_front_of(&mut self, recipient: &mut LeafPage) {
        if let (Some(key), Some(value)) = (self.keys.pop(), self.values.pop()) {
            recipient.keys.insert(0, key);
            recipient.values.insert(0, value);
        }
    }
}
