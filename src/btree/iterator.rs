use crate::file::{BufferPoolManager, PageGuard, PageId, RowId};

use super::error::BTreeResult;
use super::leaf::LeafPage;

/// Forward iterator over `(key, RowId)` entries in key order.
///
/// Keeps exactly one leaf pinned while positioned on it and follows the
/// leaf chain, releasing the current leaf before fetching the next one.
pub struct IndexIterator<'a> {
    pool: &'a BufferPoolManager,
    current: Option<(PageGuard<'a>, LeafPage)>,
    index: usize,
}

impl<'a> IndexIterator<'a> {
    pub(crate) fn new(pool: &'a BufferPoolManager, guard: PageGuard<'a>, leaf: LeafPage, index: usize) -> Self {
        Self {
            pool,
            current: Some((guard, leaf)),
            index,
        }
    }

    /// An iterator positioned past the last entry
    pub(crate) fn end(pool: &'a BufferPoolManager) -> Self {
        Self {
            pool,
            current: None,
            index: 0,
        }
    }

    /// True when no entries remain
    pub fn is_end(&self) -> bool {
        match &self.current {
            None => true,
            Some((_, leaf)) => self.index >= leaf.size() && leaf.next().is_none(),
        }
    }

    /// Page id of the leaf the iterator is positioned on
    pub fn current_page_id(&self) -> Option<PageId> {
        self.current.as_ref().map(|(guard, _)| guard.page_id())
    }

    fn advance_leaf(&mut self, next: PageId) -> BTreeResult<()> {
        // Unpin before pinning the next leaf
        self.current = None;

        let guard = self.pool.fetch_page(next)?;
        let leaf = LeafPage::decode(&guard.data())?;
        self.current = Some((guard, leaf));
        self.index = 0;
        Ok(())
    }
}

impl Iterator for IndexIterator<'_> {
    type Item = BTreeResult<(Vec<u8>, RowId)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (_, leaf) = self.current.as_ref()?;

            if self.index < leaf.size() {
                let item = (leaf.key_at(self.index).to_vec(), leaf.value_at(self.index));
                self.index += 1;
                return Some(Ok(item));
            }

            match leaf.next() {
                None => {
                    self.current = None;
                    return None;
                }
                Some(next) => {
                    if let Err(e) = self.advance_leaf(next) {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}
