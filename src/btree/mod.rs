//! Disk-resident B+ tree index
//!
//! Every node lives in one buffer pool page. Operations fetch a page, decode
//! it into an owned `InternalPage` / `LeafPage`, mutate the copy and encode
//! it back. Descent releases each internal page before fetching its child,
//! so a lookup pins one page at a time and a structural change pins at most
//! a node, its sibling and their parent.
//!
//! Keys are fixed-width byte strings ordered by a `KeyComparator`; values are
//! `RowId`s. The root page id of each tree is kept in the index roots page.

mod error;
mod internal;
mod iterator;
mod key;
mod leaf;
mod page;
pub mod roots;


pub use error::{BTreeError, BTreeResult};
pub use internal::InternalPage;
pub use iterator::IndexIterator;
pub use key::{BytewiseComparator, GenericKey, IntegerComparator, KeyComparator};
pub use leaf::LeafPage;
pub use page::{
    HEADER_SIZE, MIN_INTERNAL_MAX_SIZE, MIN_LEAF_MAX_SIZE, Node, PageType, TreePageHeader,
    internal_max_limit, leaf_max_limit,
};
pub use roots::IndexRootsPage;

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;

use crate::file::{BufferPoolManager, PageGuard, PageId, RowId, StorageError};

use internal::adopt_children;

/// Outcome of rebalancing an underfull node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebalance {
    /// One entry moved over from a sibling; the height is unchanged
    Redistributed,
    /// The node and a sibling became one page. `parent_deficient` is set
    /// when the parent fell below its minimum as a result (and was itself
    /// rebalanced, or collapsed if it was the root).
    Merged { parent_deficient: bool },
}

/// Shape summary produced by `BPlusTree::check`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub height: usize,
    pub internal_pages: usize,
    pub leaf_pages: usize,
    pub entries: usize,
}

/// B+ tree keyed by fixed-width byte strings
pub struct BPlusTree<C: KeyComparator> {
    index_id: u32,
    pool: Arc<BufferPoolManager>,
    comparator: C,
    key_size: usize,
    /// Max entries per leaf; a leaf splits once it reaches this size
    leaf_max_size: usize,
    /// Max keys per internal page; a page splits once it reaches this size
    internal_max_size: usize,
    root_page_id: Option<PageId>,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Open the tree registered as `index_id`, with page capacities derived
    /// from the page size and `key_size`
    pub fn open(
        index_id: u32,
        pool: Arc<BufferPoolManager>,
        comparator: C,
        key_size: usize,
    ) -> BTreeResult<Self> {
        Self::with_max_sizes(index_id, pool, comparator, key_size, None, None)
    }

    /// Open the tree registered as `index_id` with explicit page capacities.
    /// `None` picks the largest capacity that fits a page.
    pub fn with_max_sizes(
        index_id: u32,
        pool: Arc<BufferPoolManager>,
        comparator: C,
        key_size: usize,
        leaf_max_size: Option<usize>,
        internal_max_size: Option<usize>,
    ) -> BTreeResult<Self> {
        let leaf_limit = leaf_max_limit(key_size);
        if key_size == 0 || leaf_limit < MIN_LEAF_MAX_SIZE {
            return Err(BTreeError::InvalidState(format!(
                "key size {} does not fit a tree page",
                key_size
            )));
        }

        let leaf_max_size =
            validate_max_size("leaf", leaf_max_size, MIN_LEAF_MAX_SIZE, leaf_limit)?;
        let internal_max_size = validate_max_size(
            "internal",
            internal_max_size,
            MIN_INTERNAL_MAX_SIZE,
            internal_max_limit(key_size),
        )?;

        let root_page_id = roots::load_root(&pool, index_id)?;
        let tree = Self {
            index_id,
            pool,
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
            root_page_id,
        };

        if let Some(root) = root_page_id {
            let guard = tree.pool.fetch_page(root)?;
            let header = TreePageHeader::decode(&guard.data())?;
            if header.key_size != key_size {
                return Err(BTreeError::KeySize {
                    expected: header.key_size,
                    actual: key_size,
                });
            }
        }

        debug!(
            event = "btree.open",
            index_id,
            root = ?root_page_id,
            leaf_max_size,
            internal_max_size,
        );
        Ok(tree)
    }

    pub fn index_id(&self) -> u32 {
        self.index_id
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    pub fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    pub fn root_page_id(&self) -> Option<PageId> {
        self.root_page_id
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id.is_none()
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.pool
    }

    // ========== Search Operations ==========

    /// Point lookup
    pub fn get_value(&self, key: &[u8]) -> BTreeResult<Option<RowId>> {
        self.check_key(key)?;
        Ok(self
            .find_leaf(Some(key))?
            .and_then(|(_guard, leaf)| leaf.lookup(key, &self.comparator)))
    }

    /// Iterator over the whole tree in key order
    pub fn begin(&self) -> BTreeResult<IndexIterator<'_>> {
        Ok(match self.find_leaf(None)? {
            Some((guard, leaf)) => IndexIterator::new(&self.pool, guard, leaf, 0),
            None => IndexIterator::end(&self.pool),
        })
    }

    /// Iterator starting at the first key not less than `key`
    pub fn begin_at(&self, key: &[u8]) -> BTreeResult<IndexIterator<'_>> {
        self.check_key(key)?;
        Ok(match self.find_leaf(Some(key))? {
            Some((guard, leaf)) => {
                let index = leaf.key_index(key, &self.comparator);
                IndexIterator::new(&self.pool, guard, leaf, index)
            }
            None => IndexIterator::end(&self.pool),
        })
    }

    pub fn end(&self) -> IndexIterator<'_> {
        IndexIterator::end(&self.pool)
    }

    /// Number of levels, 0 for an empty tree
    pub fn height(&self) -> BTreeResult<usize> {
        let mut height = 0;
        let mut next = self.root_page_id;
        while let Some(page_id) = next {
            let (_guard, node) = self.fetch_node(page_id)?;
            height += 1;
            next = match node {
                Node::Internal(internal) => Some(internal.child_at(0)),
                Node::Leaf(_) => None,
            };
        }
        Ok(height)
    }

    /// Descend to the leaf that may hold `key`, or the leftmost leaf for None
    fn find_leaf(&self, key: Option<&[u8]>) -> BTreeResult<Option<(PageGuard<'_>, LeafPage)>> {
        let Some(mut page_id) = self.root_page_id else {
            return Ok(None);
        };

        loop {
            let (guard, node) = self.fetch_node(page_id)?;
            match node {
                Node::Leaf(leaf) => return Ok(Some((guard, leaf))),
                Node::Internal(internal) => {
                    page_id = match key {
                        Some(key) => internal.lookup(key, &self.comparator),
                        None => internal.child_at(0),
                    };
                }
            }
        }
    }

    // ========== Insert Operations ==========

    /// Insert `key -> value`. Returns false, changing nothing, if `key`
    /// is already present.
    pub fn insert(&mut self, key: &[u8], value: RowId) -> BTreeResult<bool> {
        self.check_key(key)?;

        if self.root_page_id.is_none() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }

        let (mut guard, mut leaf) = self
            .find_leaf(Some(key))?
            .ok_or_else(|| BTreeError::InvalidState("descent found no leaf".to_string()))?;

        let size = leaf.size();
        if leaf.insert(key, value, &self.comparator) == size {
            return Ok(false);
        }

        if leaf.size() < leaf.max_size() {
            leaf.encode(&mut guard.data_mut());
            return Ok(true);
        }

        let (separator, sibling_id) = {
            let mut sibling_guard = self.pool.new_page()?;
            let mut sibling = LeafPage::new(
                sibling_guard.page_id(),
                leaf.parent(),
                leaf.max_size(),
                self.key_size,
            );
            let separator = leaf.move_half_to(&mut sibling);
            sibling.encode(&mut sibling_guard.data_mut());
            (separator, sibling.page_id())
        };
        leaf.encode(&mut guard.data_mut());
        drop(guard);

        debug!(
            event = "btree.split",
            kind = "leaf",
            page_id = leaf.page_id(),
            sibling = sibling_id,
        );
        self.insert_into_parent(leaf.page_id(), leaf.parent(), separator, sibling_id)?;
        Ok(true)
    }

    fn start_new_tree(&mut self, key: &[u8], value: RowId) -> BTreeResult<()> {
        let root_id = {
            let mut guard = self.pool.new_page()?;
            let mut leaf = LeafPage::new(guard.page_id(), None, self.leaf_max_size, self.key_size);
            leaf.insert(key, value, &self.comparator);
            leaf.encode(&mut guard.data_mut());
            leaf.page_id()
        };
        self.update_root(Some(root_id))
    }

    /// Link `right` in after `left` under their parent, splitting upwards
    /// as needed. Both pages must already be written back.
    fn insert_into_parent(
        &mut self,
        left: PageId,
        parent: Option<PageId>,
        key: Vec<u8>,
        right: PageId,
    ) -> BTreeResult<()> {
        let Some(parent_id) = parent else {
            let root_id = {
                let mut guard = self.pool.new_page()?;
                let mut root =
                    InternalPage::new(guard.page_id(), None, self.internal_max_size, self.key_size);
                root.populate_new_root(left, key, right);
                root.encode(&mut guard.data_mut());
                root.page_id()
            };
            adopt_children(&self.pool, &[left, right], root_id)?;
            debug!(event = "btree.new_root", root = root_id, left, right);
            return self.update_root(Some(root_id));
        };

        let (mut guard, mut node) = self.fetch_internal(parent_id)?;
        node.insert_node_after(left, key, right)?;

        if node.size() < node.max_size() {
            node.encode(&mut guard.data_mut());
            return Ok(());
        }

        let (separator, sibling) = {
            let mut sibling_guard = self.pool.new_page()?;
            let mut sibling = InternalPage::new(
                sibling_guard.page_id(),
                node.parent(),
                node.max_size(),
                self.key_size,
            );
            let separator = node.move_half_to(&mut sibling);
            sibling.encode(&mut sibling_guard.data_mut());
            (separator, sibling)
        };
        node.encode(&mut guard.data_mut());
        drop(guard);

        adopt_children(&self.pool, sibling.children(), sibling.page_id())?;
        debug!(
            event = "btree.split",
            kind = "internal",
            page_id = node.page_id(),
            sibling = sibling.page_id(),
        );
        self.insert_into_parent(node.page_id(), node.parent(), separator, sibling.page_id())
    }

    // ========== Delete Operations ==========

    /// Remove `key`. Returns false if it was not present.
    pub fn remove(&mut self, key: &[u8]) -> BTreeResult<bool> {
        self.check_key(key)?;

        let Some((mut guard, mut leaf)) = self.find_leaf(Some(key))? else {
            return Ok(false);
        };
        if !leaf.remove(key, &self.comparator) {
            return Ok(false);
        }
        leaf.encode(&mut guard.data_mut());
        drop(guard);

        if leaf.parent().is_none() {
            if leaf.size() == 0 {
                self.delete_tree_page(leaf.page_id())?;
                self.update_root(None)?;
            }
            return Ok(true);
        }

        if leaf.size() < leaf.min_size() {
            self.coalesce_or_redistribute(Node::Leaf(leaf))?;
        }
        Ok(true)
    }

    /// Restore the minimum size of a non-root `node` that has already been
    /// written back, borrowing from or merging with one sibling. The right
    /// sibling is used when `node` is the first child, the left one otherwise.
    fn coalesce_or_redistribute(&mut self, node: Node) -> BTreeResult<Rebalance> {
        let page_id = node.page_id();
        let parent_id = node.parent().ok_or_else(|| {
            BTreeError::InvalidState(format!("page {} has no parent to rebalance under", page_id))
        })?;

        let (mut parent_guard, mut parent) = self.fetch_internal(parent_id)?;
        let index = parent
            .child_index(page_id)
            .ok_or_else(|| BTreeError::CorruptPage {
                page_id: parent_id,
                reason: format!("page {} is not listed as a child", page_id),
            })?;
        let sibling_index = if index == 0 { 1 } else { index - 1 };
        let (mut sibling_guard, mut sibling) = self.fetch_node(parent.child_at(sibling_index))?;

        if sibling.size() > sibling.min_size() {
            let mut node = node;
            let moved = redistribute(&mut node, &mut sibling, &mut parent, index)?;

            sibling.encode(&mut sibling_guard.data_mut());
            parent.encode(&mut parent_guard.data_mut());
            drop(sibling_guard);
            drop(parent_guard);
            self.store_node(&node)?;
            if let Some(child) = moved {
                adopt_children(&self.pool, &[child], page_id)?;
            }

            debug!(
                event = "btree.redistribute",
                kind = node.kind(),
                page_id,
                sibling = sibling.page_id(),
            );
            return Ok(Rebalance::Redistributed);
        }

        // Always fold the right page into the left one
        let right_index = if index == 0 { 1 } else { index };
        let (mut left, mut right) = if index == 0 {
            (node, sibling)
        } else {
            (sibling, node)
        };
        let middle = parent.key_at(right_index - 1).to_vec();
        let moved = merge(&mut left, &mut right, middle)?;
        parent.remove_child(right_index);

        drop(sibling_guard);
        self.store_node(&left)?;
        parent.encode(&mut parent_guard.data_mut());
        drop(parent_guard);
        adopt_children(&self.pool, &moved, left.page_id())?;
        self.delete_tree_page(right.page_id())?;

        debug!(
            event = "btree.merge",
            kind = left.kind(),
            page_id = left.page_id(),
            removed = right.page_id(),
        );

        let parent_deficient = match parent.parent() {
            None => parent.size() == 0,
            Some(_) => parent.size() < parent.min_size(),
        };
        if parent_deficient {
            if parent.parent().is_none() {
                self.adjust_root(parent)?;
            } else {
                self.coalesce_or_redistribute(Node::Internal(parent))?;
            }
        }
        Ok(Rebalance::Merged { parent_deficient })
    }

    /// Replace a root internal page that lost its last key by its only child
    fn adjust_root(&mut self, root: InternalPage) -> BTreeResult<()> {
        let child = root.child_at(0);
        page::set_parent(&self.pool, child, None)?;
        self.update_root(Some(child))?;
        self.delete_tree_page(root.page_id())?;
        debug!(event = "btree.shrink", old_root = root.page_id(), new_root = child);
        Ok(())
    }

    /// Free every page of the tree and forget its root entry
    pub fn destroy(&mut self) -> BTreeResult<()> {
        if let Some(root) = self.root_page_id {
            let mut pages = Vec::new();
            let mut pending = vec![root];
            while let Some(page_id) = pending.pop() {
                let (_guard, node) = self.fetch_node(page_id)?;
                if let Node::Internal(internal) = &node {
                    pending.extend_from_slice(internal.children());
                }
                pages.push(page_id);
            }

            for &page_id in &pages {
                self.delete_tree_page(page_id)?;
            }
            debug!(event = "btree.destroy", index_id = self.index_id, pages = pages.len());
        }

        roots::remove_root(&self.pool, self.index_id)?;
        self.root_page_id = None;
        Ok(())
    }

    // ========== Verification ==========

    /// Walk the whole tree and verify its structure: key order and bounds,
    /// page size limits, parent links, uniform leaf depth, the leaf chain,
    /// and that no tree page is left pinned.
    pub fn check(&self) -> BTreeResult<TreeStats> {
        let Some(root) = self.root_page_id else {
            return Ok(TreeStats::default());
        };

        let mut walk = CheckWalk::default();
        self.check_subtree(root, None, None, None, 1, &mut walk)?;

        let mut chained = 0usize;
        let mut previous: Option<Vec<u8>> = None;
        for entry in self.begin()? {
            let (key, _) = entry?;
            if let Some(previous) = &previous {
                if self.comparator.compare(previous, &key) != std::cmp::Ordering::Less {
                    return Err(BTreeError::InvalidState(
                        "leaf chain is not in strictly increasing key order".to_string(),
                    ));
                }
            }
            previous = Some(key);
            chained += 1;
        }
        if chained != walk.stats.entries {
            return Err(BTreeError::InvalidState(format!(
                "leaf chain holds {} entries but the leaves hold {}",
                chained, walk.stats.entries
            )));
        }

        for &page_id in &walk.visited {
            if let Some(pins) = self.pool.pin_count(page_id).filter(|&pins| pins > 0) {
                return Err(BTreeError::InvalidState(format!(
                    "page {} still holds {} pins",
                    page_id, pins
                )));
            }
        }

        walk.stats.height = walk.leaf_depth.unwrap_or(0);
        Ok(walk.stats)
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        expected_parent: Option<PageId>,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        walk: &mut CheckWalk,
    ) -> BTreeResult<()> {
        let (_, node) = self.fetch_node(page_id)?;
        walk.visited.push(page_id);

        let violation = |reason: String| {
            BTreeError::InvalidState(format!("page {}: {}", page_id, reason))
        };

        if node.parent() != expected_parent {
            return Err(violation(format!(
                "parent link {:?}, expected {:?}",
                node.parent(),
                expected_parent
            )));
        }
        let is_root = expected_parent.is_none();
        if node.size() >= node.max_size() {
            return Err(violation(format!(
                "size {} reached max size {}",
                node.size(),
                node.max_size()
            )));
        }
        if !is_root && node.size() < node.min_size() {
            return Err(violation(format!(
                "size {} below min size {}",
                node.size(),
                node.min_size()
            )));
        }

        let keys = match &node {
            Node::Internal(internal) => internal.keys(),
            Node::Leaf(leaf) => leaf.keys(),
        };
        for pair in keys.windows(2) {
            if self.comparator.compare(&pair[0], &pair[1]) != std::cmp::Ordering::Less {
                return Err(violation("keys out of order".to_string()));
            }
        }
        for key in keys {
            let below = lower
                .is_some_and(|lower| self.comparator.compare(key, lower) == std::cmp::Ordering::Less);
            let above = upper
                .is_some_and(|upper| self.comparator.compare(key, upper) != std::cmp::Ordering::Less);
            if below || above {
                return Err(violation("key outside the range its parent routes here".to_string()));
            }
        }

        match &node {
            Node::Leaf(leaf) => {
                if leaf.size() == 0 {
                    return Err(violation("empty leaf".to_string()));
                }
                match walk.leaf_depth {
                    None => walk.leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(violation(format!(
                            "leaf at depth {}, expected {}",
                            depth, expected
                        )));
                    }
                    Some(_) => {}
                }
                walk.stats.leaf_pages += 1;
                walk.stats.entries += leaf.size();
            }
            Node::Internal(internal) => {
                if internal.size() == 0 {
                    return Err(violation("internal page without keys".to_string()));
                }
                walk.stats.internal_pages += 1;
                for (i, &child) in internal.children().iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { Some(internal.key_at(i - 1)) };
                    let child_upper = if i == internal.size() {
                        upper
                    } else {
                        Some(internal.key_at(i))
                    };
                    self.check_subtree(child, Some(page_id), child_lower, child_upper, depth + 1, walk)?;
                }
            }
        }
        Ok(())
    }

    /// Level-order rendering with keys printed as hex
    pub fn dump(&self) -> BTreeResult<String> {
        self.dump_with(|key| key.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Level-order rendering, one line per level, keys printed by `render`
    pub fn dump_with<F>(&self, render: F) -> BTreeResult<String>
    where
        F: Fn(&[u8]) -> String,
    {
        let Some(root) = self.root_page_id else {
            return Ok("(empty tree)\n".to_string());
        };

        let mut out = String::new();
        let mut level = vec![root];
        let mut depth = 0;
        while !level.is_empty() {
            let mut next_level = Vec::new();
            let _ = write!(out, "L{}:", depth);

            for page_id in level {
                let (_guard, node) = self.fetch_node(page_id)?;
                let parent = node
                    .parent()
                    .map_or_else(|| "-".to_string(), |p| p.to_string());
                match node {
                    Node::Internal(internal) => {
                        let keys: Vec<String> = internal.keys().iter().map(|k| render(k)).collect();
                        let _ = write!(out, " [#{} p={} | {}]", page_id, parent, keys.join(" "));
                        next_level.extend_from_slice(internal.children());
                    }
                    Node::Leaf(leaf) => {
                        let keys: Vec<String> = leaf.keys().iter().map(|k| render(k)).collect();
                        let next = leaf
                            .next()
                            .map_or_else(|| "-".to_string(), |n| n.to_string());
                        let _ = write!(
                            out,
                            " [#{} p={} n={} | {}]",
                            page_id,
                            parent,
                            next,
                            keys.join(" ")
                        );
                    }
                }
            }

            out.push('\n');
            level = next_level;
            depth += 1;
        }
        Ok(out)
    }

    // ========== Page Helpers ==========

    fn check_key(&self, key: &[u8]) -> BTreeResult<()> {
        if key.len() != self.key_size {
            return Err(BTreeError::KeySize {
                expected: self.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn fetch_node(&self, page_id: PageId) -> BTreeResult<(PageGuard<'_>, Node)> {
        let guard = self.pool.fetch_page(page_id)?;
        let node = Node::decode(&guard.data())?;
        Ok((guard, node))
    }

    fn fetch_internal(&self, page_id: PageId) -> BTreeResult<(PageGuard<'_>, InternalPage)> {
        let guard = self.pool.fetch_page(page_id)?;
        let node = InternalPage::decode(&guard.data())?;
        Ok((guard, node))
    }

    /// Write a decoded node back to its page
    fn store_node(&self, node: &Node) -> BTreeResult<()> {
        let mut guard = self.pool.fetch_page(node.page_id())?;
        node.encode(&mut guard.data_mut());
        Ok(())
    }

    fn delete_tree_page(&self, page_id: PageId) -> BTreeResult<()> {
        if !self.pool.delete_page(page_id)? {
            let pin_count = self.pool.pin_count(page_id).unwrap_or(0);
            return Err(StorageError::PagePinned { page_id, pin_count }.into());
        }
        Ok(())
    }

    fn update_root(&mut self, root: Option<PageId>) -> BTreeResult<()> {
        roots::store_root(&self.pool, self.index_id, root)?;
        debug!(
            event = "btree.root_change",
            index_id = self.index_id,
            old = ?self.root_page_id,
            new = ?root,
        );
        self.root_page_id = root;
        Ok(())
    }
}

#[derive(Default)]
struct CheckWalk {
    stats: TreeStats,
    leaf_depth: Option<usize>,
    visited: Vec<PageId>,
}

fn validate_max_size(
    kind: &'static str,
    requested: Option<usize>,
    min: usize,
    limit: usize,
) -> BTreeResult<usize> {
    match requested {
        None => Ok(limit),
        Some(size) if (min..=limit).contains(&size) => Ok(size),
        Some(size) => Err(BTreeError::InvalidMaxSize {
            kind,
            requested: size,
            limit,
        }),
    }
}

/// Move one entry from `sibling` into `node` and fix the separator in
/// `parent`. `index` is `node`'s position in `parent`; the sibling is to the
/// right when it is 0 and to the left otherwise. Returns the child page that
/// changed parents, if any.
fn redistribute(
    node: &mut Node,
    sibling: &mut Node,
    parent: &mut InternalPage,
    index: usize,
) -> BTreeResult<Option<PageId>> {
    match (node, sibling) {
        (Node::Leaf(node), Node::Leaf(sibling)) => {
            if index == 0 {
                sibling.move_first_to_end_of(node);
                parent.set_key_at(0, sibling.key_at(0).to_vec());
            } else {
                sibling.move_last_to_front_of(node);
                parent.set_key_at(index - 1, node.key_at(0).to_vec());
            }
            Ok(None)
        }
        (Node::Internal(node), Node::Internal(sibling)) => {
            if index == 0 {
                let middle = parent.key_at(0).to_vec();
                let separator = sibling.move_first_to_end_of(node, middle);
                parent.set_key_at(0, separator);
                Ok(node.children().last().copied())
            } else {
                let middle = parent.key_at(index - 1).to_vec();
                let separator = sibling.move_last_to_front_of(node, middle);
                parent.set_key_at(index - 1, separator);
                Ok(Some(node.child_at(0)))
            }
        }
        (node, _) => Err(BTreeError::CorruptPage {
            page_id: node.page_id(),
            reason: "sibling is a different page type".to_string(),
        }),
    }
}

/// Append `right` onto `left`. Returns the child pages now owned by `left`.
fn merge(left: &mut Node, right: &mut Node, middle: Vec<u8>) -> BTreeResult<Vec<PageId>> {
    match (left, right) {
        (Node::Leaf(left), Node::Leaf(right)) => {
            right.move_all_to(left);
            Ok(Vec::new())
        }
        (Node::Internal(left), Node::Internal(right)) => {
            let moved = right.children().to_vec();
            right.move_all_to(left, middle);
            Ok(moved)
        }
        (left, _) => Err(BTreeError::CorruptPage {
            page_id: left.page_id(),
            reason: "sibling is a different page type".to_string(),
        }),
    }
}
