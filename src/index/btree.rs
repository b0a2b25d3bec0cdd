use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer::{PageCache, WritePageGuard};
use crate::common::{PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::{self, HeaderNode, HeaderNodeRef, NodeKind};
use super::index_iterator::IndexIterator;
use super::internal_page::{InternalNode, InternalNodeRef};
use super::key_comparator::KeyComparator;
use super::leaf_page::{LeafNode, LeafNodeRef};

/// Latches held by a structural operation (insert or remove): the header
/// page's write latch for the whole operation, and the contiguous suffix of
/// unsafe ancestors down to the current node. Dropping the context releases
/// everything.
struct Context {
    header: WritePageGuard,
    root_page_id: PageId,
    write_set: VecDeque<WritePageGuard>,
}

impl Context {
    /// The safety optimization: once the current node cannot propagate a
    /// split or merge upward, every ancestor latch can go.
    fn release_ancestors(&mut self) {
        self.write_set.clear();
    }
}

/// A disk-page-backed B+tree with unique keys, mapping fixed-size byte
/// keys to `RecordId`s. Pages are borrowed from the `PageCache` under read
/// or write latches; multi-threaded access is safe through latch coupling:
/// reads hold at most a parent/child pair of read latches, writes hold a
/// root-to-leaf prefix of write latches trimmed by the safety optimization.
///
/// A distinguished header page anchors `root_page_id`; an empty tree is
/// `root_page_id == INVALID_PAGE_ID`.
pub struct BPlusTree {
    header_page_id: PageId,
    cache: Arc<PageCache>,
    comparator: Arc<dyn KeyComparator>,
    key_size: usize,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    /// Creates a new empty tree, allocating its header page.
    pub fn new(
        cache: Arc<PageCache>,
        comparator: Arc<dyn KeyComparator>,
        key_size: usize,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 2 && internal_max_size >= 3);

        let header_page_id = cache.new_page()?;
        {
            let mut guard = cache.write_page(header_page_id)?;
            HeaderNode::new(guard.data_mut()).init();
        }

        Ok(Self {
            header_page_id,
            cache,
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
        })
    }

    /// Re-opens a tree from its header page.
    pub fn open(
        header_page_id: PageId,
        cache: Arc<PageCache>,
        comparator: Arc<dyn KeyComparator>,
        key_size: usize,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        Self {
            header_page_id,
            cache,
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
        }
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Reads the current root page ID from the header page.
    pub fn root_page_id(&self) -> Result<PageId> {
        let guard = self.cache.read_page(self.header_page_id)?;
        Ok(HeaderNodeRef::new(guard.data()).root_page_id())
    }

    pub fn is_empty(&self) -> Result<bool> {
        let root_id = self.root_page_id()?;
        if root_id == INVALID_PAGE_ID {
            return Ok(true);
        }
        let guard = self.cache.read_page(root_id)?;
        let data = guard.data();
        Ok(btree_page::is_leaf(data) && btree_page::page_size_of(data) == 0)
    }

    /// Point lookup with read-latch coupling: the next page is latched
    /// before the previous latch is released, starting from the header
    /// page so a concurrent root replacement cannot strand the descent.
    pub fn get(&self, key: &[u8]) -> Result<Option<RecordId>> {
        debug_assert_eq!(key.len(), self.key_size);

        let header = self.cache.read_page(self.header_page_id)?;
        let root_id = HeaderNodeRef::new(header.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.cache.read_page(root_id)?;
        drop(header);
        loop {
            let child = {
                let data = guard.data();
                match btree_page::node_kind(data) {
                    NodeKind::Leaf => {
                        let leaf = LeafNodeRef::new(data, self.key_size);
                        return Ok(leaf.find(key, self.comparator.as_ref()));
                    }
                    NodeKind::Internal => InternalNodeRef::new(data, self.key_size)
                        .child_for(key, self.comparator.as_ref()),
                }
            };
            let next = self.cache.read_page(child)?;
            guard = next;
        }
    }

    /// Inserts a key/value pair. Keys are unique: inserting a key that is
    /// already present returns false and leaves the existing value.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> Result<bool> {
        debug_assert_eq!(key.len(), self.key_size);

        let mut header = self.cache.write_page(self.header_page_id)?;
        let root_id = HeaderNodeRef::new(header.data()).root_page_id();

        if root_id == INVALID_PAGE_ID {
            // Empty tree: the new root is a leaf holding just this entry
            let new_root_id = self.cache.new_page()?;
            {
                let mut guard = self.cache.write_page(new_root_id)?;
                let mut leaf = LeafNode::new(guard.data_mut(), self.key_size);
                leaf.init(self.leaf_max_size, new_root_id);
                leaf.insert(key, rid, self.comparator.as_ref());
            }
            HeaderNode::new(header.data_mut()).set_root_page_id(new_root_id);
            return Ok(true);
        }

        let mut ctx = Context {
            header,
            root_page_id: root_id,
            write_set: VecDeque::new(),
        };

        let mut guard = self.cache.write_page(root_id)?;
        loop {
            let (is_leaf, safe, child) = {
                let data = guard.data();
                match btree_page::node_kind(data) {
                    NodeKind::Leaf => (
                        true,
                        LeafNodeRef::new(data, self.key_size).is_insert_safe(),
                        INVALID_PAGE_ID,
                    ),
                    NodeKind::Internal => {
                        let node = InternalNodeRef::new(data, self.key_size);
                        (
                            false,
                            node.is_insert_safe(),
                            node.child_for(key, self.comparator.as_ref()),
                        )
                    }
                }
            };

            if safe {
                ctx.release_ancestors();
            }
            ctx.write_set.push_back(guard);
            if is_leaf {
                break;
            }
            guard = self.cache.write_page(child)?;
        }

        let overflow = {
            let leaf_guard = ctx
                .write_set
                .back_mut()
                .expect("descent latched the target leaf");
            let mut leaf = LeafNode::new(leaf_guard.data_mut(), self.key_size);
            if leaf.find(key, self.comparator.as_ref()).is_some() {
                return Ok(false);
            }
            leaf.insert(key, rid, self.comparator.as_ref());
            leaf.size() > leaf.max_size()
        };

        if overflow {
            self.split(&mut ctx)?;
        }
        Ok(true)
    }

    /// Splits the overflowing node at the back of the write set, promoting
    /// separators upward until a parent absorbs the insert or a new root is
    /// made. Leaf splits copy the separator up; internal splits push it up.
    fn split(&self, ctx: &mut Context) -> Result<()> {
        loop {
            let mut cur = ctx
                .write_set
                .pop_back()
                .expect("overflowing node is latched");
            let cur_id = btree_page::page_id_of(cur.data());

            let sibling_id = self.cache.new_page()?;
            let mut sibling = self.cache.write_page(sibling_id)?;

            let sep = match btree_page::node_kind(cur.data()) {
                NodeKind::Leaf => {
                    let mut left = LeafNode::new(cur.data_mut(), self.key_size);
                    let mut right = LeafNode::new(sibling.data_mut(), self.key_size);
                    right.init(self.leaf_max_size, sibling_id);
                    left.split_into(&mut right);
                    // Thread the new leaf into the sibling chain
                    let successor = left.next_page_id();
                    right.set_next_page_id(successor);
                    left.set_next_page_id(sibling_id);
                    right.key_at(0).to_vec()
                }
                NodeKind::Internal => {
                    let mut left = InternalNode::new(cur.data_mut(), self.key_size);
                    let mut right = InternalNode::new(sibling.data_mut(), self.key_size);
                    right.init(self.internal_max_size, sibling_id);
                    left.split_into(&mut right)
                }
            };

            if cur_id == ctx.root_page_id {
                // The root split: a new internal root adopts both halves,
                // and the root pointer flips under the header write latch.
                let new_root_id = self.cache.new_page()?;
                let mut root_guard = self.cache.write_page(new_root_id)?;
                let mut root = InternalNode::new(root_guard.data_mut(), self.key_size);
                root.init(self.internal_max_size, new_root_id);
                root.set_child_at(0, cur_id);
                root.insert(&sep, sibling_id, self.comparator.as_ref());
                HeaderNode::new(ctx.header.data_mut()).set_root_page_id(new_root_id);
                ctx.root_page_id = new_root_id;
                return Ok(());
            }

            drop(cur);
            drop(sibling);

            let parent_guard = ctx
                .write_set
                .back_mut()
                .expect("an unsafe child keeps its parent latched");
            let parent_overflow = {
                let mut parent = InternalNode::new(parent_guard.data_mut(), self.key_size);
                parent.insert(&sep, sibling_id, self.comparator.as_ref());
                parent.size() > parent.max_size()
            };

            if !parent_overflow {
                return Ok(());
            }
            // The parent is now the overflowing node at the back
        }
    }

    /// Removes a key. Absent keys are a silent no-op.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        debug_assert_eq!(key.len(), self.key_size);

        let header = self.cache.write_page(self.header_page_id)?;
        let root_id = HeaderNodeRef::new(header.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut ctx = Context {
            header,
            root_page_id: root_id,
            write_set: VecDeque::new(),
        };

        let mut guard = self.cache.write_page(root_id)?;
        loop {
            let (is_leaf, safe, child) = {
                let data = guard.data();
                let is_root = btree_page::page_id_of(data) == ctx.root_page_id;
                match btree_page::node_kind(data) {
                    NodeKind::Leaf => (
                        true,
                        LeafNodeRef::new(data, self.key_size).is_delete_safe(is_root),
                        INVALID_PAGE_ID,
                    ),
                    NodeKind::Internal => {
                        let node = InternalNodeRef::new(data, self.key_size);
                        (
                            false,
                            node.is_delete_safe(is_root),
                            node.child_for(key, self.comparator.as_ref()),
                        )
                    }
                }
            };

            if safe {
                ctx.release_ancestors();
            }
            ctx.write_set.push_back(guard);
            if is_leaf {
                break;
            }
            guard = self.cache.write_page(child)?;
        }

        let (leaf_id, leaf_size, leaf_min, leaf_first_key) = {
            let leaf_guard = ctx
                .write_set
                .back_mut()
                .expect("descent latched the target leaf");
            let mut leaf = LeafNode::new(leaf_guard.data_mut(), self.key_size);
            if !leaf.remove(key, self.comparator.as_ref()) {
                return Ok(());
            }
            let first_key = (leaf.size() > 0).then(|| leaf.key_at(0).to_vec());
            (leaf.page_id(), leaf.size(), leaf.min_size(), first_key)
        };

        if leaf_id == ctx.root_page_id {
            if leaf_size == 0 {
                // The last entry is gone; an empty tree is a valid steady
                // state.
                HeaderNode::new(ctx.header.data_mut()).set_root_page_id(INVALID_PAGE_ID);
                ctx.write_set.clear();
                self.cache.delete_page(leaf_id).ok();
            }
            return Ok(());
        }

        // Keep the parent's separator equal to the leaf's new minimum while
        // the parent is still latched; slot 0 has no separator.
        if ctx.write_set.len() >= 2 {
            if let Some(first_key) = &leaf_first_key {
                let idx = ctx.write_set.len() - 2;
                let parent_guard = ctx.write_set.get_mut(idx).unwrap();
                let mut parent = InternalNode::new(parent_guard.data_mut(), self.key_size);
                if let Some(index) = parent.index_of_child(leaf_id) {
                    if index > 0 {
                        parent.set_key_at(index, first_key);
                    }
                }
            }
        }

        if leaf_size >= leaf_min {
            return Ok(());
        }

        self.rebalance(&mut ctx)
    }

    /// Restores the minimum-occupancy invariant for the underflowed node at
    /// the back of the write set: borrow from a sibling with slack (left
    /// first), otherwise merge (into the left sibling when one exists),
    /// then repeat upward while the parent underflows. Sibling latches are
    /// only taken while the parent's write latch is held.
    fn rebalance(&self, ctx: &mut Context) -> Result<()> {
        loop {
            let mut cur = ctx
                .write_set
                .pop_back()
                .expect("underflowed node is latched");
            let cur_id = btree_page::page_id_of(cur.data());
            let cur_is_leaf = btree_page::is_leaf(cur.data());

            let (index, left_id, right_id) = {
                let parent_guard = ctx
                    .write_set
                    .back()
                    .expect("an unsafe node keeps its parent latched");
                let parent = InternalNodeRef::new(parent_guard.data(), self.key_size);
                let index = parent
                    .index_of_child(cur_id)
                    .expect("parent tracks this child");
                let left_id = (index > 0).then(|| parent.child_at(index - 1));
                let right_id = (index + 1 < parent.size()).then(|| parent.child_at(index + 1));
                (index, left_id, right_id)
            };

            // Borrow from the left sibling if it has slack
            if let Some(left_id) = left_id {
                let mut left_guard = self.cache.write_page(left_id)?;
                let has_slack = {
                    let data = left_guard.data();
                    if cur_is_leaf {
                        let left = LeafNodeRef::new(data, self.key_size);
                        left.size() > left.min_size()
                    } else {
                        let left = InternalNodeRef::new(data, self.key_size);
                        left.size() > left.min_size()
                    }
                };
                if has_slack {
                    let parent_guard = ctx.write_set.back_mut().unwrap();
                    let mut parent = InternalNode::new(parent_guard.data_mut(), self.key_size);
                    if cur_is_leaf {
                        let mut node = LeafNode::new(cur.data_mut(), self.key_size);
                        let mut left = LeafNode::new(left_guard.data_mut(), self.key_size);
                        node.borrow_from_left(&mut left, &mut parent, index);
                    } else {
                        let mut node = InternalNode::new(cur.data_mut(), self.key_size);
                        let mut left = InternalNode::new(left_guard.data_mut(), self.key_size);
                        node.borrow_from_left(&mut left, &mut parent, index);
                    }
                    return Ok(());
                }
            }

            // Then the right sibling
            if let Some(right_id) = right_id {
                let mut right_guard = self.cache.write_page(right_id)?;
                let has_slack = {
                    let data = right_guard.data();
                    if cur_is_leaf {
                        let right = LeafNodeRef::new(data, self.key_size);
                        right.size() > right.min_size()
                    } else {
                        let right = InternalNodeRef::new(data, self.key_size);
                        right.size() > right.min_size()
                    }
                };
                if has_slack {
                    let parent_guard = ctx.write_set.back_mut().unwrap();
                    let mut parent = InternalNode::new(parent_guard.data_mut(), self.key_size);
                    if cur_is_leaf {
                        let mut node = LeafNode::new(cur.data_mut(), self.key_size);
                        let mut right = LeafNode::new(right_guard.data_mut(), self.key_size);
                        node.borrow_from_right(&mut right, &mut parent, index);
                    } else {
                        let mut node = InternalNode::new(cur.data_mut(), self.key_size);
                        let mut right = InternalNode::new(right_guard.data_mut(), self.key_size);
                        node.borrow_from_right(&mut right, &mut parent, index);
                    }
                    return Ok(());
                }
            }

            // No slack anywhere: merge. Prefer absorbing into the left
            // sibling; the merged-away page is freed after its latch drops.
            if let Some(left_id) = left_id {
                let mut left_guard = self.cache.write_page(left_id)?;
                {
                    let parent_guard = ctx.write_set.back_mut().unwrap();
                    let mut parent = InternalNode::new(parent_guard.data_mut(), self.key_size);
                    if cur_is_leaf {
                        let mut left = LeafNode::new(left_guard.data_mut(), self.key_size);
                        let mut node = LeafNode::new(cur.data_mut(), self.key_size);
                        left.merge_from(&mut node);
                    } else {
                        let sep = parent.key_at(index).to_vec();
                        let mut left = InternalNode::new(left_guard.data_mut(), self.key_size);
                        let mut node = InternalNode::new(cur.data_mut(), self.key_size);
                        left.merge_from(&mut node, &sep);
                    }
                    parent.remove_at(index);
                }
                drop(cur);
                drop(left_guard);
                // A racing chain reader may still pin the page; then the
                // orphan is reclaimed by eviction instead.
                self.cache.delete_page(cur_id).ok();
            } else {
                let right_id = right_id.expect("a non-root node has at least one sibling");
                let mut right_guard = self.cache.write_page(right_id)?;
                {
                    let parent_guard = ctx.write_set.back_mut().unwrap();
                    let mut parent = InternalNode::new(parent_guard.data_mut(), self.key_size);
                    if cur_is_leaf {
                        let mut node = LeafNode::new(cur.data_mut(), self.key_size);
                        let mut right = LeafNode::new(right_guard.data_mut(), self.key_size);
                        node.merge_from(&mut right);
                    } else {
                        let sep = parent.key_at(index + 1).to_vec();
                        let mut node = InternalNode::new(cur.data_mut(), self.key_size);
                        let mut right = InternalNode::new(right_guard.data_mut(), self.key_size);
                        node.merge_from(&mut right, &sep);
                    }
                    parent.remove_at(index + 1);
                }
                drop(cur);
                drop(right_guard);
                self.cache.delete_page(right_id).ok();
            }

            // The parent lost an entry; check it next
            let (parent_id, parent_size, parent_min, only_child) = {
                let parent_guard = ctx.write_set.back().unwrap();
                let parent = InternalNodeRef::new(parent_guard.data(), self.key_size);
                let only_child = (parent.size() == 1).then(|| parent.child_at(0));
                (parent.page_id(), parent.size(), parent.min_size(), only_child)
            };

            if parent_id == ctx.root_page_id {
                if let Some(child) = only_child {
                    // Root contraction: the single remaining child becomes
                    // the new root.
                    HeaderNode::new(ctx.header.data_mut()).set_root_page_id(child);
                    ctx.root_page_id = child;
                    ctx.write_set.clear();
                    self.cache.delete_page(parent_id).ok();
                }
                return Ok(());
            }

            if parent_size >= parent_min {
                return Ok(());
            }
            // The parent is the underflowed node for the next round
        }
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator> {
        let header = self.cache.read_page(self.header_page_id)?;
        let root_id = HeaderNodeRef::new(header.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(IndexIterator::empty(Arc::clone(&self.cache), self.key_size));
        }

        let mut guard = self.cache.read_page(root_id)?;
        drop(header);
        loop {
            let child = {
                let data = guard.data();
                match btree_page::node_kind(data) {
                    NodeKind::Leaf => {
                        return Ok(IndexIterator::new(
                            Arc::clone(&self.cache),
                            guard,
                            0,
                            self.key_size,
                        ));
                    }
                    NodeKind::Internal => InternalNodeRef::new(data, self.key_size).child_at(0),
                }
            };
            let next = self.cache.read_page(child)?;
            guard = next;
        }
    }

    /// Iterator positioned at the first entry whose key is >= `key`.
    pub fn begin_at(&self, key: &[u8]) -> Result<IndexIterator> {
        debug_assert_eq!(key.len(), self.key_size);

        let header = self.cache.read_page(self.header_page_id)?;
        let root_id = HeaderNodeRef::new(header.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(IndexIterator::empty(Arc::clone(&self.cache), self.key_size));
        }

        let mut guard = self.cache.read_page(root_id)?;
        drop(header);
        loop {
            let child = {
                let data = guard.data();
                match btree_page::node_kind(data) {
                    NodeKind::Leaf => {
                        let leaf = LeafNodeRef::new(data, self.key_size);
                        let index = leaf.lower_bound(key, self.comparator.as_ref());
                        if index == leaf.size() && leaf.next_page_id() != INVALID_PAGE_ID {
                            // The bound falls past this leaf's last slot
                            let next = self.cache.read_page(leaf.next_page_id())?;
                            return Ok(IndexIterator::new(
                                Arc::clone(&self.cache),
                                next,
                                0,
                                self.key_size,
                            ));
                        }
                        return Ok(IndexIterator::new(
                            Arc::clone(&self.cache),
                            guard,
                            index,
                            self.key_size,
                        ));
                    }
                    NodeKind::Internal => InternalNodeRef::new(data, self.key_size)
                        .child_for(key, self.comparator.as_ref()),
                }
            };
            let next = self.cache.read_page(child)?;
            guard = next;
        }
    }

    /// Iterator at the end position: one past the last slot of the
    /// rightmost leaf.
    pub fn end(&self) -> Result<IndexIterator> {
        let header = self.cache.read_page(self.header_page_id)?;
        let root_id = HeaderNodeRef::new(header.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(IndexIterator::empty(Arc::clone(&self.cache), self.key_size));
        }

        let mut guard = self.cache.read_page(root_id)?;
        drop(header);
        loop {
            let child = {
                let data = guard.data();
                match btree_page::node_kind(data) {
                    NodeKind::Leaf => {
                        let size = LeafNodeRef::new(data, self.key_size).size();
                        return Ok(IndexIterator::new(
                            Arc::clone(&self.cache),
                            guard,
                            size,
                            self.key_size,
                        ));
                    }
                    NodeKind::Internal => {
                        let node = InternalNodeRef::new(data, self.key_size);
                        node.child_at(node.size() - 1)
                    }
                }
            };
            let next = self.cache.read_page(child)?;
            guard = next;
        }
    }

    /// Number of levels from root to leaf (0 for an empty tree).
    pub fn height(&self) -> Result<usize> {
        let header = self.cache.read_page(self.header_page_id)?;
        let root_id = HeaderNodeRef::new(header.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(0);
        }

        let mut height = 1;
        let mut guard = self.cache.read_page(root_id)?;
        drop(header);
        loop {
            let child = {
                let data = guard.data();
                match btree_page::node_kind(data) {
                    NodeKind::Leaf => return Ok(height),
                    NodeKind::Internal => InternalNodeRef::new(data, self.key_size).child_at(0),
                }
            };
            let next = self.cache.read_page(child)?;
            guard = next;
            height += 1;
        }
    }
}
