use std::sync::Arc;

use crate::buffer::{PageCache, ReadPageGuard};
use crate::common::{PageId, RecordId, Result, INVALID_PAGE_ID};

use super::leaf_page::LeafNodeRef;

/// Forward scan over the leaf chain. The iterator holds a read latch on its
/// current leaf; stepping past the last slot latches the successor leaf
/// before the current latch is released. The end position is one past the
/// last slot of the rightmost leaf, and advancing there is a no-op.
///
/// Two iterators are equal when they sit on the same (leaf page, slot)
/// position; iterators over an empty tree hold no leaf and are all equal.
pub struct IndexIterator {
    cache: Arc<PageCache>,
    guard: Option<ReadPageGuard>,
    index: usize,
    key_size: usize,
}

impl IndexIterator {
    pub(crate) fn new(
        cache: Arc<PageCache>,
        guard: ReadPageGuard,
        index: usize,
        key_size: usize,
    ) -> Self {
        Self {
            cache,
            guard: Some(guard),
            index,
            key_size,
        }
    }

    pub(crate) fn empty(cache: Arc<PageCache>, key_size: usize) -> Self {
        Self {
            cache,
            guard: None,
            index: 0,
            key_size,
        }
    }

    /// Current (leaf page, slot) position, or `None` over an empty tree.
    pub fn position(&self) -> Option<(PageId, usize)> {
        self.guard.as_ref().map(|g| (g.page_id(), self.index))
    }

    pub fn is_end(&self) -> bool {
        match &self.guard {
            None => true,
            Some(guard) => {
                let leaf = LeafNodeRef::new(guard.data(), self.key_size);
                self.index >= leaf.size() && leaf.next_page_id() == INVALID_PAGE_ID
            }
        }
    }

    /// Yields the current entry and steps forward, following the leaf
    /// chain. Returns `None` at the end position.
    pub fn advance(&mut self) -> Result<Option<(Vec<u8>, RecordId)>> {
        loop {
            let Some(guard) = &self.guard else {
                return Ok(None);
            };

            let (entry, next_id) = {
                let leaf = LeafNodeRef::new(guard.data(), self.key_size);
                if self.index < leaf.size() {
                    let key = leaf.key_at(self.index).to_vec();
                    let rid = leaf.rid_at(self.index);
                    (Some((key, rid)), INVALID_PAGE_ID)
                } else {
                    (None, leaf.next_page_id())
                }
            };

            if let Some(entry) = entry {
                self.index += 1;
                return Ok(Some(entry));
            }

            if next_id == INVALID_PAGE_ID {
                // Parked at the end position
                return Ok(None);
            }

            // Latch the successor leaf, then release the current one
            let next_guard = self.cache.read_page(next_id)?;
            self.guard = Some(next_guard);
            self.index = 0;
        }
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(Vec<u8>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl PartialEq for IndexIterator {
    fn eq(&self, other: &Self) -> bool {
        self.position() == other.position()
    }
}
