use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::PageCache;
use crate::common::{PageId, RecordId, Result, SlotId};

use super::page::{TablePage, TablePageRef, TupleMeta};

/// TableHeap is the physical storage for a table: a linked list of table
/// pages, appended at the tail. Tuples are addressed by `RecordId` and
/// never move; deletes and updates rewrite metadata or payload in place.
pub struct TableHeap {
    cache: Arc<PageCache>,
    first_page_id: PageId,
    /// Tail of the page list; the mutex serializes appends
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    /// Creates a heap with one empty page.
    pub fn new(cache: Arc<PageCache>) -> Result<Self> {
        let first_page_id = cache.new_page()?;
        {
            let mut guard = cache.write_page(first_page_id)?;
            TablePage::new(guard.data_mut()).init(first_page_id);
        }

        Ok(Self {
            cache,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    /// Opens an existing heap rooted at its first page. The caller must
    /// pass the current tail page as well (tracked by upper layers).
    pub fn open(cache: Arc<PageCache>, first_page_id: PageId, last_page_id: PageId) -> Self {
        Self {
            cache,
            first_page_id,
            last_page_id: Mutex::new(last_page_id),
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Appends a tuple to the tail page, growing the page list when the
    /// tail is full. Returns the tuple's record ID.
    pub fn insert_tuple(&self, meta: TupleMeta, payload: &[u8]) -> Result<RecordId> {
        let mut last_page_id = self.last_page_id.lock();

        let mut guard = self.cache.write_page(*last_page_id)?;
        {
            let mut page = TablePage::new(guard.data_mut());
            if page.can_insert(payload.len()) {
                let slot_id = page.insert_tuple(meta, payload)?;
                return Ok(RecordId::new(*last_page_id, slot_id));
            }
        }

        // Tail is full: chain a fresh page and retry there. The old tail's
        // write latch is held across the link update.
        let new_page_id = self.cache.new_page()?;
        TablePage::new(guard.data_mut()).set_next_page_id(Some(new_page_id));
        drop(guard);

        let mut new_guard = self.cache.write_page(new_page_id)?;
        let mut page = TablePage::new(new_guard.data_mut());
        page.init(new_page_id);
        let slot_id = page.insert_tuple(meta, payload)?;

        *last_page_id = new_page_id;
        Ok(RecordId::new(new_page_id, slot_id))
    }

    /// Reads a tuple's metadata and payload.
    pub fn get_tuple(&self, rid: RecordId) -> Result<(TupleMeta, Vec<u8>)> {
        let guard = self.cache.read_page(rid.page_id)?;
        let page = TablePageRef::new(guard.data());
        let (meta, payload) = page.get_tuple(rid.slot_id)?;
        Ok((meta, payload.to_vec()))
    }

    /// Rewrites a tuple's metadata (e.g. a delete mark) in place.
    pub fn update_tuple_meta(&self, meta: TupleMeta, rid: RecordId) -> Result<()> {
        let mut guard = self.cache.write_page(rid.page_id)?;
        TablePage::new(guard.data_mut()).update_tuple_meta(rid.slot_id, meta)
    }

    /// Rewrites a tuple's payload and metadata in place; the payload length
    /// must match the stored tuple.
    pub fn update_tuple_in_place(
        &self,
        meta: TupleMeta,
        payload: &[u8],
        rid: RecordId,
    ) -> Result<()> {
        let mut guard = self.cache.write_page(rid.page_id)?;
        TablePage::new(guard.data_mut()).update_tuple_in_place(rid.slot_id, meta, payload)
    }

    /// Creates an iterator over every tuple in the heap, in page-link and
    /// slot order. Delete-marked tuples are yielded too; callers filter on
    /// `TupleMeta::is_deleted`.
    pub fn make_iterator(&self) -> TableIterator {
        TableIterator {
            cache: Arc::clone(&self.cache),
            current_page_id: Some(self.first_page_id),
            current_slot: 0,
        }
    }
}

/// Forward iterator over a table heap. Latches one page at a time for the
/// duration of a single step.
pub struct TableIterator {
    cache: Arc<PageCache>,
    current_page_id: Option<PageId>,
    current_slot: u16,
}

impl TableIterator {
    pub fn next_tuple(&mut self) -> Result<Option<(RecordId, TupleMeta, Vec<u8>)>> {
        while let Some(page_id) = self.current_page_id {
            let next_page = {
                let guard = self.cache.read_page(page_id)?;
                let page = TablePageRef::new(guard.data());

                if (self.current_slot as usize) < page.tuple_count() {
                    let slot_id = SlotId::new(self.current_slot);
                    let (meta, payload) = page.get_tuple(slot_id)?;
                    let rid = RecordId::new(page_id, slot_id);
                    self.current_slot += 1;
                    return Ok(Some((rid, meta, payload.to_vec())));
                }

                page.next_page_id()
            };

            self.current_page_id = next_page;
            self.current_slot = 0;
        }

        Ok(None)
    }
}

impl Iterator for TableIterator {
    type Item = Result<(RecordId, TupleMeta, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_tuple() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
