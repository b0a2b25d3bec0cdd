use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{FrameId, OxbowError, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Cache state shared with the guards, which report back here when they
/// drop.
pub(crate) struct CacheState {
    /// The cache frames
    frames: Vec<FrameHeader>,
    /// Page table: maps resident page IDs to frame IDs
    page_table: Mutex<HashMap<PageId, FrameId>>,
    /// Frames not currently holding any page
    free_list: Mutex<VecDeque<FrameId>>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
}

impl CacheState {
    pub(crate) fn frame(&self, frame_id: FrameId) -> &FrameHeader {
        &self.frames[frame_id.as_usize()]
    }

    /// Guard drop path: propagate the dirty bit and unpin. The page table
    /// lock serializes the unpin with pins taken by `fetch_page`, so a
    /// frame is never marked evictable under a fresh pin.
    pub(crate) fn release_frame(&self, frame_id: FrameId, dirtied: bool) {
        let frame = self.frame(frame_id);
        if dirtied {
            frame.mark_dirty();
        }
        let _page_table = self.page_table.lock();
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true).ok();
        }
    }
}

/// PageCache fetches database pages from disk and caches them in a fixed
/// number of frames, loaning out latched page guards. Eviction decisions go
/// through the LRU-K replacer.
///
/// A guard is the only way to dereference a page: `read_page` and
/// `write_page` pin the frame and latch the page bytes, and dropping the
/// guard unpins and releases the latch.
pub struct PageCache {
    /// Number of frames in the cache
    pool_size: usize,
    state: Arc<CacheState>,
    /// Disk scheduler for backing I/O
    disk_scheduler: DiskScheduler,
}

impl PageCache {
    /// Creates a new PageCache with the given number of frames, LRU-K `k`
    /// value, and disk manager.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::new();

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(FrameHeader::new(frame_id));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(CacheState {
            frames,
            page_table: Mutex::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: LruKReplacer::new(k, pool_size),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a new page and places it in the cache. The page starts
    /// unpinned; acquire a guard to use it. Fails with `CacheFull` when
    /// every frame is pinned.
    pub fn new_page(&self) -> Result<PageId> {
        let mut page_table = self.state.page_table.lock();
        let frame_id = self.acquire_frame(&mut page_table)?;

        let page_id = self.disk_scheduler.disk_manager().allocate_page()?;

        self.state.frame(frame_id).load_blank(page_id);
        page_table.insert(page_id, frame_id);

        self.state.replacer.record_access(frame_id)?;
        self.state.replacer.set_evictable(frame_id, true)?;

        Ok(page_id)
    }

    /// Drops a page from the cache and deallocates it on disk. Fails if the
    /// page is still pinned; returns false if the page is not resident.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut page_table = self.state.page_table.lock();

        if let Some(frame_id) = page_table.remove(&page_id) {
            let frame = self.state.frame(frame_id);

            if frame.pin_count() > 0 {
                page_table.insert(page_id, frame_id);
                return Err(OxbowError::PageStillPinned(page_id));
            }

            frame.clear();
            self.state.replacer.remove(frame_id)?;
            self.state.free_list.lock().push_back(frame_id);

            self.disk_scheduler
                .disk_manager()
                .deallocate_page(page_id)?;

            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Acquires a read-latched guard on the given page, fetching it from
    /// disk if necessary.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(OxbowError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_page(page_id)?;
        Ok(ReadPageGuard::latch(
            Arc::clone(&self.state),
            page_id,
            frame_id,
        ))
    }

    /// Acquires a write-latched guard on the given page, fetching it from
    /// disk if necessary.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(OxbowError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_page(page_id)?;
        Ok(WritePageGuard::latch(
            Arc::clone(&self.state),
            page_id,
            frame_id,
        ))
    }

    /// Writes a resident page back to disk and clears its dirty bit.
    /// Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(OxbowError::InvalidPageId(page_id));
        }

        let page_table = self.state.page_table.lock();

        if let Some(&frame_id) = page_table.get(&page_id) {
            let mut data = [0u8; PAGE_SIZE];
            self.state.frame(frame_id).flush_into(&mut data);
            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Writes every dirty resident page back to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_table = self.state.page_table.lock();

        for (&page_id, &frame_id) in page_table.iter() {
            let frame = self.state.frame(frame_id);
            if frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.flush_into(&mut data);
                self.disk_scheduler.schedule_write_sync(page_id, &data)?;
            }
        }

        Ok(())
    }

    /// Returns the pin count for a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let page_table = self.state.page_table.lock();
        page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frame(frame_id).pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.free_list.lock().len()
    }

    /// Brings a page into the cache and returns its frame, pinned and
    /// marked non-evictable. The page table lock is held across the whole
    /// miss path so two threads cannot load the same page into two frames.
    fn fetch_page(&self, page_id: PageId) -> Result<FrameId> {
        let mut page_table = self.state.page_table.lock();

        if let Some(&frame_id) = page_table.get(&page_id) {
            self.state.frame(frame_id).pin();
            self.state.replacer.record_access(frame_id)?;
            self.state.replacer.set_evictable(frame_id, false)?;
            return Ok(frame_id);
        }

        let frame_id = self.acquire_frame(&mut page_table)?;

        let mut data = [0u8; PAGE_SIZE];
        self.disk_scheduler.schedule_read_sync(page_id, &mut data)?;

        let frame = self.state.frame(frame_id);
        frame.load(page_id, &data);
        frame.pin();

        page_table.insert(page_id, frame_id);

        self.state.replacer.record_access(frame_id)?;
        self.state.replacer.set_evictable(frame_id, false)?;

        Ok(frame_id)
    }

    /// Finds a usable frame, from the free list or by evicting a victim.
    /// The caller holds the page table lock, which keeps the chosen victim
    /// from being re-fetched between eviction and reuse.
    fn acquire_frame(&self, page_table: &mut HashMap<PageId, FrameId>) -> Result<FrameId> {
        {
            let mut free_list = self.state.free_list.lock();
            if let Some(frame_id) = free_list.pop_front() {
                return Ok(frame_id);
            }
        }

        if let Some(frame_id) = self.state.replacer.evict() {
            let frame = self.state.frame(frame_id);
            let old_page_id = frame.page_id();

            if frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.flush_into(&mut data);
                self.disk_scheduler.schedule_write_sync(old_page_id, &data)?;
            }

            page_table.remove(&old_page_id);
            frame.clear();

            Ok(frame_id)
        } else {
            Err(OxbowError::CacheFull)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_cache(pool_size: usize) -> (PageCache, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let cache = PageCache::new(pool_size, 2, dm);
        (cache, temp_file)
    }

    #[test]
    fn test_page_cache_new() {
        let (cache, _temp) = create_cache(10);
        assert_eq!(cache.pool_size(), 10);
        assert_eq!(cache.free_frame_count(), 10);
    }

    #[test]
    fn test_new_page_starts_unpinned() {
        let (cache, _temp) = create_cache(10);

        let page_id = cache.new_page().unwrap();
        assert_eq!(page_id, PageId::new(0));
        assert_eq!(cache.get_pin_count(page_id), Some(0));
        assert_eq!(cache.free_frame_count(), 9);
    }

    #[test]
    fn test_read_write_round_trip() {
        let (cache, _temp) = create_cache(10);

        let page_id = cache.new_page().unwrap();

        {
            let mut guard = cache.write_page(page_id).unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
        }

        assert_eq!(cache.get_pin_count(page_id), Some(0));

        {
            let guard = cache.read_page(page_id).unwrap();
            assert_eq!(guard.data()[0], 42);
            assert_eq!(guard.data()[100], 255);
        }
    }

    #[test]
    fn test_flush_and_reload() {
        let (cache, temp) = create_cache(10);

        let page_id = cache.new_page().unwrap();
        {
            let mut guard = cache.write_page(page_id).unwrap();
            guard.data_mut()[0] = 42;
        }
        cache.flush_page(page_id).unwrap();
        drop(cache);

        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let cache2 = PageCache::new(10, 2, dm);

        let guard = cache2.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_eviction_when_full() {
        let (cache, _temp) = create_cache(3);

        let page_ids: Vec<_> = (0..3).map(|_| cache.new_page().unwrap()).collect();
        for &pid in &page_ids {
            let mut guard = cache.write_page(pid).unwrap();
            guard.data_mut()[0] = pid.as_u32() as u8;
        }

        assert_eq!(cache.free_frame_count(), 0);

        // All guards are dropped, so one resident page gets evicted
        let new_page_id = cache.new_page().unwrap();
        assert_eq!(new_page_id, PageId::new(3));
    }

    #[test]
    fn test_delete_page() {
        let (cache, _temp) = create_cache(10);

        let page_id = cache.new_page().unwrap();

        {
            let _guard = cache.read_page(page_id).unwrap();
            assert!(cache.delete_page(page_id).is_err());
        }

        assert!(cache.delete_page(page_id).unwrap());
        assert_eq!(cache.get_pin_count(page_id), None);
    }

    #[test]
    fn test_cache_full_with_pinned_pages() {
        let (cache, _temp) = create_cache(2);

        let page_id1 = cache.new_page().unwrap();
        let page_id2 = cache.new_page().unwrap();

        let _guard1 = cache.read_page(page_id1).unwrap();
        let _guard2 = cache.read_page(page_id2).unwrap();

        assert!(matches!(cache.new_page(), Err(OxbowError::CacheFull)));
    }
}
