use std::sync::Arc;

use crate::common::{FrameId, PageId};

use super::frame_header::{FrameReadLatch, FrameWriteLatch};
use super::page_cache::CacheState;

/// RAII guard for read access to a page. Holding the guard keeps the frame
/// pinned and the page's read latch held; dropping it releases both and
/// hands the frame back to the cache. Releasing the guard invalidates any
/// view taken over its data.
pub struct ReadPageGuard {
    page_id: PageId,
    frame_id: FrameId,
    latch: Option<FrameReadLatch>,
    cache: Arc<CacheState>,
}

impl ReadPageGuard {
    /// Latches the (already pinned) frame for reading, blocking until the
    /// read latch is available.
    pub(crate) fn latch(cache: Arc<CacheState>, page_id: PageId, frame_id: FrameId) -> Self {
        let latch = cache.frame(frame_id).latch_read();
        Self {
            page_id,
            frame_id,
            latch: Some(latch),
            cache,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch.as_ref().expect("latch held until drop")[..]
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        self.latch.take();
        self.cache.release_frame(self.frame_id, false);
    }
}

/// RAII guard for write access to a page. The first mutable access marks
/// the guard dirty; the dirty bit reaches the frame when the guard drops.
pub struct WritePageGuard {
    page_id: PageId,
    frame_id: FrameId,
    dirtied: bool,
    latch: Option<FrameWriteLatch>,
    cache: Arc<CacheState>,
}

impl WritePageGuard {
    /// Latches the (already pinned) frame for writing, blocking until the
    /// write latch is available.
    pub(crate) fn latch(cache: Arc<CacheState>, page_id: PageId, frame_id: FrameId) -> Self {
        let latch = cache.frame(frame_id).latch_write();
        Self {
            page_id,
            frame_id,
            dirtied: false,
            latch: Some(latch),
            cache,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch.as_ref().expect("latch held until drop")[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirtied = true;
        &mut self.latch.as_mut().expect("latch held until drop")[..]
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        // The latch goes first: a flusher may hold the cache's page table
        // lock while waiting on this page's latch, so reporting back to
        // the cache cannot happen before the latch is released.
        self.latch.take();
        self.cache.release_frame(self.frame_id, self.dirtied);
    }
}
