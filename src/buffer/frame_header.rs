use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Arc-owned latch guards over a frame's page bytes. The guard keeps the
/// buffer alive on its own, so page guards need no lifetime tie back to
/// the cache's frame table.
pub(crate) type FrameReadLatch = ArcRwLockReadGuard<RawRwLock, Box<[u8; PAGE_SIZE]>>;
pub(crate) type FrameWriteLatch = ArcRwLockWriteGuard<RawRwLock, Box<[u8; PAGE_SIZE]>>;

/// Which page occupies the frame, and whether its image has diverged from
/// disk. Tracked together because they only ever change together.
#[derive(Clone, Copy)]
struct Resident {
    page_id: PageId,
    is_dirty: bool,
}

const EMPTY: Resident = Resident {
    page_id: INVALID_PAGE_ID,
    is_dirty: false,
};

/// One buffer frame: the page bytes behind their reader/writer latch, plus
/// residency bookkeeping. The pin count tracks outstanding guards; a
/// pinned frame is never offered to the replacer, which is what keeps
/// `load`/`clear` from racing a latched reader.
pub struct FrameHeader {
    frame_id: FrameId,
    resident: Mutex<Resident>,
    pin_count: AtomicU32,
    buf: Arc<RwLock<Box<[u8; PAGE_SIZE]>>>,
}

impl FrameHeader {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            resident: Mutex::new(EMPTY),
            pin_count: AtomicU32::new(0),
            buf: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        self.resident.lock().page_id
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Registers another guard on this frame; returns the new count.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one guard's claim; returns the remaining count.
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin without a matching pin");
        prev - 1
    }

    pub fn is_dirty(&self) -> bool {
        self.resident.lock().is_dirty
    }

    /// Records that a write guard modified the page image.
    pub fn mark_dirty(&self) {
        self.resident.lock().is_dirty = true;
    }

    /// Installs a page image read from disk; the frame starts clean.
    pub fn load(&self, page_id: PageId, image: &[u8]) {
        assert_eq!(image.len(), PAGE_SIZE);
        self.buf.write().copy_from_slice(image);
        *self.resident.lock() = Resident {
            page_id,
            is_dirty: false,
        };
    }

    /// Installs a zeroed image for a freshly allocated page.
    pub fn load_blank(&self, page_id: PageId) {
        self.buf.write().fill(0);
        *self.resident.lock() = Resident {
            page_id,
            is_dirty: false,
        };
    }

    /// Copies the page image out for write-back and clears the dirty bit.
    pub fn flush_into(&self, out: &mut [u8]) {
        assert_eq!(out.len(), PAGE_SIZE);
        out.copy_from_slice(&**self.buf.read());
        self.resident.lock().is_dirty = false;
    }

    /// Returns the frame to its empty state. The caller has taken it out
    /// of circulation: no pins, no latches.
    pub fn clear(&self) {
        debug_assert_eq!(self.pin_count(), 0);
        *self.resident.lock() = EMPTY;
        self.buf.write().fill(0);
    }

    /// Blocks until the page's read latch is available.
    pub(crate) fn latch_read(&self) -> FrameReadLatch {
        self.buf.read_arc()
    }

    /// Blocks until the page's write latch is available.
    pub(crate) fn latch_write(&self) -> FrameWriteLatch {
        self.buf.write_arc()
    }
}
