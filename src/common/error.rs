use thiserror::Error;

use super::types::{FrameId, PageId};

/// Database error types
#[derive(Error, Debug)]
pub enum OxbowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Page cache exhausted, no evictable frames available")]
    CacheFull,

    #[error("Frame {0} is out of range for this replacer")]
    FrameOutOfRange(FrameId),

    #[error("Frame {0} is not evictable")]
    BusyFrame(FrameId),

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Page overflow: tuple size {tuple_size} exceeds available space {available}")]
    PageOverflow { tuple_size: usize, available: usize },

    #[error("Invalid slot ID: {0}")]
    InvalidSlotId(u16),

    #[error("Tuple length mismatch: expected {expected}, got {got}")]
    TupleLengthMismatch { expected: usize, got: usize },

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),
}

pub type Result<T> = std::result::Result<T, OxbowError>;
