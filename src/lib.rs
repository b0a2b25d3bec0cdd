//! Oxbow - a disk-oriented database storage kernel in Rust
//!
//! This crate provides the storage and access-method core of a relational
//! database: pages cached in memory, ordered indexes over them, and the
//! table heap the execution layer consumes.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): Disk I/O and page organization
//!   - `DiskManager`: Reads and writes pages to/from a database file
//!   - `DiskScheduler`: Background disk I/O over a request queue
//!   - `TablePage`: Slotted tuple storage with per-tuple metadata
//!   - `TableHeap`: Linked table pages addressed by `RecordId`
//!
//! - **Page Cache** (`buffer`): Memory management for database pages
//!   - `PageCache`: Fetches pages from disk and loans latched handles
//!   - `LruKReplacer`: LRU-K eviction policy
//!   - `ReadPageGuard`/`WritePageGuard`: RAII page latches
//!
//! - **Index** (`index`): Ordered access methods
//!   - `BPlusTree`: Disk-page-backed B+tree with latch coupling
//!   - `IndexIterator`: Forward scan across the leaf chain
//!   - `SkipList`: Concurrent in-memory ordered set
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oxbow::buffer::PageCache;
//! use oxbow::index::{BPlusTree, IntegerComparator};
//! use oxbow::storage::disk::DiskManager;
//! use oxbow::common::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let cache = Arc::new(PageCache::new(100, 2, disk_manager));
//!
//! // A B+tree over 4-byte integer keys
//! let tree = BPlusTree::new(cache, Arc::new(IntegerComparator), 4, 128, 128).unwrap();
//!
//! let rid = RecordId::new(PageId::new(7), SlotId::new(0));
//! tree.insert(&42u32.to_le_bytes(), rid).unwrap();
//! assert_eq!(tree.get(&42u32.to_le_bytes()).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{OxbowError, PageId, RecordId, Result, SlotId};
