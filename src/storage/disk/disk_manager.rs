use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, Result, PAGE_SIZE};

/// DiskManager reads and writes pages to a single database file. Pages are
/// addressed by page ID at fixed offsets; allocation is a bump counter with
/// a free list of deallocated IDs.
pub struct DiskManager {
    /// The database file; the mutex also serializes the file cursor
    file: Mutex<File>,
    /// Number of pages ever allocated (high-water mark)
    num_pages: AtomicU32,
    /// Deallocated page IDs available for reuse
    free_pages: Mutex<Vec<PageId>>,
    /// Number of disk reads performed
    num_reads: AtomicU32,
    /// Number of disk writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens (or creates) the database file at the given path.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(db_path.as_ref())?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file: Mutex::new(file),
            num_pages: AtomicU32::new(num_pages),
            free_pages: Mutex::new(Vec::new()),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        })
    }

    /// Allocates a fresh page ID, reusing a deallocated one if available.
    pub fn allocate_page(&self) -> Result<PageId> {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return Ok(page_id);
        }
        let page_id = PageId::new(self.num_pages.fetch_add(1, Ordering::SeqCst));
        Ok(page_id)
    }

    /// Returns a page ID to the free pool for later reuse. The on-disk
    /// bytes are left as-is until the ID is reallocated.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        self.free_pages.lock().push(page_id);
        Ok(())
    }

    /// Reads a page into the given buffer. Reading past the current end of
    /// file yields zeroed bytes, matching a freshly allocated page.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            data.fill(0);
        } else {
            file.seek(SeekFrom::Start(offset))?;
            if offset + PAGE_SIZE as u64 <= file_size {
                file.read_exact(data)?;
            } else {
                // The page was allocated but only partially written
                let available = (file_size - offset) as usize;
                file.read_exact(&mut data[..available])?;
                data[available..].fill(0);
            }
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page from the given buffer.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Returns the allocation high-water mark.
    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::SeqCst)
    }

    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }
}
