use crate::common::{OxbowError, PageId, Result, SlotId, PAGE_SIZE};

/// Per-tuple metadata stored alongside the payload. Deletes are metadata
/// marks; the payload stays in place until the page is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMeta {
    /// Commit/insert timestamp (owned by upper layers)
    pub ts: u64,
    /// Whether the tuple has been deleted
    pub is_deleted: bool,
}

impl TupleMeta {
    pub fn new(ts: u64, is_deleted: bool) -> Self {
        Self { ts, is_deleted }
    }
}

/// Table page layout:
///
/// | Field           | Offset | Size |
/// |-----------------|--------|------|
/// | page_id         | 0      | 4    |
/// | next_page_id    | 4      | 4    |
/// | num_slots       | 8      | 2    |
/// | free_space_end  | 10     | 2    |
/// | slot array      | 12     | 4×n  |
///
/// Each slot is `[offset: u16][length: u16]`, pointing at a tuple record of
/// `[ts: u64][is_deleted: u8][payload...]` written from the end of the page
/// downward. Slots are append-only; `length` includes the meta prefix.
const HEADER_SIZE: usize = 12;
const SLOT_SIZE: usize = 4;
const META_SIZE: usize = 9;

const PAGE_ID_OFFSET: usize = 0;
const NEXT_PAGE_ID_OFFSET: usize = 4;
const NUM_SLOTS_OFFSET: usize = 8;
const FREE_SPACE_END_OFFSET: usize = 10;

const INVALID_PAGE: u32 = u32::MAX;

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
}

fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Mutable view over a table page.
pub struct TablePage<'a> {
    data: &'a mut [u8],
}

impl<'a> TablePage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    /// Initializes a fresh table page.
    pub fn init(&mut self, page_id: PageId) {
        self.data.fill(0);
        write_u32(self.data, PAGE_ID_OFFSET, page_id.as_u32());
        write_u32(self.data, NEXT_PAGE_ID_OFFSET, INVALID_PAGE);
        write_u16(self.data, NUM_SLOTS_OFFSET, 0);
        write_u16(self.data, FREE_SPACE_END_OFFSET, PAGE_SIZE as u16);
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(read_u32(self.data, PAGE_ID_OFFSET))
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        let value = read_u32(self.data, NEXT_PAGE_ID_OFFSET);
        (value != INVALID_PAGE).then(|| PageId::new(value))
    }

    pub fn set_next_page_id(&mut self, page_id: Option<PageId>) {
        let value = page_id.map(|p| p.as_u32()).unwrap_or(INVALID_PAGE);
        write_u32(self.data, NEXT_PAGE_ID_OFFSET, value);
    }

    pub fn tuple_count(&self) -> usize {
        read_u16(self.data, NUM_SLOTS_OFFSET) as usize
    }

    fn free_space_end(&self) -> usize {
        read_u16(self.data, FREE_SPACE_END_OFFSET) as usize
    }

    /// Free bytes between the slot array and the tuple data region.
    pub fn free_space(&self) -> usize {
        let slots_end = HEADER_SIZE + self.tuple_count() * SLOT_SIZE;
        self.free_space_end().saturating_sub(slots_end)
    }

    pub fn can_insert(&self, payload_len: usize) -> bool {
        self.free_space() >= payload_len + META_SIZE + SLOT_SIZE
    }

    fn slot(&self, slot_id: SlotId) -> Result<(usize, usize)> {
        let slot_num = slot_id.as_u16() as usize;
        if slot_num >= self.tuple_count() {
            return Err(OxbowError::InvalidSlotId(slot_id.as_u16()));
        }
        let base = HEADER_SIZE + slot_num * SLOT_SIZE;
        let offset = read_u16(self.data, base) as usize;
        let length = read_u16(self.data, base + 2) as usize;
        Ok((offset, length))
    }

    /// Appends a tuple and returns its slot ID.
    pub fn insert_tuple(&mut self, meta: TupleMeta, payload: &[u8]) -> Result<SlotId> {
        if !self.can_insert(payload.len()) {
            return Err(OxbowError::PageOverflow {
                tuple_size: payload.len() + META_SIZE,
                available: self.free_space().saturating_sub(SLOT_SIZE),
            });
        }

        let num_slots = self.tuple_count();
        let record_len = META_SIZE + payload.len();
        let offset = self.free_space_end() - record_len;

        self.write_meta(offset, meta);
        self.data[offset + META_SIZE..offset + record_len].copy_from_slice(payload);

        let slot_base = HEADER_SIZE + num_slots * SLOT_SIZE;
        write_u16(self.data, slot_base, offset as u16);
        write_u16(self.data, slot_base + 2, record_len as u16);

        write_u16(self.data, NUM_SLOTS_OFFSET, (num_slots + 1) as u16);
        write_u16(self.data, FREE_SPACE_END_OFFSET, offset as u16);

        Ok(SlotId::new(num_slots as u16))
    }

    /// Reads a tuple's metadata and payload.
    pub fn get_tuple(&self, slot_id: SlotId) -> Result<(TupleMeta, &[u8])> {
        let (offset, length) = self.slot(slot_id)?;
        Ok((
            self.read_meta(offset),
            &self.data[offset + META_SIZE..offset + length],
        ))
    }

    /// Rewrites a tuple's metadata in place.
    pub fn update_tuple_meta(&mut self, slot_id: SlotId, meta: TupleMeta) -> Result<()> {
        let (offset, _) = self.slot(slot_id)?;
        self.write_meta(offset, meta);
        Ok(())
    }

    /// Rewrites a tuple's payload (and metadata) in place. The new payload
    /// must have the same length as the stored one.
    pub fn update_tuple_in_place(
        &mut self,
        slot_id: SlotId,
        meta: TupleMeta,
        payload: &[u8],
    ) -> Result<()> {
        let (offset, length) = self.slot(slot_id)?;
        let expected = length - META_SIZE;
        if payload.len() != expected {
            return Err(OxbowError::TupleLengthMismatch {
                expected,
                got: payload.len(),
            });
        }
        self.write_meta(offset, meta);
        self.data[offset + META_SIZE..offset + length].copy_from_slice(payload);
        Ok(())
    }

    fn read_meta(&self, offset: usize) -> TupleMeta {
        let ts = u64::from_le_bytes(self.data[offset..offset + 8].try_into().unwrap());
        TupleMeta::new(ts, self.data[offset + 8] != 0)
    }

    fn write_meta(&mut self, offset: usize, meta: TupleMeta) {
        self.data[offset..offset + 8].copy_from_slice(&meta.ts.to_le_bytes());
        self.data[offset + 8] = meta.is_deleted as u8;
    }
}

/// Read-only view over a table page.
pub struct TablePageRef<'a> {
    data: &'a [u8],
}

impl<'a> TablePageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(read_u32(self.data, PAGE_ID_OFFSET))
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        let value = read_u32(self.data, NEXT_PAGE_ID_OFFSET);
        (value != INVALID_PAGE).then(|| PageId::new(value))
    }

    pub fn tuple_count(&self) -> usize {
        read_u16(self.data, NUM_SLOTS_OFFSET) as usize
    }

    pub fn get_tuple(&self, slot_id: SlotId) -> Result<(TupleMeta, &[u8])> {
        let slot_num = slot_id.as_u16() as usize;
        if slot_num >= self.tuple_count() {
            return Err(OxbowError::InvalidSlotId(slot_id.as_u16()));
        }
        let base = HEADER_SIZE + slot_num * SLOT_SIZE;
        let offset = read_u16(self.data, base) as usize;
        let length = read_u16(self.data, base + 2) as usize;

        let ts = u64::from_le_bytes(self.data[offset..offset + 8].try_into().unwrap());
        let meta = TupleMeta::new(ts, self.data[offset + 8] != 0);
        Ok((meta, &self.data[offset + META_SIZE..offset + length]))
    }
}
