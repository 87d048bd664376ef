//! Slotted base page.
//!
//! # Page Layout
//!
//! ```text
//! +----------------------+  0
//! |    Page Header       |  32 bytes
//! +----------------------+  32
//! |    Segment 0         |  segments grow forward from the header
//! |    Segment 2         |
//! |    Segment 1         |
//! +----------------------+  next_free_position
//! |                      |
//! |    Free Space        |
//! |                      |
//! +----------------------+
//! |    [slot 1]          |  footer grows backward, 4 bytes per slot:
//! |    [slot 0]          |  length u16, position u16
//! +----------------------+  8192
//! ```
//!
//! # Header Layout
//!
//! | Offset | Field               |
//! |--------|---------------------|
//! | 0      | page id (u32)       |
//! | 4      | page type (u8)      |
//! | 5      | prev page id (u32)  |
//! | 9      | next page id (u32)  |
//! | 13     | free list slot (u8) |
//! | 14     | items count (u8)    |
//! | 15     | highest index (u8)  |
//! | 16     | used bytes (u16)    |
//! | 18     | fragmented (u16)    |
//! | 20     | next free pos (u16) |
//! | 22     | transaction id (u32)|
//! | 26     | confirmed (u8)      |
//! | 28     | checksum (u32)      |
//!
//! A slot whose position is 0 is free. Deleting a segment that is not the
//! last one leaves fragmented bytes behind; they are reclaimed by
//! [`BasePage::defrag`] when an insert needs more contiguous space.

use folio_common::{
    FolioError, FolioResult, PageId, TxnId, MAX_ITEMS_PER_PAGE, NO_FREE_LIST_SLOT,
    PAGE_FREE_LIST_SLOTS, PAGE_HEADER_SIZE, PAGE_SIZE, SLOT_SIZE,
};

use super::types::PageType;
use crate::buffer::PageBuffer;

const P_PAGE_ID: usize = 0;
const P_PAGE_TYPE: usize = 4;
const P_PREV_PAGE_ID: usize = 5;
const P_NEXT_PAGE_ID: usize = 9;
const P_PAGE_LIST_SLOT: usize = 13;
const P_ITEMS_COUNT: usize = 14;
const P_HIGHEST_INDEX: usize = 15;
const P_USED_BYTES: usize = 16;
const P_FRAGMENTED_BYTES: usize = 18;
const P_NEXT_FREE_POSITION: usize = 20;
const P_TRANSACTION_ID: usize = 22;
const P_IS_CONFIRMED: usize = 26;

/// Bytes available for segments and footer in an empty page.
pub const PAGE_AVAILABLE_BYTES: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Free-space thresholds of the free-list buckets, from emptiest to fullest.
const FREE_PAGE_SLOTS: [usize; PAGE_FREE_LIST_SLOTS - 1] = [
    PAGE_AVAILABLE_BYTES * 90 / 100,
    PAGE_AVAILABLE_BYTES * 75 / 100,
    PAGE_AVAILABLE_BYTES * 60 / 100,
    PAGE_AVAILABLE_BYTES * 30 / 100,
];

/// Returns the free-list bucket a page with `free_bytes` available belongs
/// in. Bucket 0 holds the emptiest pages.
#[must_use]
pub fn free_index_slot(free_bytes: usize) -> u8 {
    FREE_PAGE_SLOTS
        .iter()
        .position(|threshold| free_bytes >= *threshold)
        .map_or(PAGE_FREE_LIST_SLOTS as u8 - 1, |slot| slot as u8)
}

/// Returns the fullest bucket whose every page is guaranteed to fit
/// `length` bytes, or `None` when only a brand new page will do.
#[must_use]
pub fn minimum_index_slot(length: usize) -> Option<u8> {
    free_index_slot(length).checked_sub(1)
}

#[inline]
fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

#[inline]
fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Footer offset of a slot's length field.
#[inline]
const fn length_addr(index: u8) -> usize {
    PAGE_SIZE - (index as usize + 1) * SLOT_SIZE
}

/// Footer offset of a slot's position field.
#[inline]
const fn position_addr(index: u8) -> usize {
    length_addr(index) + 2
}

/// A page with its header decoded.
///
/// The header fields live in the struct and are written back to the buffer
/// by [`BasePage::update_buffer`]. Segment bytes are read and written
/// directly in the buffer, so a page over a shared buffer can be read but
/// any mutation fails with [`FolioError::ReadOnlyPage`].
///
/// # Example
///
/// ```rust
/// use folio_storage::{BasePage, PageBuffer, PageType};
/// use folio_common::PageId;
///
/// let mut page = BasePage::new(PageBuffer::zeroed(), PageId::new(3), PageType::Data).unwrap();
/// let (index, segment) = page.insert(5).unwrap();
/// segment.copy_from_slice(b"hello");
/// assert_eq!(page.segment(index).unwrap(), b"hello");
/// ```
#[derive(Debug)]
pub struct BasePage {
    buffer: PageBuffer,
    page_id: PageId,
    page_type: PageType,
    prev_page_id: PageId,
    next_page_id: PageId,
    page_list_slot: u8,
    items_count: u8,
    highest_index: u8,
    used_bytes: u16,
    fragmented_bytes: u16,
    next_free_position: u16,
    transaction_id: TxnId,
    is_confirmed: bool,
    is_dirty: bool,
}

impl BasePage {
    /// Initializes a fresh page of `page_type` over `buffer`, clearing it.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] if the buffer is shared.
    pub fn new(mut buffer: PageBuffer, page_id: PageId, page_type: PageType) -> FolioResult<Self> {
        buffer.as_mut_slice()?.fill(0);
        let mut page = Self {
            buffer,
            page_id,
            page_type,
            prev_page_id: PageId::INVALID,
            next_page_id: PageId::INVALID,
            page_list_slot: NO_FREE_LIST_SLOT,
            items_count: 0,
            highest_index: u8::MAX,
            used_bytes: 0,
            fragmented_bytes: 0,
            next_free_position: PAGE_HEADER_SIZE as u16,
            transaction_id: TxnId::INVALID,
            is_confirmed: false,
            is_dirty: true,
        };
        page.update_buffer()?;
        Ok(page)
    }

    /// Decodes the header of an existing page.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] if the page type byte is unknown.
    pub fn read(buffer: PageBuffer) -> FolioResult<Self> {
        let data = buffer.as_slice();
        let page_type = PageType::from_u8(data[P_PAGE_TYPE]).ok_or_else(|| {
            FolioError::corruption(format!(
                "unknown page type {} at position {}",
                data[P_PAGE_TYPE],
                buffer.position()
            ))
        })?;

        Ok(Self {
            page_id: PageId::new(read_u32(data, P_PAGE_ID)),
            page_type,
            prev_page_id: PageId::new(read_u32(data, P_PREV_PAGE_ID)),
            next_page_id: PageId::new(read_u32(data, P_NEXT_PAGE_ID)),
            page_list_slot: data[P_PAGE_LIST_SLOT],
            items_count: data[P_ITEMS_COUNT],
            highest_index: data[P_HIGHEST_INDEX],
            used_bytes: read_u16(data, P_USED_BYTES),
            fragmented_bytes: read_u16(data, P_FRAGMENTED_BYTES),
            next_free_position: read_u16(data, P_NEXT_FREE_POSITION),
            transaction_id: TxnId::new(read_u32(data, P_TRANSACTION_ID)),
            is_confirmed: data[P_IS_CONFIRMED] != 0,
            is_dirty: false,
            buffer,
        })
    }

    /// Decodes a page and checks its type.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::PageTypeMismatch`] when the page is of another
    /// type.
    pub fn read_as(buffer: PageBuffer, expected: PageType) -> FolioResult<Self> {
        let page = Self::read(buffer)?;
        page.expect_type(expected)?;
        Ok(page)
    }

    /// Fails unless the page is of `expected` type.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::PageTypeMismatch`].
    pub fn expect_type(&self, expected: PageType) -> FolioResult<()> {
        if self.page_type != expected {
            return Err(FolioError::PageTypeMismatch {
                page_id: self.page_id,
                expected: expected.to_string(),
                actual: self.page_type.to_string(),
            });
        }
        Ok(())
    }

    /// Writes the header fields into the buffer and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] if the buffer is shared.
    pub fn update_buffer(&mut self) -> FolioResult<&PageBuffer> {
        let data = self.buffer.as_mut_slice()?;
        write_u32(data, P_PAGE_ID, self.page_id.as_u32());
        data[P_PAGE_TYPE] = self.page_type as u8;
        write_u32(data, P_PREV_PAGE_ID, self.prev_page_id.as_u32());
        write_u32(data, P_NEXT_PAGE_ID, self.next_page_id.as_u32());
        data[P_PAGE_LIST_SLOT] = self.page_list_slot;
        data[P_ITEMS_COUNT] = self.items_count;
        data[P_HIGHEST_INDEX] = self.highest_index;
        write_u16(data, P_USED_BYTES, self.used_bytes);
        write_u16(data, P_FRAGMENTED_BYTES, self.fragmented_bytes);
        write_u16(data, P_NEXT_FREE_POSITION, self.next_free_position);
        write_u32(data, P_TRANSACTION_ID, self.transaction_id.as_u32());
        data[P_IS_CONFIRMED] = u8::from(self.is_confirmed);
        Ok(&self.buffer)
    }

    /// Writes the header and hands the buffer back.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] if the buffer is shared.
    pub fn into_buffer(mut self) -> FolioResult<PageBuffer> {
        self.update_buffer()?;
        Ok(self.buffer)
    }

    /// Hands the buffer back without touching it. Used for read-only pages
    /// and for pages being discarded.
    #[must_use]
    pub fn into_buffer_unchanged(self) -> PageBuffer {
        self.buffer
    }

    /// The underlying buffer.
    #[inline]
    #[must_use]
    pub fn buffer(&self) -> &PageBuffer {
        &self.buffer
    }

    /// Mutable access to the raw page bytes, marking the page dirty.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] if the buffer is shared.
    pub fn data_mut(&mut self) -> FolioResult<&mut [u8]> {
        self.is_dirty = true;
        self.buffer.as_mut_slice()
    }

    /// Returns true when the page can be modified.
    #[inline]
    #[must_use]
    pub fn is_writable(&self) -> bool {
        !self.buffer.is_shared()
    }

    // ------------------------------------------------------------------
    // Header fields
    // ------------------------------------------------------------------

    /// Page id.
    #[inline]
    #[must_use]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Page type.
    #[inline]
    #[must_use]
    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    /// Previous page in the list this page belongs to.
    #[inline]
    #[must_use]
    pub fn prev_page_id(&self) -> PageId {
        self.prev_page_id
    }

    /// Sets the previous page link.
    pub fn set_prev_page_id(&mut self, page_id: PageId) {
        self.prev_page_id = page_id;
        self.is_dirty = true;
    }

    /// Next page in the list this page belongs to.
    #[inline]
    #[must_use]
    pub fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    /// Sets the next page link.
    pub fn set_next_page_id(&mut self, page_id: PageId) {
        self.next_page_id = page_id;
        self.is_dirty = true;
    }

    /// Free-list bucket holding this page, or [`NO_FREE_LIST_SLOT`].
    #[inline]
    #[must_use]
    pub fn page_list_slot(&self) -> u8 {
        self.page_list_slot
    }

    /// Sets the free-list bucket.
    pub fn set_page_list_slot(&mut self, slot: u8) {
        self.page_list_slot = slot;
        self.is_dirty = true;
    }

    /// Number of live segments.
    #[inline]
    #[must_use]
    pub fn items_count(&self) -> u8 {
        self.items_count
    }

    /// Highest slot index in use, or 255 when empty.
    #[inline]
    #[must_use]
    pub fn highest_index(&self) -> u8 {
        self.highest_index
    }

    /// Bytes used by live segments.
    #[inline]
    #[must_use]
    pub fn used_bytes(&self) -> u16 {
        self.used_bytes
    }

    /// Bytes lost to deleted or shrunk segments.
    #[inline]
    #[must_use]
    pub fn fragmented_bytes(&self) -> u16 {
        self.fragmented_bytes
    }

    /// Position where the next segment will be written.
    #[inline]
    #[must_use]
    pub fn next_free_position(&self) -> u16 {
        self.next_free_position
    }

    /// Transaction that wrote this page version.
    #[inline]
    #[must_use]
    pub fn transaction_id(&self) -> TxnId {
        self.transaction_id
    }

    /// Sets the owning transaction id.
    pub fn set_transaction_id(&mut self, txn_id: TxnId) {
        self.transaction_id = txn_id;
        self.is_dirty = true;
    }

    /// Returns true for the last page written by a committed transaction.
    #[inline]
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.is_confirmed
    }

    /// Sets the confirmed flag.
    pub fn set_confirmed(&mut self, confirmed: bool) {
        self.is_confirmed = confirmed;
        self.is_dirty = true;
    }

    /// Returns true if the page was modified since it was read.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Sets the dirty flag.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    /// Bytes taken by the slot footer.
    #[inline]
    #[must_use]
    pub fn footer_size(&self) -> usize {
        if self.highest_index == u8::MAX {
            0
        } else {
            (self.highest_index as usize + 1) * SLOT_SIZE
        }
    }

    /// Bytes still available for new segments, counting fragmented space.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        if self.items_count as usize == MAX_ITEMS_PER_PAGE {
            0
        } else {
            PAGE_AVAILABLE_BYTES - self.used_bytes as usize - self.footer_size()
        }
    }

    /// Resets the page to an empty, unlinked page.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] if the buffer is shared.
    pub fn mark_as_empty(&mut self) -> FolioResult<()> {
        self.buffer.as_mut_slice()?[PAGE_HEADER_SIZE..].fill(0);
        self.page_type = PageType::Empty;
        self.prev_page_id = PageId::INVALID;
        self.next_page_id = PageId::INVALID;
        self.page_list_slot = NO_FREE_LIST_SLOT;
        self.items_count = 0;
        self.highest_index = u8::MAX;
        self.used_bytes = 0;
        self.fragmented_bytes = 0;
        self.next_free_position = PAGE_HEADER_SIZE as u16;
        self.is_dirty = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Segments
    // ------------------------------------------------------------------

    /// Returns true if `index` holds a live segment.
    #[must_use]
    pub fn is_used(&self, index: u8) -> bool {
        if self.highest_index == u8::MAX || index > self.highest_index {
            return false;
        }
        read_u16(self.buffer.as_slice(), position_addr(index)) != 0
    }

    /// Live slot indexes in ascending order.
    #[must_use]
    pub fn used_indexes(&self) -> Vec<u8> {
        if self.items_count == 0 {
            return Vec::new();
        }
        (0..=self.highest_index).filter(|i| self.is_used(*i)).collect()
    }

    fn locate(&self, index: u8) -> FolioResult<(usize, usize)> {
        let data = self.buffer.as_slice();
        if self.highest_index == u8::MAX || index > self.highest_index {
            return Err(self.bad_slot(index));
        }
        let position = read_u16(data, position_addr(index)) as usize;
        let length = read_u16(data, length_addr(index)) as usize;
        if position < PAGE_HEADER_SIZE || position + length > PAGE_SIZE - self.footer_size() {
            return Err(self.bad_slot(index));
        }
        Ok((position, length))
    }

    fn bad_slot(&self, index: u8) -> FolioError {
        FolioError::corruption(format!("page {} has no segment at slot {}", self.page_id, index))
    }

    /// Bytes of the segment at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a free or invalid slot.
    pub fn segment(&self, index: u8) -> FolioResult<&[u8]> {
        let (position, length) = self.locate(index)?;
        Ok(&self.buffer.as_slice()[position..position + length])
    }

    /// Mutable bytes of the segment at `index`, marking the page dirty.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a free or invalid slot and
    /// [`FolioError::ReadOnlyPage`] for a shared buffer.
    pub fn segment_mut(&mut self, index: u8) -> FolioResult<&mut [u8]> {
        let (position, length) = self.locate(index)?;
        self.is_dirty = true;
        Ok(&mut self.buffer.as_mut_slice()?[position..position + length])
    }

    /// Allocates a new segment of `length` bytes and returns its slot index
    /// and zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Internal`] when the page lacks room; callers
    /// pick pages through the free lists, so this indicates a bug.
    pub fn insert(&mut self, length: usize) -> FolioResult<(u8, &mut [u8])> {
        let (index, position) = self.internal_insert(length, None)?;
        let data = self.buffer.as_mut_slice()?;
        Ok((index, &mut data[position..position + length]))
    }

    fn internal_insert(&mut self, length: usize, fixed_index: Option<u8>) -> FolioResult<(u8, usize)> {
        let is_new_insert = fixed_index.is_none();
        let slot_cost = if is_new_insert { SLOT_SIZE } else { 0 };

        if length == 0 || self.free_bytes() < length + slot_cost {
            return Err(FolioError::internal(format!(
                "page {} cannot fit {} bytes ({} free)",
                self.page_id,
                length,
                self.free_bytes()
            )));
        }
        if !self.is_writable() {
            return Err(FolioError::ReadOnlyPage {
                page_id: self.page_id,
            });
        }

        // The contiguous gap can be smaller than a slot while enough bytes
        // sit in fragments.
        let continuous = (self.free_bytes() - self.fragmented_bytes as usize).saturating_sub(slot_cost);
        if length > continuous {
            self.defrag()?;
        }

        let index = match fixed_index {
            Some(index) => index,
            None => self.free_index(),
        };
        if self.highest_index == u8::MAX || index > self.highest_index {
            self.highest_index = index;
        }

        let position = self.next_free_position as usize;
        let data = self.buffer.as_mut_slice()?;
        if read_u16(data, position_addr(index)) != 0 {
            return Err(FolioError::internal(format!(
                "slot {} of page {} is already in use",
                index, self.page_id
            )));
        }
        write_u16(data, position_addr(index), position as u16);
        write_u16(data, length_addr(index), length as u16);
        data[position..position + length].fill(0);

        self.items_count += 1;
        self.used_bytes += length as u16;
        self.next_free_position += length as u16;
        self.is_dirty = true;

        Ok((index, position))
    }

    /// Removes the segment at `index`. An emptied page is reset so its
    /// whole area is contiguous again.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a free slot and
    /// [`FolioError::ReadOnlyPage`] for a shared buffer.
    pub fn delete(&mut self, index: u8) -> FolioResult<()> {
        let (position, length) = self.locate(index)?;
        let data = self.buffer.as_mut_slice()?;
        write_u16(data, position_addr(index), 0);
        write_u16(data, length_addr(index), 0);
        data[position..position + length].fill(0);

        self.items_count -= 1;
        self.used_bytes -= length as u16;

        if self.highest_index == index {
            self.update_highest_index();
        }

        if position + length == self.next_free_position as usize {
            self.next_free_position = position as u16;
        } else {
            self.fragmented_bytes += length as u16;
        }

        if self.items_count == 0 {
            self.highest_index = u8::MAX;
            self.next_free_position = PAGE_HEADER_SIZE as u16;
            self.fragmented_bytes = 0;
            self.buffer.as_mut_slice()?[PAGE_HEADER_SIZE..].fill(0);
        }

        self.is_dirty = true;
        Ok(())
    }

    /// Resizes the segment at `index`, keeping its slot index. Shrinking
    /// happens in place; growing moves the segment and its content is
    /// zeroed.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a free slot and
    /// [`FolioError::Internal`] when the page cannot fit the new length.
    pub fn update(&mut self, index: u8, length: usize) -> FolioResult<&mut [u8]> {
        let (position, old_length) = self.locate(index)?;
        let is_last_segment = position + old_length == self.next_free_position as usize;

        if length <= old_length {
            let diff = (old_length - length) as u16;
            if diff > 0 {
                if is_last_segment {
                    self.next_free_position -= diff;
                } else {
                    self.fragmented_bytes += diff;
                }
                self.used_bytes -= diff;
            }
            let data = self.buffer.as_mut_slice()?;
            write_u16(data, length_addr(index), length as u16);
            data[position + length..position + old_length].fill(0);
            self.is_dirty = true;
            return Ok(&mut data[position..position + length]);
        }

        if self.free_bytes() + old_length < length {
            return Err(FolioError::internal(format!(
                "page {} cannot grow slot {} to {} bytes",
                self.page_id, index, length
            )));
        }

        let data = self.buffer.as_mut_slice()?;
        data[position..position + old_length].fill(0);
        write_u16(data, position_addr(index), 0);
        write_u16(data, length_addr(index), 0);

        self.items_count -= 1;
        self.used_bytes -= old_length as u16;
        if is_last_segment {
            self.next_free_position = position as u16;
        } else {
            self.fragmented_bytes += old_length as u16;
        }

        let (_, position) = self.internal_insert(length, Some(index))?;
        Ok(&mut self.buffer.as_mut_slice()?[position..position + length])
    }

    /// Compacts all segments to the start of the page so every free byte is
    /// contiguous. Slot indexes do not change.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] for a shared buffer.
    pub fn defrag(&mut self) -> FolioResult<()> {
        let mut segments: Vec<(usize, u8)> = self
            .used_indexes()
            .into_iter()
            .map(|index| {
                let position = read_u16(self.buffer.as_slice(), position_addr(index)) as usize;
                (position, index)
            })
            .collect();
        segments.sort_unstable();

        let footer = self.footer_size();
        let data = self.buffer.as_mut_slice()?;
        let mut next = PAGE_HEADER_SIZE;
        for (position, index) in segments {
            let length = read_u16(data, length_addr(index)) as usize;
            if position != next {
                data.copy_within(position..position + length, next);
                write_u16(data, position_addr(index), next as u16);
            }
            next += length;
        }
        data[next..PAGE_SIZE - footer].fill(0);

        self.fragmented_bytes = 0;
        self.next_free_position = next as u16;
        self.is_dirty = true;
        Ok(())
    }

    /// First free slot index. With `n` live items at least one of the
    /// indexes `0..=n` is free.
    fn free_index(&self) -> u8 {
        let data = self.buffer.as_slice();
        (0..self.items_count)
            .find(|index| read_u16(data, position_addr(*index)) == 0)
            .unwrap_or(self.items_count)
    }

    fn update_highest_index(&mut self) {
        if self.items_count == 0 {
            self.highest_index = u8::MAX;
            return;
        }
        let data = self.buffer.as_slice();
        self.highest_index = (0..self.highest_index)
            .rev()
            .find(|index| read_u16(data, position_addr(*index)) != 0)
            .unwrap_or(u8::MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_page() -> BasePage {
        BasePage::new(PageBuffer::zeroed(), PageId::new(7), PageType::Data).unwrap()
    }

    fn insert_bytes(page: &mut BasePage, bytes: &[u8]) -> u8 {
        let (index, segment) = page.insert(bytes.len()).unwrap();
        segment.copy_from_slice(bytes);
        index
    }

    #[test]
    fn test_new_page_header_round_trip() {
        let mut page = data_page();
        page.set_prev_page_id(PageId::new(2));
        page.set_transaction_id(TxnId::new(9));
        page.set_confirmed(true);
        let buffer = page.into_buffer().unwrap();

        let page = BasePage::read(buffer).unwrap();
        assert_eq!(page.page_id(), PageId::new(7));
        assert_eq!(page.page_type(), PageType::Data);
        assert_eq!(page.prev_page_id(), PageId::new(2));
        assert_eq!(page.next_page_id(), PageId::INVALID);
        assert_eq!(page.transaction_id(), TxnId::new(9));
        assert!(page.is_confirmed());
        assert_eq!(page.page_list_slot(), NO_FREE_LIST_SLOT);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_read_as_type_mismatch() {
        let buffer = data_page().into_buffer().unwrap();
        let err = BasePage::read_as(buffer, PageType::Index).unwrap_err();
        assert!(matches!(err, FolioError::PageTypeMismatch { .. }));
    }

    #[test]
    fn test_insert_and_read_segments() {
        let mut page = data_page();
        let a = insert_bytes(&mut page, b"alpha");
        let b = insert_bytes(&mut page, b"beta");

        assert_eq!((a, b), (0, 1));
        assert_eq!(page.segment(a).unwrap(), b"alpha");
        assert_eq!(page.segment(b).unwrap(), b"beta");
        assert_eq!(page.items_count(), 2);
        assert_eq!(page.used_bytes(), 9);
        assert_eq!(page.free_bytes(), PAGE_AVAILABLE_BYTES - 9 - 2 * SLOT_SIZE);
    }

    #[test]
    fn test_delete_reuses_index() {
        let mut page = data_page();
        insert_bytes(&mut page, b"one");
        insert_bytes(&mut page, b"two");
        insert_bytes(&mut page, b"three");

        page.delete(1).unwrap();
        assert_eq!(page.fragmented_bytes(), 3);
        assert!(!page.is_used(1));

        let index = insert_bytes(&mut page, b"four");
        assert_eq!(index, 1);
        assert_eq!(page.segment(1).unwrap(), b"four");
    }

    #[test]
    fn test_delete_last_segment_rewinds() {
        let mut page = data_page();
        insert_bytes(&mut page, b"one");
        insert_bytes(&mut page, b"two");
        let before = page.next_free_position();

        page.delete(1).unwrap();
        assert_eq!(page.fragmented_bytes(), 0);
        assert_eq!(page.next_free_position(), before - 3);
        assert_eq!(page.highest_index(), 0);
    }

    #[test]
    fn test_delete_all_resets_page() {
        let mut page = data_page();
        insert_bytes(&mut page, b"one");
        insert_bytes(&mut page, b"two");
        page.delete(0).unwrap();
        page.delete(1).unwrap();

        assert_eq!(page.items_count(), 0);
        assert_eq!(page.highest_index(), u8::MAX);
        assert_eq!(page.fragmented_bytes(), 0);
        assert_eq!(page.free_bytes(), PAGE_AVAILABLE_BYTES);
    }

    #[test]
    fn test_update_shrink_and_grow() {
        let mut page = data_page();
        insert_bytes(&mut page, b"aaaa");
        insert_bytes(&mut page, b"bbbb");

        page.update(0, 2).unwrap().copy_from_slice(b"xy");
        assert_eq!(page.segment(0).unwrap(), b"xy");
        assert_eq!(page.fragmented_bytes(), 2);

        page.update(0, 6).unwrap().copy_from_slice(b"grown!");
        assert_eq!(page.segment(0).unwrap(), b"grown!");
        assert_eq!(page.segment(1).unwrap(), b"bbbb");
        assert_eq!(page.items_count(), 2);
    }

    #[test]
    fn test_defrag_on_fragmented_insert() {
        let mut page = data_page();
        let big = PAGE_AVAILABLE_BYTES / 2 - 2 * SLOT_SIZE;
        let first = page.insert(big).unwrap().0;
        page.insert(big).unwrap().1.fill(7);
        page.delete(first).unwrap();

        // The hole at the start is only reachable through defrag.
        let free = page.free_bytes();
        let (index, _) = page.insert(free - SLOT_SIZE).unwrap();
        assert_eq!(page.fragmented_bytes(), 0);
        assert!(page.segment(1).unwrap().iter().all(|b| *b == 7));
        assert_eq!(page.free_bytes(), SLOT_SIZE);
        assert_eq!(index, 0);
    }

    #[test]
    fn test_insert_with_gap_smaller_than_slot() {
        let mut page = data_page();
        let first = page.insert(4000).unwrap().0;
        page.insert(4150).unwrap().1.fill(9);
        page.delete(first).unwrap();

        // Two contiguous bytes remain at the end; the rest is fragmented.
        assert_eq!(page.free_bytes(), 4002);
        assert_eq!(page.fragmented_bytes(), 4000);

        let (index, segment) = page.insert(100).unwrap();
        segment.fill(3);
        assert_eq!(index, 0);
        assert_eq!(page.fragmented_bytes(), 0);
        assert_eq!(page.free_bytes(), 4002 - 100);
        assert!(page.segment(0).unwrap().iter().all(|b| *b == 3));
        assert!(page.segment(1).unwrap().iter().all(|b| *b == 9));
        assert_eq!(page.segment(1).unwrap().len(), 4150);
    }

    #[test]
    fn test_update_grow_with_gap_smaller_than_slot() {
        let mut page = data_page();
        let first = page.insert(4000).unwrap().0;
        let second = page.insert(4150).unwrap().0;
        page.delete(first).unwrap();

        // Growing the only segment needs the fragmented bytes back.
        page.update(second, 4200).unwrap().fill(5);
        assert_eq!(page.fragmented_bytes(), 0);
        assert_eq!(page.segment(second).unwrap().len(), 4200);
        assert!(page.segment(second).unwrap().iter().all(|b| *b == 5));
    }

    #[test]
    fn test_insert_without_room() {
        let mut page = data_page();
        let err = page.insert(PAGE_AVAILABLE_BYTES).unwrap_err();
        assert!(matches!(err, FolioError::Internal { .. }));
    }

    #[test]
    fn test_mark_as_empty() {
        let mut page = data_page();
        insert_bytes(&mut page, b"gone");
        page.set_next_page_id(PageId::new(4));
        page.mark_as_empty().unwrap();

        assert_eq!(page.page_type(), PageType::Empty);
        assert_eq!(page.items_count(), 0);
        assert_eq!(page.next_page_id(), PageId::INVALID);
        assert!(page.used_indexes().is_empty());
    }

    #[test]
    fn test_free_list_buckets() {
        assert_eq!(free_index_slot(PAGE_AVAILABLE_BYTES), 0);
        assert_eq!(free_index_slot(PAGE_AVAILABLE_BYTES * 80 / 100), 1);
        assert_eq!(free_index_slot(PAGE_AVAILABLE_BYTES * 65 / 100), 2);
        assert_eq!(free_index_slot(PAGE_AVAILABLE_BYTES * 40 / 100), 3);
        assert_eq!(free_index_slot(10), 4);

        assert_eq!(minimum_index_slot(100), Some(3));
        assert_eq!(minimum_index_slot(PAGE_AVAILABLE_BYTES), None);
    }
}
