//! Document data blocks.
//!
//! ```text
//! 0    extend (u8)          1 when this block continues a document
//! 1    next block (5)       next block of the chain, or empty
//! 6    payload
//! ```

use bytes::Bytes;

use folio_common::{FolioError, FolioResult, PageAddress, DATA_BLOCK_FIXED_SIZE, MAX_DATA_BYTES_PER_PAGE};

use super::base::BasePage;

const P_EXTEND: usize = 0;
const P_NEXT_BLOCK: usize = 1;
const P_BUFFER: usize = DATA_BLOCK_FIXED_SIZE;

/// A decoded data block. The payload is copied out of the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    position: PageAddress,
    extend: bool,
    next_block: PageAddress,
    payload: Bytes,
}

impl DataBlock {
    /// Writes a new block holding `payload` into `page`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidArgument`] when the payload is empty or
    /// larger than one page can hold.
    pub fn insert(page: &mut BasePage, extend: bool, payload: &[u8]) -> FolioResult<Self> {
        check_payload(payload)?;
        let page_id = page.page_id();
        let (index, segment) = page.insert(DATA_BLOCK_FIXED_SIZE + payload.len())?;
        write_block(segment, extend, PageAddress::EMPTY, payload);

        Ok(Self {
            position: PageAddress::new(page_id, index),
            extend,
            next_block: PageAddress::EMPTY,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Decodes the block at `index` of `page`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a free slot or a segment too
    /// short to be a block.
    pub fn read(page: &BasePage, index: u8) -> FolioResult<Self> {
        let segment = page.segment(index)?;
        let position = PageAddress::new(page.page_id(), index);
        if segment.len() <= DATA_BLOCK_FIXED_SIZE {
            return Err(FolioError::corruption(format!("malformed data block at {position}")));
        }
        Ok(Self {
            position,
            extend: segment[P_EXTEND] != 0,
            next_block: PageAddress::read_from(&segment[P_NEXT_BLOCK..]),
            payload: Bytes::copy_from_slice(&segment[P_BUFFER..]),
        })
    }

    /// Rewrites the block at `index` with a new payload, keeping its extend
    /// flag and next link.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidArgument`] for an empty or oversized
    /// payload and page errors when the page cannot fit it.
    pub fn update(page: &mut BasePage, index: u8, payload: &[u8]) -> FolioResult<Self> {
        check_payload(payload)?;
        let current = Self::read(page, index)?;
        let segment = page.update(index, DATA_BLOCK_FIXED_SIZE + payload.len())?;
        write_block(segment, current.extend, current.next_block, payload);

        Ok(Self {
            payload: Bytes::copy_from_slice(payload),
            ..current
        })
    }

    /// Every block stored in `page`, in slot order.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for malformed segments.
    pub fn all_blocks(page: &BasePage) -> FolioResult<Vec<Self>> {
        page.used_indexes()
            .into_iter()
            .map(|index| Self::read(page, index))
            .collect()
    }

    /// Address of this block.
    #[inline]
    #[must_use]
    pub fn position(&self) -> PageAddress {
        self.position
    }

    /// Returns true when the block continues a document started elsewhere.
    #[inline]
    #[must_use]
    pub fn extend(&self) -> bool {
        self.extend
    }

    /// Next block of the chain.
    #[inline]
    #[must_use]
    pub fn next_block(&self) -> PageAddress {
        self.next_block
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Takes the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Links this block to `address`.
    ///
    /// # Errors
    ///
    /// Returns an error when `page` is not the block's page or is read-only.
    pub fn set_next_block(&mut self, page: &mut BasePage, address: PageAddress) -> FolioResult<()> {
        if page.page_id() != self.position.page_id {
            return Err(FolioError::internal(format!(
                "data block {} written through page {}",
                self.position,
                page.page_id()
            )));
        }
        let segment = page.segment_mut(self.position.index)?;
        address.write_to(&mut segment[P_NEXT_BLOCK..]);
        self.next_block = address;
        Ok(())
    }
}

fn write_block(segment: &mut [u8], extend: bool, next_block: PageAddress, payload: &[u8]) {
    segment[P_EXTEND] = u8::from(extend);
    next_block.write_to(&mut segment[P_NEXT_BLOCK..]);
    segment[P_BUFFER..].copy_from_slice(payload);
}

fn check_payload(payload: &[u8]) -> FolioResult<()> {
    if payload.is_empty() || payload.len() > MAX_DATA_BYTES_PER_PAGE {
        return Err(FolioError::invalid_argument(format!(
            "data block payload of {} bytes is out of range",
            payload.len()
        )));
    }
    Ok(())
}
