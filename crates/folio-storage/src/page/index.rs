//! Skip-list index node segments.
//!
//! ```text
//! 0    slot (u8)            index this node belongs to
//! 1    levels (u8)          1..=32
//! 2    data block (5)       first block of the document
//! 7    next node (5)        next index node of the same document
//! 12   levels x [prev 5][next 5]
//! ..   key
//! ```

use folio_common::{
    FolioError, FolioResult, IndexKey, PageAddress, INDEX_NODE_FIXED_SIZE, MAX_LEVEL_LENGTH,
    PAGE_ADDRESS_SIZE,
};

use super::base::BasePage;

const P_SLOT: usize = 0;
const P_LEVELS: usize = 1;
const P_DATA_BLOCK: usize = 2;
const P_NEXT_NODE: usize = P_DATA_BLOCK + PAGE_ADDRESS_SIZE;
const P_PREV_NEXT: usize = P_NEXT_NODE + PAGE_ADDRESS_SIZE;

#[inline]
const fn prev_offset(level: u8) -> usize {
    P_PREV_NEXT + level as usize * PAGE_ADDRESS_SIZE * 2
}

#[inline]
const fn next_offset(level: u8) -> usize {
    prev_offset(level) + PAGE_ADDRESS_SIZE
}

#[inline]
const fn key_offset(levels: u8) -> usize {
    P_PREV_NEXT + levels as usize * PAGE_ADDRESS_SIZE * 2
}

/// A decoded index node.
///
/// The node is a copy of its segment; the `set_*` methods update both the
/// copy and the page it lives in.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexNode {
    position: PageAddress,
    slot: u8,
    levels: u8,
    key: IndexKey,
    data_block: PageAddress,
    next_node: PageAddress,
    prev: Vec<PageAddress>,
    next: Vec<PageAddress>,
}

impl IndexNode {
    /// Segment length of a node with `levels` levels holding `key`.
    #[must_use]
    pub fn node_length(levels: u8, key: &IndexKey) -> usize {
        key_offset(levels) + key.encoded_len()
    }

    /// Writes a new node into `page` with every link empty.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidArgument`] for a level outside 1..=32,
    /// [`FolioError::IndexKeyTooLong`] for an oversized key and page errors
    /// when the segment cannot be allocated.
    pub fn insert(
        page: &mut BasePage,
        slot: u8,
        levels: u8,
        key: IndexKey,
        data_block: PageAddress,
    ) -> FolioResult<Self> {
        if levels == 0 || levels > MAX_LEVEL_LENGTH {
            return Err(FolioError::invalid_argument(format!(
                "index node level {levels} is out of range"
            )));
        }
        key.validate_length()?;

        let length = Self::node_length(levels, &key);
        let page_id = page.page_id();
        let (index, segment) = page.insert(length)?;

        segment[P_SLOT] = slot;
        segment[P_LEVELS] = levels;
        data_block.write_to(&mut segment[P_DATA_BLOCK..]);
        PageAddress::EMPTY.write_to(&mut segment[P_NEXT_NODE..]);
        for level in 0..levels {
            PageAddress::EMPTY.write_to(&mut segment[prev_offset(level)..]);
            PageAddress::EMPTY.write_to(&mut segment[next_offset(level)..]);
        }
        key.encode(&mut segment[key_offset(levels)..])?;

        Ok(Self {
            position: PageAddress::new(page_id, index),
            slot,
            levels,
            key,
            data_block,
            next_node: PageAddress::EMPTY,
            prev: vec![PageAddress::EMPTY; levels as usize],
            next: vec![PageAddress::EMPTY; levels as usize],
        })
    }

    /// Decodes the node at `index` of `page`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a free slot or malformed node.
    pub fn read(page: &BasePage, index: u8) -> FolioResult<Self> {
        let segment = page.segment(index)?;
        let malformed = || {
            FolioError::corruption(format!(
                "malformed index node at {}",
                PageAddress::new(page.page_id(), index)
            ))
        };
        if segment.len() < INDEX_NODE_FIXED_SIZE {
            return Err(malformed());
        }

        let levels = segment[P_LEVELS];
        if levels == 0 || levels > MAX_LEVEL_LENGTH || segment.len() < key_offset(levels) {
            return Err(malformed());
        }
        let (key, _) = IndexKey::decode(&segment[key_offset(levels)..])?;

        Ok(Self {
            position: PageAddress::new(page.page_id(), index),
            slot: segment[P_SLOT],
            levels,
            key,
            data_block: PageAddress::read_from(&segment[P_DATA_BLOCK..]),
            next_node: PageAddress::read_from(&segment[P_NEXT_NODE..]),
            prev: (0..levels)
                .map(|level| PageAddress::read_from(&segment[prev_offset(level)..]))
                .collect(),
            next: (0..levels)
                .map(|level| PageAddress::read_from(&segment[next_offset(level)..]))
                .collect(),
        })
    }

    /// Address of this node.
    #[inline]
    #[must_use]
    pub fn position(&self) -> PageAddress {
        self.position
    }

    /// Index slot the node belongs to.
    #[inline]
    #[must_use]
    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// Number of levels.
    #[inline]
    #[must_use]
    pub fn levels(&self) -> u8 {
        self.levels
    }

    /// The node's key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &IndexKey {
        &self.key
    }

    /// First data block of the document.
    #[inline]
    #[must_use]
    pub fn data_block(&self) -> PageAddress {
        self.data_block
    }

    /// Next index node of the same document.
    #[inline]
    #[must_use]
    pub fn next_node(&self) -> PageAddress {
        self.next_node
    }

    /// Backward link at `level`, or empty above the node's height.
    #[must_use]
    pub fn prev(&self, level: u8) -> PageAddress {
        self.prev
            .get(level as usize)
            .copied()
            .unwrap_or(PageAddress::EMPTY)
    }

    /// Forward link at `level`, or empty above the node's height.
    #[must_use]
    pub fn next(&self, level: u8) -> PageAddress {
        self.next
            .get(level as usize)
            .copied()
            .unwrap_or(PageAddress::EMPTY)
    }

    /// Link in the walking direction: forward for `forward`, else backward.
    #[must_use]
    pub fn next_prev(&self, level: u8, forward: bool) -> PageAddress {
        if forward {
            self.next(level)
        } else {
            self.prev(level)
        }
    }

    fn write_address(&self, page: &mut BasePage, offset: usize, address: PageAddress) -> FolioResult<()> {
        if page.page_id() != self.position.page_id {
            return Err(FolioError::internal(format!(
                "index node {} written through page {}",
                self.position,
                page.page_id()
            )));
        }
        let segment = page.segment_mut(self.position.index)?;
        address.write_to(&mut segment[offset..]);
        Ok(())
    }

    fn check_level(&self, level: u8) -> FolioResult<()> {
        if level >= self.levels {
            return Err(FolioError::internal(format!(
                "level {} is above index node {} of height {}",
                level, self.position, self.levels
            )));
        }
        Ok(())
    }

    /// Sets the backward link at `level`.
    ///
    /// # Errors
    ///
    /// Returns an error when `page` is not the node's page or is read-only.
    pub fn set_prev(&mut self, page: &mut BasePage, level: u8, address: PageAddress) -> FolioResult<()> {
        self.check_level(level)?;
        self.write_address(page, prev_offset(level), address)?;
        self.prev[level as usize] = address;
        Ok(())
    }

    /// Sets the forward link at `level`.
    ///
    /// # Errors
    ///
    /// Returns an error when `page` is not the node's page or is read-only.
    pub fn set_next(&mut self, page: &mut BasePage, level: u8, address: PageAddress) -> FolioResult<()> {
        self.check_level(level)?;
        self.write_address(page, next_offset(level), address)?;
        self.next[level as usize] = address;
        Ok(())
    }

    /// Sets the next node of the same document.
    ///
    /// # Errors
    ///
    /// Returns an error when `page` is not the node's page or is read-only.
    pub fn set_next_node(&mut self, page: &mut BasePage, address: PageAddress) -> FolioResult<()> {
        self.write_address(page, P_NEXT_NODE, address)?;
        self.next_node = address;
        Ok(())
    }
}
