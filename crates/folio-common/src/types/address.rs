//! Page addressing types.
//!
//! A [`PageAddress`] names a segment inside a page by (page id, slot index).
//! Skip-list links and data-block chains are stored as page addresses, so no
//! in-memory pointer ever crosses a page boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::PageId;
use crate::constants::PAGE_ADDRESS_SIZE;

/// Address of a segment: (page id, slot index).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageAddress {
    /// Page holding the segment.
    pub page_id: PageId,
    /// Slot index inside the page footer.
    pub index: u8,
}

impl PageAddress {
    /// The "no page" sentinel.
    pub const EMPTY: Self = Self {
        page_id: PageId::INVALID,
        index: 0,
    };

    /// Creates a new address.
    #[inline]
    #[must_use]
    pub const fn new(page_id: PageId, index: u8) -> Self {
        Self { page_id, index }
    }

    /// Returns true for the [`PageAddress::EMPTY`] sentinel.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.page_id.as_u32() == PageId::INVALID.as_u32() && self.index == 0
    }

    /// Reads an address from its 5-byte little-endian form.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than 5 bytes.
    #[must_use]
    pub fn read_from(buf: &[u8]) -> Self {
        let page_id = PageId::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        Self {
            page_id,
            index: buf[4],
        }
    }

    /// Writes the address in its 5-byte little-endian form.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than 5 bytes.
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4] = self.index;
    }

    /// Serialized size in bytes.
    #[inline]
    #[must_use]
    pub const fn serialized_size() -> usize {
        PAGE_ADDRESS_SIZE
    }
}

impl Default for PageAddress {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for PageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "PageAddress(EMPTY)")
        } else {
            write!(f, "PageAddress({}:{})", self.page_id, self.index)
        }
    }
}

impl fmt::Display for PageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "(empty)")
        } else {
            write!(f, "{:04}:{:03}", self.page_id, self.index)
        }
    }
}

/// Which physical file a page buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileOrigin {
    /// The base data file.
    Data,
    /// The append-only log file.
    Log,
}

impl fmt::Display for FileOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Log => write!(f, "log"),
        }
    }
}

/// A page id together with the byte position where a version of it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PagePosition {
    /// Logical page id.
    pub page_id: PageId,
    /// Byte position inside the file that holds this version.
    pub position: u64,
}

impl PagePosition {
    /// Creates a new page position.
    #[inline]
    #[must_use]
    pub const fn new(page_id: PageId, position: u64) -> Self {
        Self { page_id, position }
    }
}
