//! Core identifier types for Folio.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of page and transaction numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::PAGE_SIZE;

/// Page identifier - uniquely identifies a page in the data file.
///
/// A page's position in the data file is always `page_id × PAGE_SIZE`.
///
/// # Example
///
/// ```rust
/// use folio_common::types::PageId;
///
/// let page = PageId::new(2);
/// assert_eq!(page.as_u32(), 2);
/// assert_eq!(page.file_position(), 16384);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PageId(u32);

impl PageId {
    /// Invalid page ID, the "no page" sentinel used by every link.
    pub const INVALID: Self = Self(u32::MAX);

    /// The header page.
    pub const HEADER: Self = Self(0);

    /// Creates a new `PageId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next page ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid page ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Position of this page in the data file.
    #[inline]
    #[must_use]
    pub const fn file_position(self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }

    /// Reads a page ID stored little-endian.
    #[inline]
    #[must_use]
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    /// Converts to little-endian bytes.
    #[inline]
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PageId(INVALID)")
        } else {
            write!(f, "PageId({})", self.0)
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<PageId> for u32 {
    #[inline]
    fn from(id: PageId) -> Self {
        id.0
    }
}

/// Transaction identifier - uniquely identifies a transaction.
///
/// Transaction IDs are issued by the WAL index, strictly increase, and are
/// stamped on every page a transaction writes to the log.
///
/// # Example
///
/// ```rust
/// use folio_common::types::TxnId;
///
/// let txn = TxnId::new(1);
/// assert!(txn.is_valid());
/// assert!(!TxnId::INVALID.is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(u32);

impl TxnId {
    /// Invalid transaction ID, used by pages that were never written by a
    /// transaction (fresh pages and pages copied into the data file).
    pub const INVALID: Self = Self(0);

    /// Creates a new `TxnId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next transaction ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Checks if this is a valid transaction ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", self.0)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TxnId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<TxnId> for u32 {
    #[inline]
    fn from(id: TxnId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id() {
        let page = PageId::new(42);
        assert_eq!(page.as_u32(), 42);
        assert!(page.is_valid());
        assert!(!PageId::INVALID.is_valid());
        assert_eq!(page.next(), PageId::new(43));
        assert_eq!(PageId::INVALID.next(), PageId::INVALID);
    }

    #[test]
    fn test_page_id_position() {
        assert_eq!(PageId::HEADER.file_position(), 0);
        assert_eq!(PageId::new(3).file_position(), 3 * 8192);
    }

    #[test]
    fn test_page_id_bytes() {
        let page = PageId::new(0x0102_0304);
        assert_eq!(PageId::from_le_bytes(page.to_le_bytes()), page);
    }

    #[test]
    fn test_txn_id() {
        let txn = TxnId::new(7);
        assert_eq!(txn.next().as_u32(), 8);
        assert_eq!(format!("{txn:?}"), "TxnId(7)");
    }
}
