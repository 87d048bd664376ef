//! Page types.

use std::fmt;

/// Types of pages in a Folio data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PageType {
    /// Free page, linked into the header's free-empty list.
    #[default]
    Empty = 0,
    /// The header page (always page 0).
    Header = 1,
    /// Collection page: free lists and index definitions.
    Collection = 2,
    /// Index page: skip-list nodes.
    Index = 3,
    /// Data page: document blocks.
    Data = 4,
}

impl PageType {
    /// Creates a PageType from a raw byte value.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Empty),
            1 => Some(Self::Header),
            2 => Some(Self::Collection),
            3 => Some(Self::Index),
            4 => Some(Self::Data),
            _ => None,
        }
    }

    /// Returns true for pages that hold slotted segments.
    #[inline]
    #[must_use]
    pub const fn is_slotted(self) -> bool {
        matches!(self, Self::Index | Self::Data)
    }

    /// Returns true if this is a free page.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Header => write!(f, "Header"),
            Self::Collection => write!(f, "Collection"),
            Self::Index => write!(f, "Index"),
            Self::Data => write!(f, "Data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_type_from_u8() {
        for t in [
            PageType::Empty,
            PageType::Header,
            PageType::Collection,
            PageType::Index,
            PageType::Data,
        ] {
            assert_eq!(PageType::from_u8(t as u8), Some(t));
        }
        assert_eq!(PageType::from_u8(9), None);
    }

    #[test]
    fn test_page_type_predicates() {
        assert!(PageType::Data.is_slotted());
        assert!(PageType::Index.is_slotted());
        assert!(!PageType::Header.is_slotted());
        assert!(PageType::default().is_empty());
    }
}
