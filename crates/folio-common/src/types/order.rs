//! Scan direction.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Direction of an index scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Order {
    /// Smallest key first.
    #[default]
    Ascending,
    /// Largest key first.
    Descending,
}

impl Order {
    /// The comparison result that means "the candidate is past the target"
    /// when walking in this direction.
    #[inline]
    #[must_use]
    pub const fn overshoot(self) -> Ordering {
        match self {
            Self::Ascending => Ordering::Greater,
            Self::Descending => Ordering::Less,
        }
    }

    /// The opposite direction.
    #[inline]
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overshoot() {
        assert_eq!(Order::Ascending.overshoot(), Ordering::Greater);
        assert_eq!(Order::Descending.overshoot(), Ordering::Less);
        assert_eq!(Order::Ascending.reverse(), Order::Descending);
    }
}
