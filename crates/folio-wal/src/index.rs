//! Versioned page index over the log.
//!
//! Every confirmed transaction gets a new read version. For each page id the
//! index keeps the list of `(version, log position)` pairs in confirmation
//! order, so a snapshot that captured read version `v` resolves a page to
//! the newest position whose version is `<= v`. Pages with no entry live in
//! the data file.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use folio_common::{PageId, PagePosition, TxnId};

/// Read version that sees every confirmed transaction.
pub const LATEST_VERSION: u32 = u32::MAX;

#[derive(Debug, Default)]
struct Versions {
    pages: HashMap<PageId, Vec<(u32, u64)>>,
    confirmed: HashSet<TxnId>,
    current_read_version: u32,
}

/// The WAL index.
#[derive(Debug, Default)]
pub struct WalIndex {
    versions: RwLock<Versions>,
    last_transaction_id: AtomicU32,
}

/// Counters describing the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalIndexStats {
    /// Distinct pages with log versions.
    pub pages: usize,
    /// Total page versions.
    pub versions: usize,
    /// Confirmed transactions since the last checkpoint.
    pub confirmed_transactions: usize,
    /// Current read version.
    pub read_version: u32,
}

impl WalIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read version a new snapshot should capture.
    #[must_use]
    pub fn current_read_version(&self) -> u32 {
        self.versions.read().current_read_version
    }

    /// Issues the next transaction id. Ids are never reused.
    #[must_use]
    pub fn next_transaction_id(&self) -> TxnId {
        TxnId::new(self.last_transaction_id.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
    }

    /// Highest transaction id issued or restored.
    #[must_use]
    pub fn last_transaction_id(&self) -> TxnId {
        TxnId::new(self.last_transaction_id.load(Ordering::Acquire))
    }

    /// Raises the last transaction id to at least `txn_id`.
    pub fn observe_transaction_id(&self, txn_id: TxnId) {
        self.last_transaction_id
            .fetch_max(txn_id.as_u32(), Ordering::AcqRel);
    }

    /// Log position of `page_id` as seen at `version`, or `None` when the
    /// data file copy is current for that version.
    #[must_use]
    pub fn get_page_index(&self, page_id: PageId, version: u32) -> Option<u64> {
        if version == 0 {
            return None;
        }
        let versions = self.versions.read();
        versions.pages.get(&page_id).and_then(|list| {
            list.iter()
                .rev()
                .find(|(v, _)| *v <= version)
                .map(|(_, position)| *position)
        })
    }

    /// Publishes the pages of `txn_id` atomically under a new read version.
    pub fn confirm_transaction(&self, txn_id: TxnId, positions: &[PagePosition]) {
        let mut versions = self.versions.write();
        versions.current_read_version += 1;
        let version = versions.current_read_version;

        for position in positions {
            versions
                .pages
                .entry(position.page_id)
                .or_default()
                .push((version, position.position));
        }
        versions.confirmed.insert(txn_id);
        drop(versions);

        self.observe_transaction_id(txn_id);
        trace!(txn_id = txn_id.as_u32(), pages = positions.len(), version, "transaction confirmed");
    }

    /// Returns true if `txn_id` was confirmed since the last checkpoint.
    #[must_use]
    pub fn is_confirmed(&self, txn_id: TxnId) -> bool {
        self.versions.read().confirmed.contains(&txn_id)
    }

    /// Forgets every version. Transaction ids keep increasing.
    pub fn clear(&self) {
        let mut versions = self.versions.write();
        versions.pages.clear();
        versions.confirmed.clear();
        versions.current_read_version = 0;
    }

    /// Returns index counters.
    #[must_use]
    pub fn stats(&self) -> WalIndexStats {
        let versions = self.versions.read();
        WalIndexStats {
            pages: versions.pages.len(),
            versions: versions.pages.values().map(Vec::len).sum(),
            confirmed_transactions: versions.confirmed.len(),
            read_version: versions.current_read_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(page: u32, position: u64) -> PagePosition {
        PagePosition::new(PageId::new(page), position)
    }

    #[test]
    fn test_unconfirmed_pages_resolve_to_data_file() {
        let index = WalIndex::new();
        assert_eq!(index.current_read_version(), 0);
        assert_eq!(index.get_page_index(PageId::new(1), 0), None);
        assert_eq!(index.get_page_index(PageId::new(1), LATEST_VERSION), None);
    }

    #[test]
    fn test_versions_are_isolated() {
        let index = WalIndex::new();
        let t1 = index.next_transaction_id();
        index.confirm_transaction(t1, &[pos(1, 0), pos(2, 8192)]);
        let v1 = index.current_read_version();

        let t2 = index.next_transaction_id();
        index.confirm_transaction(t2, &[pos(1, 16384)]);
        let v2 = index.current_read_version();

        assert_eq!(index.get_page_index(PageId::new(1), 0), None);
        assert_eq!(index.get_page_index(PageId::new(1), v1), Some(0));
        assert_eq!(index.get_page_index(PageId::new(1), v2), Some(16384));
        assert_eq!(index.get_page_index(PageId::new(2), v2), Some(8192));
        assert_eq!(index.get_page_index(PageId::new(1), LATEST_VERSION), Some(16384));
        assert!(index.is_confirmed(t1) && index.is_confirmed(t2));
    }

    #[test]
    fn test_transaction_ids_survive_clear() {
        let index = WalIndex::new();
        let t1 = index.next_transaction_id();
        index.confirm_transaction(t1, &[pos(3, 0)]);
        index.clear();

        assert_eq!(index.stats(), WalIndexStats::default());
        assert!(!index.is_confirmed(t1));
        assert!(index.next_transaction_id() > t1);
    }

    #[test]
    fn test_observe_transaction_id() {
        let index = WalIndex::new();
        index.observe_transaction_id(TxnId::new(40));
        index.observe_transaction_id(TxnId::new(7));
        assert_eq!(index.last_transaction_id(), TxnId::new(40));
        assert_eq!(index.next_transaction_id(), TxnId::new(41));
    }
}
