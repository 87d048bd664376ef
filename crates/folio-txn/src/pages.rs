//! Per-transaction page ledger.

use std::collections::HashMap;
use std::fmt;

use folio_common::{FolioResult, PageId, PagePosition};
use folio_storage::HeaderPage;

/// A change applied to the header page when the transaction commits, such
/// as registering or removing a collection.
pub type CommitAction = Box<dyn FnOnce(&mut HeaderPage) -> FolioResult<()> + Send>;

/// Pages touched by one transaction, shared by all of its snapshots.
pub struct TransactionPages {
    /// Pages currently held in memory across all snapshots.
    transaction_size: usize,
    /// Pages allocated by this transaction, in allocation order.
    new_pages: Vec<PageId>,
    /// Head of the chain of pages emptied by this transaction.
    first_deleted_page: PageId,
    /// Tail of that chain; linked to the header's free list on commit.
    last_deleted_page: PageId,
    deleted_pages: usize,
    /// Log position of every page this transaction already wrote.
    dirty_pages: HashMap<PageId, PagePosition>,
    commit_actions: Vec<CommitAction>,
}

impl Default for TransactionPages {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionPages {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transaction_size: 0,
            new_pages: Vec::new(),
            first_deleted_page: PageId::INVALID,
            last_deleted_page: PageId::INVALID,
            deleted_pages: 0,
            dirty_pages: HashMap::new(),
            commit_actions: Vec::new(),
        }
    }

    /// Pages currently held in memory.
    #[must_use]
    pub fn transaction_size(&self) -> usize {
        self.transaction_size
    }

    /// Counts one more page held in memory.
    pub fn increment_size(&mut self) {
        self.transaction_size += 1;
    }

    /// Resets the in-memory page count after a safepoint.
    pub fn reset_size(&mut self) {
        self.transaction_size = 0;
    }

    /// Pages allocated by this transaction.
    #[must_use]
    pub fn new_pages(&self) -> &[PageId] {
        &self.new_pages
    }

    /// Records a page allocated from the header.
    pub fn add_new_page(&mut self, page_id: PageId) {
        self.new_pages.push(page_id);
    }

    /// Number of pages emptied by this transaction.
    #[must_use]
    pub fn deleted_pages(&self) -> usize {
        self.deleted_pages
    }

    /// First page of the deleted chain.
    #[must_use]
    pub fn first_deleted_page(&self) -> PageId {
        self.first_deleted_page
    }

    /// Last page of the deleted chain.
    #[must_use]
    pub fn last_deleted_page(&self) -> PageId {
        self.last_deleted_page
    }

    /// Pushes `page_id` on the front of the deleted chain and returns the
    /// page it must link to as its next page.
    pub fn push_deleted_page(&mut self, page_id: PageId) -> PageId {
        let next = self.first_deleted_page;
        if self.deleted_pages == 0 {
            self.last_deleted_page = page_id;
        }
        self.first_deleted_page = page_id;
        self.deleted_pages += 1;
        next
    }

    /// Log position of a page this transaction already wrote.
    #[must_use]
    pub fn dirty_page(&self, page_id: PageId) -> Option<PagePosition> {
        self.dirty_pages.get(&page_id).copied()
    }

    /// Records where pages were written. A later write of the same page
    /// replaces the earlier position.
    pub fn record_dirty(&mut self, positions: &[PagePosition]) {
        for position in positions {
            self.dirty_pages.insert(position.page_id, *position);
        }
    }

    /// Latest log position of every page written so far.
    #[must_use]
    pub fn dirty_positions(&self) -> Vec<PagePosition> {
        let mut positions: Vec<PagePosition> = self.dirty_pages.values().copied().collect();
        positions.sort_by_key(|p| p.position);
        positions
    }

    /// Registers a header change to apply on commit.
    pub fn on_commit(&mut self, action: CommitAction) {
        self.commit_actions.push(action);
    }

    /// Removes and returns the registered header changes.
    pub fn take_commit_actions(&mut self) -> Vec<CommitAction> {
        std::mem::take(&mut self.commit_actions)
    }

    /// Returns true when the commit must also write the header page.
    #[must_use]
    pub fn header_changed(&self) -> bool {
        !self.new_pages.is_empty() || self.deleted_pages > 0 || !self.commit_actions.is_empty()
    }
}

impl fmt::Debug for TransactionPages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionPages")
            .field("transaction_size", &self.transaction_size)
            .field("new_pages", &self.new_pages.len())
            .field("deleted_pages", &self.deleted_pages)
            .field("dirty_pages", &self.dirty_pages.len())
            .field("commit_actions", &self.commit_actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_chain() {
        let mut pages = TransactionPages::new();
        assert!(!pages.header_changed());

        assert_eq!(pages.push_deleted_page(PageId::new(4)), PageId::INVALID);
        assert_eq!(pages.push_deleted_page(PageId::new(7)), PageId::new(4));

        assert_eq!(pages.first_deleted_page(), PageId::new(7));
        assert_eq!(pages.last_deleted_page(), PageId::new(4));
        assert_eq!(pages.deleted_pages(), 2);
        assert!(pages.header_changed());
    }

    #[test]
    fn test_dirty_positions_keep_latest() {
        let mut pages = TransactionPages::new();
        pages.record_dirty(&[
            PagePosition::new(PageId::new(1), 0),
            PagePosition::new(PageId::new(2), 8192),
        ]);
        pages.record_dirty(&[PagePosition::new(PageId::new(1), 16384)]);

        assert_eq!(pages.dirty_page(PageId::new(1)).unwrap().position, 16384);
        let positions: Vec<u64> = pages.dirty_positions().iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![8192, 16384]);
    }

    #[test]
    fn test_commit_actions() {
        let mut pages = TransactionPages::new();
        pages.on_commit(Box::new(|header| header.insert_collection("users", PageId::new(3))));
        assert!(pages.header_changed());

        let mut header = HeaderPage::new(folio_storage::PageBuffer::zeroed()).unwrap();
        for action in pages.take_commit_actions() {
            action(&mut header).unwrap();
        }
        assert_eq!(header.get_collection_page_id("USERS"), Some(PageId::new(3)));
        assert!(!pages.header_changed());
    }
}
