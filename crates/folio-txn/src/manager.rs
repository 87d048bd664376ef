//! Transaction lifecycle.
//!
//! # State machine
//!
//! ```text
//!   Active(Read) ──first write snapshot──▶ Active(Write)
//!        │                                     │
//!        ├──────────── commit ─────────────────┼──▶ Committed
//!        ├──────────── rollback ───────────────┼──▶ RolledBack
//!        └──────────── abort ──────────────────┴──▶ Aborted
//! ```
//!
//! Terminal states are final. `commit` and `rollback` on a terminal
//! transaction return `Ok(false)`; every other operation fails with
//! [`FolioError::TransactionClosed`].
//!
//! # Commit layout in the log
//!
//! ```text
//!   [dirty pages...][last deleted page relinked][header clone*]
//!   [dirty pages...*]                        (no header change)
//! ```
//!
//! `*` is the confirmed page. Pages flushed earlier by safepoints precede
//! them, unconfirmed, and become visible together with the rest.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use folio_common::{CancellationToken, FolioError, FolioResult, PageId, PagePosition, TxnId};
use folio_storage::{BasePage, FreeListKind, HeaderPage, PageBuffer, PageType};

use crate::context::StorageContext;
use crate::lock::LockMode;
use crate::monitor::TransactionOutcome;
use crate::pages::TransactionPages;
use crate::snapshot::Snapshot;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Running.
    Active,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
    /// Torn down by engine shutdown.
    Aborted,
}

impl TransactionState {
    /// Returns true for the final states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Active
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled back"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// A transaction.
///
/// Owned by one session at a time. Holds the shared transaction gate from
/// [`Transaction::begin`] until it ends and one snapshot per collection it
/// touched. Dropping an active transaction rolls it back.
pub struct Transaction {
    id: TxnId,
    ctx: Arc<StorageContext>,
    pages: Arc<Mutex<TransactionPages>>,
    /// Snapshots by lowercase collection name.
    snapshots: HashMap<String, Snapshot>,
    mode: LockMode,
    state: TransactionState,
    start_time: Instant,
    cancel: CancellationToken,
    aborted: Arc<AtomicBool>,
}

impl Transaction {
    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::EngineUnusable`] or [`FolioError::EngineClosed`]
    /// when the engine cannot accept work, and [`FolioError::LockTimeout`]
    /// when a checkpoint holds the gate too long.
    pub fn begin(ctx: Arc<StorageContext>, cancel: CancellationToken) -> FolioResult<Self> {
        ctx.ensure_usable()?;
        ctx.locks().enter_transaction()?;

        let id = ctx.wal().next_transaction_id();
        let aborted = ctx.monitor().register(id);
        debug!(txn_id = id.as_u32(), "transaction started");

        Ok(Self {
            id,
            ctx,
            pages: Arc::new(Mutex::new(TransactionPages::new())),
            snapshots: HashMap::new(),
            mode: LockMode::Read,
            state: TransactionState::Active,
            start_time: Instant::now(),
            cancel,
            aborted,
        })
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Read until the first write snapshot, write afterwards.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// When the transaction began.
    #[must_use]
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Cancellation token checked at safepoints.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Pages currently held in memory by all snapshots.
    #[must_use]
    pub fn transaction_size(&self) -> usize {
        self.pages.lock().transaction_size()
    }

    /// Pages allocated so far.
    #[must_use]
    pub fn new_page_count(&self) -> usize {
        self.pages.lock().new_pages().len()
    }

    /// Returns true once shutdown flagged this transaction.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> FolioResult<()> {
        if self.state.is_terminal() {
            return Err(FolioError::TransactionClosed {
                txn_id: self.id,
                state: self.state.to_string(),
            });
        }
        if self.is_aborted() {
            return Err(FolioError::TransactionAborted { txn_id: self.id });
        }
        self.ctx.ensure_usable()
    }

    /// Returns the snapshot of `collection`, creating it if needed. A read
    /// snapshot is replaced by a write snapshot when `mode` is
    /// [`LockMode::Write`]; the first write snapshot turns the transaction
    /// into a write transaction.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::TransactionClosed`] on a finished transaction
    /// and [`FolioError::LockTimeout`] when another transaction keeps the
    /// collection reserved.
    pub fn create_snapshot(
        &mut self,
        mode: LockMode,
        collection: &str,
        add_if_missing: bool,
    ) -> FolioResult<&mut Snapshot> {
        self.ensure_active()?;
        let key = collection.to_lowercase();

        let escalate = self
            .snapshots
            .get(&key)
            .is_some_and(|snapshot| mode == LockMode::Write && snapshot.mode() == LockMode::Read);
        if escalate {
            if let Some(mut read) = self.snapshots.remove(&key) {
                read.dispose();
            }
        }

        if !self.snapshots.contains_key(&key) {
            let snapshot = Snapshot::new(
                mode,
                collection,
                self.id,
                Arc::clone(&self.ctx),
                Arc::clone(&self.pages),
                add_if_missing,
            )?;
            self.snapshots.insert(key.clone(), snapshot);
        }

        if mode == LockMode::Write {
            self.mode = LockMode::Write;
        }

        self.snapshots
            .get_mut(&key)
            .ok_or_else(|| FolioError::internal("snapshot missing after creation"))
    }

    /// The snapshot of `collection` opened earlier by this transaction.
    #[must_use]
    pub fn snapshot(&mut self, collection: &str) -> Option<&mut Snapshot> {
        self.snapshots.get_mut(&collection.to_lowercase())
    }

    /// Drops a collection: its collection page and every page in its free
    /// lists join the deleted chain, and the header forgets the name on
    /// commit. Returns false when the collection does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::LockTimeout`] when another transaction writes
    /// the collection and any error from the safepoints in between.
    pub fn drop_collection(&mut self, collection: &str) -> FolioResult<bool> {
        let snapshot = self.create_snapshot(LockMode::Write, collection, false)?;
        if snapshot.collection_page().is_none() {
            return Ok(false);
        }

        let mut pages = snapshot.free_list_pages(FreeListKind::Index)?;
        pages.extend(snapshot.free_list_pages(FreeListKind::Data)?);
        snapshot.release_collection_page()?;

        for page_id in &pages {
            self.snapshot(collection)
                .ok_or_else(|| FolioError::internal("snapshot lost while dropping collection"))?
                .release_page(*page_id)?;
            self.safepoint()?;
        }

        let name = collection.to_string();
        self.on_commit(move |header| {
            header.delete_collection(&name);
            Ok(())
        })?;
        info!(collection, pages = pages.len() + 1, "collection dropped");
        Ok(true)
    }

    /// Registers a header change applied when this transaction commits.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::TransactionClosed`] on a finished transaction.
    pub fn on_commit<F>(&mut self, action: F) -> FolioResult<()>
    where
        F: FnOnce(&mut HeaderPage) -> FolioResult<()> + Send + 'static,
    {
        self.ensure_active()?;
        self.pages.lock().on_commit(Box::new(action));
        Ok(())
    }

    /// Checks cancellation and, once the transaction holds
    /// `max_transaction_size` pages, flushes dirty pages to the log
    /// unconfirmed and empties every snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Cancelled`] after cancellation,
    /// [`FolioError::TransactionAborted`] after shutdown and any write
    /// error.
    pub fn safepoint(&mut self) -> FolioResult<()> {
        self.ensure_active()?;
        self.cancel.check()?;

        let size = self.transaction_size();
        if size < self.ctx.config().max_transaction_size {
            return Ok(());
        }

        debug!(txn_id = self.id.as_u32(), pages = size, "safepoint flushing transaction pages");
        if self.mode == LockMode::Write {
            self.persist_dirty_pages(false)?;
        }
        for snapshot in self.snapshots.values_mut() {
            snapshot.clear();
        }
        self.pages.lock().reset_size();
        Ok(())
    }

    /// Writes every dirty page to the log. On commit the transaction is
    /// confirmed in the WAL index. Returns the number of pages written.
    fn persist_dirty_pages(&mut self, commit: bool) -> FolioResult<usize> {
        let mut dirty: Vec<BasePage> = Vec::new();
        let mut names: Vec<String> = self.snapshots.keys().cloned().collect();
        names.sort();
        for name in names {
            if let Some(snapshot) = self.snapshots.get_mut(&name) {
                dirty.extend(snapshot.take_dirty_pages(self.id)?);
            }
        }

        let (header_changed, flushed_before) = {
            let pages = self.pages.lock();
            (pages.header_changed(), !pages.dirty_positions().is_empty())
        };

        if !commit {
            let count = dirty.len();
            self.write_pages(to_buffers(dirty)?)?;
            return Ok(count);
        }

        // Earlier safepoint flushes still need a confirmed page.
        if !header_changed && !dirty.is_empty() {
            let count = dirty.len();
            if let Some(last) = dirty.last_mut() {
                last.set_confirmed(true);
            }
            self.write_pages(to_buffers(dirty)?)?;
            self.confirm();
            return Ok(count);
        }
        if !header_changed && !flushed_before {
            return Ok(0);
        }

        let ctx = Arc::clone(&self.ctx);
        let mut header = ctx.header().lock();
        let savepoint = header.savepoint();
        match self.commit_with_header(&mut header, dirty) {
            Ok(count) => Ok(count),
            Err(e) => {
                header.restore(savepoint);
                Err(e)
            }
        }
    }

    /// Writes the pages followed by the relinked deleted chain and a header
    /// clone as confirmed page. Runs under the header lock so header
    /// changes and the WAL confirmation are seen together.
    fn commit_with_header(&mut self, header: &mut HeaderPage, dirty: Vec<BasePage>) -> FolioResult<usize> {
        let disk = Arc::clone(self.ctx.disk());
        let mut buffers = to_buffers(dirty)?;

        let (first_deleted, last_deleted, deleted, actions) = {
            let mut pages = self.pages.lock();
            (
                pages.first_deleted_page(),
                pages.last_deleted_page(),
                pages.deleted_pages(),
                pages.take_commit_actions(),
            )
        };

        if deleted > 0 {
            let free_head = header.free_empty_page_list();
            if free_head.is_valid() {
                // Written again so the tail of this transaction's chain
                // links to the existing free list.
                let mut tail = BasePage::new(disk.new_page(), last_deleted, PageType::Empty)?;
                tail.set_next_page_id(free_head);
                tail.set_transaction_id(self.id);
                buffers.push(tail.into_buffer()?);
            }
            header.set_free_empty_page_list(first_deleted);
        }

        for action in actions {
            action(header)?;
        }

        buffers.push(header.write_clone(disk.new_page(), self.id)?);
        let count = buffers.len();
        self.write_pages(buffers)?;
        self.confirm();
        Ok(count)
    }

    fn write_pages(&self, buffers: Vec<PageBuffer>) -> FolioResult<Vec<PagePosition>> {
        if buffers.is_empty() {
            return Ok(Vec::new());
        }
        let positions = self.ctx.disk().write_log_pages(buffers)?;
        self.pages.lock().record_dirty(&positions);
        Ok(positions)
    }

    fn confirm(&self) {
        let positions = self.pages.lock().dirty_positions();
        self.ctx.wal().confirm_transaction(self.id, &positions);
    }

    /// Commits. Returns false when the transaction had already ended.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::TransactionAborted`] after shutdown and any
    /// write error; the caller must then roll back.
    pub fn commit(&mut self) -> FolioResult<bool> {
        if self.state.is_terminal() {
            return Ok(false);
        }
        if self.is_aborted() {
            return Err(FolioError::TransactionAborted { txn_id: self.id });
        }
        self.ctx.ensure_usable()?;

        let written = if self.mode == LockMode::Write || self.pages.lock().header_changed() {
            self.persist_dirty_pages(true)?
        } else {
            0
        };
        if written > 0 && self.ctx.config().sync_on_commit {
            self.ctx.disk().queue().wait()?;
        }

        info!(
            txn_id = self.id.as_u32(),
            pages = written,
            elapsed_us = self.start_time.elapsed().as_micros() as u64,
            "transaction committed"
        );
        self.finish(TransactionState::Committed, TransactionOutcome::Committed);
        Ok(true)
    }

    /// Rolls back. Pages allocated by this transaction go back to the
    /// free-empty list under a new transaction id; every other change is
    /// discarded. Returns false when the transaction had already ended.
    ///
    /// # Errors
    ///
    /// Returns any error writing the returned pages. The transaction ends
    /// in every case.
    pub fn rollback(&mut self) -> FolioResult<bool> {
        if self.state.is_terminal() {
            return Ok(false);
        }

        let new_pages = self.pages.lock().new_pages().to_vec();
        let returned = if new_pages.is_empty() || self.ctx.state().is_failed() {
            Ok(())
        } else {
            self.return_new_pages(&new_pages)
        };

        for snapshot in self.snapshots.values_mut() {
            if snapshot.mode() == LockMode::Write {
                snapshot.discard_changes();
            }
        }

        debug!(
            txn_id = self.id.as_u32(),
            returned = new_pages.len(),
            "transaction rolled back"
        );
        self.finish(TransactionState::RolledBack, TransactionOutcome::RolledBack);
        returned.map(|()| true)
    }

    fn return_new_pages(&self, new_pages: &[PageId]) -> FolioResult<()> {
        let disk = self.ctx.disk();
        let wal = self.ctx.wal();
        let txn_id = wal.next_transaction_id();

        let mut header = self.ctx.header().lock();
        let savepoint = header.savepoint();

        let result = (|| -> FolioResult<()> {
            let mut buffers = Vec::with_capacity(new_pages.len() + 1);
            for (i, page_id) in new_pages.iter().enumerate() {
                let next = new_pages
                    .get(i + 1)
                    .copied()
                    .unwrap_or_else(|| header.free_empty_page_list());
                let mut page = BasePage::new(disk.new_page(), *page_id, PageType::Empty)?;
                page.set_next_page_id(next);
                page.set_transaction_id(txn_id);
                buffers.push(page.into_buffer()?);
            }

            header.set_free_empty_page_list(new_pages[0]);
            buffers.push(header.write_clone(disk.new_page(), txn_id)?);

            let positions = disk.write_log_pages(buffers)?;
            wal.confirm_transaction(txn_id, &positions);
            Ok(())
        })();

        if let Err(e) = result {
            header.restore(savepoint);
            return Err(e);
        }
        debug!(
            txn_id = txn_id.as_u32(),
            pages = new_pages.len(),
            "returned new pages to the free list"
        );
        Ok(())
    }

    /// Forced teardown during shutdown. Releases everything, writes
    /// nothing.
    pub fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        for snapshot in self.snapshots.values_mut() {
            snapshot.discard_changes();
        }
        warn!(txn_id = self.id.as_u32(), "transaction aborted");
        self.finish(TransactionState::Aborted, TransactionOutcome::Aborted);
    }

    fn finish(&mut self, state: TransactionState, outcome: TransactionOutcome) {
        for (_, mut snapshot) in self.snapshots.drain() {
            snapshot.dispose();
        }
        self.state = state;
        self.ctx.locks().exit_transaction();
        self.ctx.monitor().unregister(self.id, outcome);
    }
}

fn to_buffers(pages: Vec<BasePage>) -> FolioResult<Vec<PageBuffer>> {
    pages.into_iter().map(BasePage::into_buffer).collect()
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            if let Err(e) = self.rollback() {
                warn!(txn_id = self.id.as_u32(), error = %e, "rollback on drop failed");
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("snapshots", &self.snapshots.len())
            .field("pages", &*self.pages.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;
    use folio_common::FileOrigin;
    use folio_storage::FreeListKind;

    fn begin(ctx: &Arc<StorageContext>) -> Transaction {
        Transaction::begin(Arc::clone(ctx), CancellationToken::new()).unwrap()
    }

    /// Writes `marker` into a fresh data page of `users`.
    fn write_marker(txn: &mut Transaction, marker: u8) -> PageId {
        let snapshot = txn.create_snapshot(LockMode::Write, "users", true).unwrap();
        let page_id = snapshot.get_free_page(FreeListKind::Data, 1).unwrap();
        let page = snapshot.get_page(page_id).unwrap();
        let (_, segment) = page.insert(1).unwrap();
        segment[0] = marker;
        snapshot
            .add_or_remove_free_list(FreeListKind::Data, page_id)
            .unwrap();
        page_id
    }

    fn read_marker(ctx: &Arc<StorageContext>, page_id: PageId) -> Option<u8> {
        let mut txn = begin(ctx);
        let snapshot = txn.create_snapshot(LockMode::Read, "users", false).unwrap();
        snapshot.collection_page()?;
        let page = snapshot.get_page(page_id).unwrap();
        if page.page_type() != PageType::Data || page.items_count() == 0 {
            return None;
        }
        Some(page.segment(0).unwrap()[0])
    }

    #[test]
    fn test_commit_makes_pages_visible() {
        let ctx = context();
        let mut writer = begin(&ctx);
        let page_id = write_marker(&mut writer, 42);

        // Not visible before commit.
        assert_eq!(read_marker(&ctx, page_id), None);

        assert!(writer.commit().unwrap());
        assert_eq!(writer.state(), TransactionState::Committed);
        assert_eq!(read_marker(&ctx, page_id), Some(42));
        assert_eq!(
            ctx.header().lock().get_collection_page_id("users"),
            Some(PageId::new(1))
        );
        assert_eq!(ctx.locks().active_transactions(), 0);
    }

    #[test]
    fn test_rollback_returns_new_pages() {
        let ctx = context();
        let mut txn = begin(&ctx);
        write_marker(&mut txn, 1);
        assert_eq!(txn.new_page_count(), 2);

        assert!(txn.rollback().unwrap());
        assert!(!txn.rollback().unwrap());

        let header = ctx.header().lock();
        assert_eq!(header.get_collection_page_id("users"), None);
        let mut next = header.free_empty_page_list();
        let mut free = Vec::new();
        let disk = ctx.disk();
        while next.is_valid() {
            free.push(next);
            let version = ctx.wal().current_read_version();
            let position = ctx.wal().get_page_index(next, version).unwrap();
            let page = BasePage::read(disk.read_uncached(FileOrigin::Log, position).unwrap()).unwrap();
            assert_eq!(page.page_type(), PageType::Empty);
            next = page.next_page_id();
        }
        assert_eq!(free, vec![PageId::new(1), PageId::new(2)]);
    }

    #[test]
    fn test_free_pages_are_reused() {
        let ctx = context();
        let mut txn = begin(&ctx);
        write_marker(&mut txn, 1);
        txn.rollback().unwrap();

        let mut txn = begin(&ctx);
        let page_id = write_marker(&mut txn, 9);
        txn.commit().unwrap();

        assert_eq!(page_id, PageId::new(2));
        assert_eq!(ctx.header().lock().last_page_id(), PageId::new(2));
        assert_eq!(ctx.header().lock().free_empty_page_list(), PageId::INVALID);
        assert_eq!(read_marker(&ctx, page_id), Some(9));
    }

    #[test]
    fn test_terminal_transaction_is_closed() {
        let ctx = context();
        let mut txn = begin(&ctx);
        txn.commit().unwrap();

        assert!(!txn.commit().unwrap());
        assert!(matches!(
            txn.create_snapshot(LockMode::Read, "users", false),
            Err(FolioError::TransactionClosed { .. })
        ));
        assert!(matches!(txn.safepoint(), Err(FolioError::TransactionClosed { .. })));
    }

    #[test]
    fn test_escalates_read_snapshot() {
        let ctx = context();
        let mut txn = begin(&ctx);
        txn.create_snapshot(LockMode::Read, "Users", false).unwrap();
        assert_eq!(txn.mode(), LockMode::Read);

        let snapshot = txn.create_snapshot(LockMode::Write, "users", true).unwrap();
        assert_eq!(snapshot.mode(), LockMode::Write);
        assert_eq!(txn.mode(), LockMode::Write);
        assert_eq!(ctx.locks().collection_owner("users"), Some(txn.id()));
    }

    #[test]
    fn test_safepoint_flushes_and_commit_confirms() {
        let ctx = context();
        let mut txn = begin(&ctx);
        let mut ids = Vec::new();
        for marker in 0..5 {
            let snapshot = txn.create_snapshot(LockMode::Write, "users", true).unwrap();
            let page_id = snapshot.new_page(PageType::Data).unwrap();
            snapshot.get_page(page_id).unwrap().insert(1).unwrap().1[0] = marker;
            ids.push(page_id);
        }

        // Force a flush regardless of the configured ceiling.
        txn.persist_dirty_pages(false).unwrap();
        for snapshot in txn.snapshots.values_mut() {
            snapshot.clear();
        }
        assert!(ctx.disk().log_pages() > 0);
        assert_eq!(read_marker(&ctx, ids[0]), None);

        // Flushed pages are read back from the log by the writer.
        let snapshot = txn.create_snapshot(LockMode::Write, "users", true).unwrap();
        assert_eq!(snapshot.get_page(ids[3]).unwrap().segment(0).unwrap()[0], 3);

        txn.commit().unwrap();
        assert_eq!(read_marker(&ctx, ids[4]), Some(4));
    }

    #[test]
    fn test_drop_collection_frees_pages() {
        let ctx = context();
        let mut txn = begin(&ctx);
        let page_id = write_marker(&mut txn, 3);
        txn.commit().unwrap();

        let mut txn = begin(&ctx);
        assert!(!txn.drop_collection("orders").unwrap());
        assert!(txn.drop_collection("USERS").unwrap());
        txn.commit().unwrap();

        let header = ctx.header().lock();
        assert_eq!(header.get_collection_page_id("users"), None);
        assert_eq!(header.free_empty_page_list(), page_id);
        drop(header);
        assert_eq!(read_marker(&ctx, page_id), None);
    }

    #[test]
    fn test_cancelled_safepoint() {
        let ctx = context();
        let cancel = CancellationToken::new();
        let mut txn = Transaction::begin(Arc::clone(&ctx), cancel.clone()).unwrap();
        cancel.cancel();
        assert!(matches!(txn.safepoint(), Err(FolioError::Cancelled)));
    }

    #[test]
    fn test_aborted_by_monitor() {
        let ctx = context();
        let mut txn = begin(&ctx);
        ctx.monitor().abort_all();
        assert!(matches!(
            txn.commit(),
            Err(FolioError::TransactionAborted { .. })
        ));
        txn.abort();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(ctx.monitor().stats().aborted, 1);
    }

    #[test]
    fn test_drop_rolls_back() {
        let ctx = context();
        {
            let mut txn = begin(&ctx);
            write_marker(&mut txn, 5);
        }
        assert_eq!(ctx.locks().active_transactions(), 0);
        assert_eq!(ctx.locks().collection_owner("users"), None);
        assert_eq!(ctx.monitor().stats().rolled_back, 1);
        assert!(ctx.header().lock().free_empty_page_list().is_valid());
    }
}
