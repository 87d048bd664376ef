//! Snapshots.
//!
//! A snapshot is one transaction's view of one collection. It caches every
//! page it touched, resolving each page in this order:
//!
//! 1. pages already held by the snapshot,
//! 2. pages this transaction flushed to the log at a safepoint,
//! 3. the newest log version confirmed at the snapshot's read version,
//! 4. the page's home position in the data file.
//!
//! Write snapshots reserve the collection, get private copies of every page
//! and own the collection page with its free lists. Read snapshots share
//! cached buffers and never block.
//!
//! # Free lists
//!
//! Data and index pages of a collection sit in one of five buckets by free
//! space, bucket 0 holding the emptiest pages:
//!
//! ```text
//!   bucket:     0        1        2        3        4
//!   free:    >= 90%   >= 75%   >= 60%   >= 30%    < 30%
//! ```
//!
//! A page needing `n` bytes is taken from the fullest bucket whose every
//! page is guaranteed to fit `n`; bucket 4 is never searched. A page left
//! with no items is emptied and pushed on the transaction's deleted chain,
//! which joins the header's free-empty list on commit.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use folio_common::{
    FileOrigin, FolioError, FolioResult, PageId, TxnId, NO_FREE_LIST_SLOT, PAGE_FREE_LIST_SLOTS,
    SLOT_SIZE,
};
use folio_storage::page::{free_index_slot, minimum_index_slot, validate_name};
use folio_storage::{BasePage, CollectionPage, DiskReader, FreeListKind, PageBuffer, PageType};
use folio_wal::LATEST_VERSION;

use crate::context::StorageContext;
use crate::lock::LockMode;
use crate::pages::TransactionPages;

/// One transaction's view of one collection.
pub struct Snapshot {
    mode: LockMode,
    collection_name: String,
    txn_id: TxnId,
    read_version: u32,
    ctx: Arc<StorageContext>,
    pages: Arc<Mutex<TransactionPages>>,
    reader: DiskReader,
    local_pages: HashMap<PageId, BasePage>,
    collection_page: Option<CollectionPage>,
    created: bool,
    disposed: bool,
}

impl Snapshot {
    /// Opens a snapshot of `collection_name`. A write snapshot reserves the
    /// collection first, then reads at the latest version. When the
    /// collection does not exist and `add_if_missing` is set, a write
    /// snapshot allocates its collection page and registers it in the
    /// header on commit.
    pub(crate) fn new(
        mode: LockMode,
        collection_name: &str,
        txn_id: TxnId,
        ctx: Arc<StorageContext>,
        pages: Arc<Mutex<TransactionPages>>,
        add_if_missing: bool,
    ) -> FolioResult<Self> {
        if mode == LockMode::Write {
            ctx.locks().enter_collection(collection_name, txn_id)?;
        }

        // The read version and the catalog lookup must agree, and commits
        // change both under the header lock.
        let (read_version, collection_page_id) = {
            let header = ctx.header().lock();
            (
                ctx.wal().current_read_version(),
                header.get_collection_page_id(collection_name),
            )
        };

        let reader = ctx.disk().reader();
        let mut snapshot = Self {
            mode,
            collection_name: collection_name.to_string(),
            txn_id,
            read_version,
            ctx,
            pages,
            reader,
            local_pages: HashMap::new(),
            collection_page: None,
            created: false,
            disposed: false,
        };

        match collection_page_id {
            Some(page_id) => {
                let writable = mode == LockMode::Write;
                let buffer = snapshot.load(page_id, read_version, writable)?;
                let mut collection = CollectionPage::read(buffer)?;
                detach(collection.page_mut());
                snapshot.pages.lock().increment_size();
                snapshot.collection_page = Some(collection);
            }
            None if mode == LockMode::Write && add_if_missing => snapshot.create_collection()?,
            None => {}
        }

        trace!(
            collection = collection_name,
            txn_id = txn_id.as_u32(),
            %mode,
            read_version,
            "snapshot opened"
        );
        Ok(snapshot)
    }

    fn create_collection(&mut self) -> FolioResult<()> {
        validate_name(&self.collection_name)?;
        {
            let header = self.ctx.header().lock();
            if self.collection_name.len() + 5 > header.available_collection_space() {
                return Err(FolioError::HeaderFull {
                    collection: self.collection_name.clone(),
                });
            }
        }

        let (page_id, buffer) = self.allocate()?;
        self.collection_page = Some(CollectionPage::new(buffer, page_id)?);
        self.pages.lock().increment_size();

        let name = self.collection_name.clone();
        self.pages
            .lock()
            .on_commit(Box::new(move |header| header.insert_collection(&name, page_id)));
        self.created = true;

        debug!(
            collection = %self.collection_name,
            page_id = page_id.as_u32(),
            "collection created"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Lock mode.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Collection name as requested.
    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Owning transaction.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// WAL version this snapshot reads at.
    #[must_use]
    pub fn read_version(&self) -> u32 {
        self.read_version
    }

    /// Returns true when this snapshot created its collection.
    #[must_use]
    pub fn created(&self) -> bool {
        self.created
    }

    /// Number of pages held in memory.
    #[must_use]
    pub fn local_page_count(&self) -> usize {
        self.local_pages.len()
    }

    /// The collection page, or `None` when the collection does not exist.
    #[must_use]
    pub fn collection_page(&self) -> Option<&CollectionPage> {
        self.collection_page.as_ref()
    }

    /// The collection page for modification.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Internal`] for a read snapshot or a missing
    /// collection.
    pub fn collection_page_mut(&mut self) -> FolioResult<&mut CollectionPage> {
        self.ensure_writable()?;
        let name = &self.collection_name;
        self.collection_page
            .as_mut()
            .ok_or_else(|| FolioError::internal(format!("collection '{name}' does not exist")))
    }

    fn collection(&self) -> FolioResult<&CollectionPage> {
        let name = &self.collection_name;
        self.collection_page
            .as_ref()
            .ok_or_else(|| FolioError::internal(format!("collection '{name}' does not exist")))
    }

    fn ensure_writable(&self) -> FolioResult<()> {
        if self.disposed {
            return Err(FolioError::internal(format!(
                "snapshot of '{}' is disposed",
                self.collection_name
            )));
        }
        if self.mode != LockMode::Write {
            return Err(FolioError::internal(format!(
                "snapshot of '{}' is read-only",
                self.collection_name
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Page access
    // ------------------------------------------------------------------

    fn load(&mut self, page_id: PageId, version: u32, writable: bool) -> FolioResult<PageBuffer> {
        let dirty = self.pages.lock().dirty_page(page_id);
        if let Some(dirty) = dirty {
            return self.reader.read_page(FileOrigin::Log, dirty.position, writable);
        }
        if let Some(position) = self.ctx.wal().get_page_index(page_id, version) {
            return self.reader.read_page(FileOrigin::Log, position, writable);
        }
        self.reader
            .read_page(FileOrigin::Data, page_id.file_position(), writable)
    }

    /// Returns the page, reading it into the snapshot on first access.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Io`] on read failure and
    /// [`FolioError::Corruption`] for an undecodable page.
    pub fn get_page(&mut self, page_id: PageId) -> FolioResult<&mut BasePage> {
        if !self.local_pages.contains_key(&page_id) {
            if self.disposed {
                return Err(FolioError::internal("snapshot is disposed"));
            }
            let writable = self.mode == LockMode::Write;
            let buffer = self.load(page_id, self.read_version, writable)?;
            let mut page = BasePage::read(buffer)?;
            detach(&mut page);
            self.pages.lock().increment_size();
            self.local_pages.insert(page_id, page);
        }
        self.local_pages
            .get_mut(&page_id)
            .ok_or_else(|| FolioError::internal(format!("page {page_id} missing from snapshot")))
    }

    /// Returns the page after checking its type.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::PageTypeMismatch`] for a page of another type.
    pub fn get_page_as(&mut self, page_id: PageId, page_type: PageType) -> FolioResult<&mut BasePage> {
        let page = self.get_page(page_id)?;
        page.expect_type(page_type)?;
        Ok(page)
    }

    /// Takes a page from the header's free-empty list, or extends the file.
    fn allocate(&mut self) -> FolioResult<(PageId, PageBuffer)> {
        self.ensure_writable()?;
        let ctx = Arc::clone(&self.ctx);
        let mut header = ctx.header().lock();

        let free = header.free_empty_page_list();
        let allocated = if free.is_valid() {
            let buffer = self.load(free, LATEST_VERSION, true)?;
            let page = BasePage::read(buffer)?;
            if page.page_type() != PageType::Empty {
                return Err(FolioError::corruption(format!(
                    "page {free} in the free empty list is a {} page",
                    page.page_type()
                )));
            }
            header.set_free_empty_page_list(page.next_page_id());
            (free, page.into_buffer_unchanged())
        } else {
            let page_id = header.last_page_id().next();
            header.set_last_page_id(page_id);
            (page_id, self.reader.new_page())
        };

        self.pages.lock().add_new_page(allocated.0);
        Ok(allocated)
    }

    /// Allocates a fresh page of `page_type` owned by this transaction.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Internal`] for a read snapshot.
    pub fn new_page(&mut self, page_type: PageType) -> FolioResult<PageId> {
        let (page_id, buffer) = self.allocate()?;
        let page = BasePage::new(buffer, page_id, page_type)?;
        self.pages.lock().increment_size();
        self.local_pages.insert(page_id, page);
        trace!(page_id = page_id.as_u32(), %page_type, "new page");
        Ok(page_id)
    }

    // ------------------------------------------------------------------
    // Free lists
    // ------------------------------------------------------------------

    /// Finds a page of `kind` with room for a segment of `length` bytes,
    /// allocating one when no bucket guarantees it.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] when a listed page lacks the
    /// space its bucket promises.
    pub fn get_free_page(&mut self, kind: FreeListKind, length: usize) -> FolioResult<PageId> {
        self.ensure_writable()?;
        let length = length + SLOT_SIZE;

        if let Some(start) = minimum_index_slot(length) {
            for slot in (0..=start).rev() {
                let head = self.collection()?.free_list_head(kind, slot);
                if !head.is_valid() {
                    continue;
                }
                let page = self.get_page(head)?;
                if page.page_list_slot() != slot || page.free_bytes() < length {
                    return Err(FolioError::corruption(format!(
                        "page {head} in free list {slot} cannot hold {length} bytes"
                    )));
                }
                page.set_dirty(true);
                return Ok(head);
            }
        }

        self.new_page(page_type_of(kind))
    }

    /// Moves a page to the bucket matching its free space after a change.
    /// A page left without items is removed from its list and deleted.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for an invalid bucket number.
    pub fn add_or_remove_free_list(&mut self, kind: FreeListKind, page_id: PageId) -> FolioResult<()> {
        self.ensure_writable()?;
        let (new_slot, initial_slot, items) = {
            let page = self.get_page(page_id)?;
            (
                free_index_slot(page.free_bytes()),
                page.page_list_slot(),
                page.items_count(),
            )
        };

        if new_slot == initial_slot && items > 0 {
            return Ok(());
        }

        if initial_slot != NO_FREE_LIST_SLOT {
            if initial_slot as usize >= PAGE_FREE_LIST_SLOTS {
                return Err(FolioError::corruption(format!(
                    "page {page_id} is in free list {initial_slot}"
                )));
            }
            self.remove_free_list(kind, initial_slot, page_id)?;
        }

        if items == 0 {
            self.delete_page(page_id)
        } else {
            self.add_free_list(kind, new_slot, page_id)?;
            self.get_page(page_id)?.set_page_list_slot(new_slot);
            Ok(())
        }
    }

    fn add_free_list(&mut self, kind: FreeListKind, slot: u8, page_id: PageId) -> FolioResult<()> {
        let head = self.collection()?.free_list_head(kind, slot);
        if head.is_valid() {
            self.get_page(head)?.set_prev_page_id(page_id);
        }

        let page = self.get_page(page_id)?;
        page.set_prev_page_id(PageId::INVALID);
        page.set_next_page_id(head);

        self.collection_page_mut()?
            .set_free_list_head(kind, slot, page_id);
        Ok(())
    }

    fn remove_free_list(&mut self, kind: FreeListKind, slot: u8, page_id: PageId) -> FolioResult<()> {
        let (prev, next) = {
            let page = self.get_page(page_id)?;
            (page.prev_page_id(), page.next_page_id())
        };

        if prev.is_valid() {
            self.get_page(prev)?.set_next_page_id(next);
        }
        if next.is_valid() {
            self.get_page(next)?.set_prev_page_id(prev);
        }
        if self.collection()?.free_list_head(kind, slot) == page_id {
            self.collection_page_mut()?
                .set_free_list_head(kind, slot, next);
        }

        let page = self.get_page(page_id)?;
        page.set_prev_page_id(PageId::INVALID);
        page.set_next_page_id(PageId::INVALID);
        Ok(())
    }

    fn delete_page(&mut self, page_id: PageId) -> FolioResult<()> {
        let page = self.get_page(page_id)?;
        if page.items_count() > 0 || page.prev_page_id().is_valid() || page.next_page_id().is_valid() {
            return Err(FolioError::internal(format!(
                "page {page_id} is still in use and cannot be deleted"
            )));
        }
        self.release_page(page_id)
    }

    /// Empties a page whatever it holds and pushes it on the transaction's
    /// deleted chain.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Internal`] for a read snapshot.
    pub fn release_page(&mut self, page_id: PageId) -> FolioResult<()> {
        self.ensure_writable()?;
        self.get_page(page_id)?.mark_as_empty()?;
        let next = self.pages.lock().push_deleted_page(page_id);
        self.get_page(page_id)?.set_next_page_id(next);
        trace!(page_id = page_id.as_u32(), "page deleted");
        Ok(())
    }

    /// Every page listed in the free lists of `kind`, bucket by bucket.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] when a list loops.
    pub fn free_list_pages(&mut self, kind: FreeListKind) -> FolioResult<Vec<PageId>> {
        let mut pages = Vec::new();
        let mut seen = HashSet::new();
        for slot in 0..PAGE_FREE_LIST_SLOTS as u8 {
            let mut next = self.collection()?.free_list_head(kind, slot);
            while next.is_valid() {
                if !seen.insert(next) {
                    return Err(FolioError::corruption(format!(
                        "free list {slot} of '{}' loops at page {next}",
                        self.collection_name
                    )));
                }
                pages.push(next);
                next = self.get_page(next)?.next_page_id();
            }
        }
        Ok(pages)
    }

    /// Empties the collection page and pushes it on the deleted chain. The
    /// snapshot has no collection afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Internal`] for a read snapshot or a missing
    /// collection.
    pub fn release_collection_page(&mut self) -> FolioResult<()> {
        self.ensure_writable()?;
        let collection = self
            .collection_page
            .take()
            .ok_or_else(|| FolioError::internal("collection page already released"))?;

        let mut page = collection.into_page();
        page.mark_as_empty()?;
        let page_id = page.page_id();
        let next = self.pages.lock().push_deleted_page(page_id);
        page.set_next_page_id(next);
        self.local_pages.insert(page_id, page);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transaction hooks
    // ------------------------------------------------------------------

    /// Drains the pages held by a write snapshot: dirty pages are returned
    /// stamped with `txn_id`, clean ones go back to the pool. A dirty
    /// collection page is returned as a copy and stays in the snapshot.
    pub(crate) fn take_dirty_pages(&mut self, txn_id: TxnId) -> FolioResult<Vec<BasePage>> {
        if self.mode != LockMode::Write || self.disposed {
            return Ok(Vec::new());
        }
        let disk = Arc::clone(self.ctx.disk());

        let mut ids: Vec<PageId> = self.local_pages.keys().copied().collect();
        ids.sort_unstable();

        let mut dirty = Vec::new();
        for page_id in ids {
            let Some(mut page) = self.local_pages.remove(&page_id) else {
                continue;
            };
            if page.is_dirty() {
                page.set_transaction_id(txn_id);
                dirty.push(page);
            } else {
                disk.discard(page.into_buffer_unchanged());
            }
        }

        if let Some(collection) = self.collection_page.as_mut() {
            if collection.is_dirty() {
                collection.update_buffer()?;
                let mut copy = disk.new_page();
                copy.as_mut_slice()?
                    .copy_from_slice(collection.page().buffer().as_slice());
                collection.page_mut().set_dirty(false);

                let mut page = BasePage::read(copy)?;
                page.set_transaction_id(txn_id);
                dirty.push(page);
            }
        }

        Ok(dirty)
    }

    /// Drops every held page; used at safepoints.
    pub(crate) fn clear(&mut self) {
        let disk = Arc::clone(self.ctx.disk());
        for (_, page) in self.local_pages.drain() {
            disk.discard(page.into_buffer_unchanged());
        }
    }

    /// Discards every change, including the collection page.
    pub(crate) fn discard_changes(&mut self) {
        self.clear();
        if let Some(collection) = self.collection_page.take() {
            self.ctx.disk().discard(collection.into_page().into_buffer_unchanged());
        }
    }

    /// Releases pages and the collection reservation. Idempotent.
    pub(crate) fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.clear();
        self.disposed = true;
        if self.mode == LockMode::Write {
            self.ctx
                .locks()
                .exit_collection(&self.collection_name, self.txn_id);
        }
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("collection", &self.collection_name)
            .field("mode", &self.mode)
            .field("txn_id", &self.txn_id)
            .field("read_version", &self.read_version)
            .field("local_pages", &self.local_pages.len())
            .field("created", &self.created)
            .finish()
    }
}

/// Clears the log stamp of a page read from the log; it is restamped when
/// this transaction writes it.
fn detach(page: &mut BasePage) {
    page.set_transaction_id(TxnId::INVALID);
    page.set_confirmed(false);
    page.set_dirty(false);
}

fn page_type_of(kind: FreeListKind) -> PageType {
    match kind {
        FreeListKind::Data => PageType::Data,
        FreeListKind::Index => PageType::Index,
    }
}
