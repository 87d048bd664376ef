//! Block-chained document storage.
//!
//! A document is split into blocks of at most [`MAX_DATA_BYTES_PER_PAGE`]
//! bytes, each stored in a data page taken from the collection's free
//! lists. Blocks are linked through their `next_block` address; every block
//! after the first carries the `extend` flag.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use folio_common::{
    CancellationToken, FolioError, FolioResult, PageAddress, DATA_BLOCK_FIXED_SIZE,
    MAX_DATA_BYTES_PER_PAGE, MAX_DOCUMENT_SIZE,
};
use folio_storage::{DataBlock, FreeListKind, PageType};
use folio_txn::Snapshot;

/// Document operations over one snapshot.
pub struct DataService<'a> {
    snapshot: &'a mut Snapshot,
    max_document_size: usize,
    cancel: Option<CancellationToken>,
}

impl<'a> DataService<'a> {
    /// Creates a service accepting documents up to `max_document_size`
    /// bytes, never more than [`MAX_DOCUMENT_SIZE`].
    pub fn new(snapshot: &'a mut Snapshot, max_document_size: usize) -> Self {
        Self {
            snapshot,
            max_document_size: max_document_size.min(MAX_DOCUMENT_SIZE),
            cancel: None,
        }
    }

    /// Checks `cancel` before every block read.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn check_size(&self, document: &[u8]) -> FolioResult<()> {
        if document.is_empty() {
            return Err(FolioError::invalid_argument("documents cannot be empty"));
        }
        if document.len() > self.max_document_size {
            return Err(FolioError::DocumentTooLarge {
                size: document.len(),
                max_size: self.max_document_size,
            });
        }
        Ok(())
    }

    fn read_block(&mut self, address: PageAddress) -> FolioResult<DataBlock> {
        let page = self.snapshot.get_page_as(address.page_id, PageType::Data)?;
        DataBlock::read(page, address.index)
    }

    fn link(&mut self, block: &mut DataBlock, next: PageAddress) -> FolioResult<()> {
        let page = self.snapshot.get_page(block.position().page_id)?;
        block.set_next_block(page, next)
    }

    fn insert_block(&mut self, extend: bool, payload: &[u8]) -> FolioResult<DataBlock> {
        let page_id = self
            .snapshot
            .get_free_page(FreeListKind::Data, payload.len() + DATA_BLOCK_FIXED_SIZE)?;
        let page = self.snapshot.get_page_as(page_id, PageType::Data)?;
        let block = DataBlock::insert(page, extend, payload)?;
        self.snapshot
            .add_or_remove_free_list(FreeListKind::Data, page_id)?;
        Ok(block)
    }

    /// Stores `document` and returns the address of its first block.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidArgument`] for an empty document and
    /// [`FolioError::DocumentTooLarge`] above the size limit.
    pub fn insert(&mut self, document: &[u8]) -> FolioResult<PageAddress> {
        self.check_size(document)?;

        let mut first = PageAddress::EMPTY;
        let mut last: Option<DataBlock> = None;
        for (i, chunk) in document.chunks(MAX_DATA_BYTES_PER_PAGE).enumerate() {
            let block = self.insert_block(i > 0, chunk)?;
            match last.as_mut() {
                Some(previous) => self.link(previous, block.position())?,
                None => first = block.position(),
            }
            last = Some(block);
        }

        trace!(address = %first, size = document.len(), "document inserted");
        Ok(first)
    }

    /// Replaces the document starting at `address`. Existing blocks are
    /// rewritten in place, each taking as much as its page can hold; the
    /// chain grows with new blocks or loses its unused tail. The first
    /// block keeps its address.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidArgument`] for an empty document,
    /// [`FolioError::DocumentTooLarge`] above the size limit and
    /// [`FolioError::Corruption`] for a broken chain.
    pub fn update(&mut self, address: PageAddress, document: &[u8]) -> FolioResult<()> {
        self.check_size(document)?;

        let mut offset = 0;
        let mut current = Some(self.read_block(address)?);
        let mut last: Option<DataBlock> = None;

        while offset < document.len() {
            let left = document.len() - offset;
            let block = match current.take() {
                Some(block) => {
                    let page_id = block.position().page_id;
                    let page = self.snapshot.get_page_as(page_id, PageType::Data)?;
                    let bytes = left
                        .min(page.free_bytes() + block.payload().len())
                        .min(MAX_DATA_BYTES_PER_PAGE);
                    let updated =
                        DataBlock::update(page, block.position().index, &document[offset..offset + bytes])?;
                    self.snapshot
                        .add_or_remove_free_list(FreeListKind::Data, page_id)?;
                    offset += bytes;

                    let next = updated.next_block();
                    if !next.is_empty() {
                        current = Some(self.read_block(next)?);
                    }
                    updated
                }
                None => {
                    let bytes = left.min(MAX_DATA_BYTES_PER_PAGE);
                    let block = self.insert_block(true, &document[offset..offset + bytes])?;
                    offset += bytes;
                    if let Some(previous) = last.as_mut() {
                        self.link(previous, block.position())?;
                    }
                    block
                }
            };
            last = Some(block);
        }

        if let Some(tail) = current {
            if let Some(mut previous) = last {
                self.link(&mut previous, PageAddress::EMPTY)?;
            }
            self.delete(tail.position())?;
        }

        trace!(%address, size = document.len(), "document updated");
        Ok(())
    }

    /// Lazily reads the document starting at `address`, one block per
    /// item.
    pub fn read(&mut self, address: PageAddress) -> DataReader<'_> {
        DataReader {
            snapshot: &mut *self.snapshot,
            next: address,
            first: true,
            cancel: self.cancel.clone(),
        }
    }

    /// Reads the whole document starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a broken chain and
    /// [`FolioError::Cancelled`] after cancellation.
    pub fn read_document(&mut self, address: PageAddress) -> FolioResult<Bytes> {
        let mut segments = self.read(address);
        let Some(first) = segments.next().transpose()? else {
            return Ok(Bytes::new());
        };
        let Some(second) = segments.next().transpose()? else {
            return Ok(first);
        };

        let mut document = BytesMut::with_capacity(first.len() + second.len());
        document.extend_from_slice(&first);
        document.extend_from_slice(&second);
        for segment in segments {
            document.extend_from_slice(&segment?);
        }
        Ok(document.freeze())
    }

    /// Frees every block of the document starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a broken chain.
    pub fn delete(&mut self, address: PageAddress) -> FolioResult<()> {
        let mut next = address;
        let mut blocks = 0usize;
        while !next.is_empty() {
            let block = self.read_block(next)?;
            self.snapshot
                .get_page_as(next.page_id, PageType::Data)?
                .delete(next.index)?;
            self.snapshot
                .add_or_remove_free_list(FreeListKind::Data, next.page_id)?;
            next = block.next_block();
            blocks += 1;
        }
        trace!(%address, blocks, "document deleted");
        Ok(())
    }

    /// Every document of the collection in storage order, with the address
    /// of its first block.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for broken chains or looping free
    /// lists.
    pub fn read_all(&mut self) -> FolioResult<Vec<(PageAddress, Bytes)>> {
        if self.snapshot.collection_page().is_none() {
            return Ok(Vec::new());
        }

        let mut starts = Vec::new();
        for page_id in self.snapshot.free_list_pages(FreeListKind::Data)? {
            let page = self.snapshot.get_page_as(page_id, PageType::Data)?;
            starts.extend(
                DataBlock::all_blocks(page)?
                    .into_iter()
                    .filter(|block| !block.extend())
                    .map(|block| block.position()),
            );
        }

        let mut documents = Vec::with_capacity(starts.len());
        for address in starts {
            if let Some(cancel) = &self.cancel {
                cancel.check()?;
            }
            documents.push((address, self.read_document(address)?));
        }
        Ok(documents)
    }
}

/// Lazy, single-pass reader over the blocks of one document.
pub struct DataReader<'s> {
    snapshot: &'s mut Snapshot,
    next: PageAddress,
    first: bool,
    cancel: Option<CancellationToken>,
}

impl DataReader<'_> {
    fn read_next(&mut self) -> FolioResult<Bytes> {
        if let Some(cancel) = &self.cancel {
            cancel.check()?;
        }
        let address = self.next;
        let page = self.snapshot.get_page_as(address.page_id, PageType::Data)?;
        let block = DataBlock::read(page, address.index)?;
        if block.extend() == self.first {
            return Err(FolioError::corruption(format!(
                "data block {address} has an unexpected extend flag"
            )));
        }
        self.first = false;
        self.next = block.next_block();
        Ok(block.into_payload())
    }
}

impl Iterator for DataReader<'_> {
    type Item = FolioResult<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_empty() {
            return None;
        }
        let result = self.read_next();
        if result.is_err() {
            self.next = PageAddress::EMPTY;
        }
        Some(result)
    }
}
