//! Disk service: buffer cache, stream pools and the log writer.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use folio_common::{EngineState, FileOrigin, FolioError, FolioResult, PageId, PagePosition, PAGE_SIZE};

use super::queue::DiskWriterQueue;
use super::reader::DiskReader;
use crate::buffer::{BufferPool, PageBuffer};
use crate::page::write_page_checksum;
use crate::stream::{StreamFactory, StreamPool};

/// Owns the data file, the log file and the page cache in front of them.
///
/// Pages are appended to the log under an append lock that covers both the
/// position assignment and the enqueue, so the writer sees pages in log
/// position order.
pub struct DiskService {
    cache: BufferPool,
    data: StreamPool,
    log: StreamPool,
    queue: DiskWriterQueue,
    /// Next free log position. Held while assigning positions and enqueuing.
    log_end: Mutex<u64>,
    state: Arc<EngineState>,
}

impl DiskService {
    /// Opens both files and starts the log writer.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Io`] if either file cannot be opened.
    pub fn open(
        data: Arc<dyn StreamFactory>,
        log: Arc<dyn StreamFactory>,
        cache_size: usize,
        state: Arc<EngineState>,
    ) -> FolioResult<Self> {
        let data = StreamPool::new(data)?;
        let log = StreamPool::new(log)?;
        let log_length = log.writer().len()?;
        let log_end = log_length - log_length % PAGE_SIZE as u64;
        let queue = DiskWriterQueue::start(Arc::clone(log.writer()), Arc::clone(&state))?;

        info!(
            data = %data.factory().name(),
            log = %log.factory().name(),
            log_pages = log_end / PAGE_SIZE as u64,
            "opened disk service"
        );

        Ok(Self {
            cache: BufferPool::new(cache_size),
            data,
            log,
            queue,
            log_end: Mutex::new(log_end),
            state,
        })
    }

    /// Creates a reader bound to this service. Each snapshot owns one.
    #[must_use]
    pub fn reader(self: &Arc<Self>) -> DiskReader {
        DiskReader::new(Arc::clone(self))
    }

    /// The page cache.
    #[must_use]
    pub fn cache(&self) -> &BufferPool {
        &self.cache
    }

    /// The log writer queue.
    #[must_use]
    pub fn queue(&self) -> &DiskWriterQueue {
        &self.queue
    }

    /// Engine usability flag.
    #[must_use]
    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub(crate) fn stream_pool(&self, origin: FileOrigin) -> &StreamPool {
        match origin {
            FileOrigin::Data => &self.data,
            FileOrigin::Log => &self.log,
        }
    }

    /// Returns true when the data file holds no complete page yet.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Io`] on I/O failure.
    pub fn data_is_empty(&self) -> FolioResult<bool> {
        Ok(self.data.writer().len()? < PAGE_SIZE as u64)
    }

    /// Length of the data file in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Io`] on I/O failure.
    pub fn data_length(&self) -> FolioResult<u64> {
        self.data.writer().len()
    }

    /// Next free log position.
    #[must_use]
    pub fn log_length(&self) -> u64 {
        *self.log_end.lock()
    }

    /// Number of pages in the log.
    #[must_use]
    pub fn log_pages(&self) -> u64 {
        self.log_length() / PAGE_SIZE as u64
    }

    /// A zeroed, unpositioned page buffer.
    #[must_use]
    pub fn new_page(&self) -> PageBuffer {
        self.cache.new_page()
    }

    /// Returns a buffer to the cache without writing it.
    pub fn discard(&self, buffer: PageBuffer) {
        self.cache.discard(buffer);
    }

    /// Appends exclusive pages to the log. Each page gets the next log
    /// position and a checksum, is published to the cache and handed to the
    /// writer. Returns where every page was placed.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::EngineUnusable`] once the writer failed and
    /// [`FolioError::ReadOnlyPage`] for a shared buffer.
    pub fn write_log_pages(&self, pages: Vec<PageBuffer>) -> FolioResult<Vec<PagePosition>> {
        self.state.ensure_usable()?;

        let mut positions = Vec::with_capacity(pages.len());
        let mut log_end = self.log_end.lock();

        for mut page in pages {
            let data = page.as_mut_slice()?;
            let page_id = PageId::from_le_bytes([data[0], data[1], data[2], data[3]]);
            write_page_checksum(data);

            page.set_position(FileOrigin::Log, *log_end)?;
            let shared = self.cache.move_to_readable(page)?;
            self.queue.enqueue(shared)?;

            positions.push(PagePosition::new(page_id, *log_end));
            *log_end += PAGE_SIZE as u64;
        }

        Ok(positions)
    }

    /// Calls `visit` with the position and bytes of every log page, in
    /// order, until it returns `false`. Returns the position the scan
    /// stopped at.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Io`] on read failure or any error of `visit`.
    pub fn scan_log<F>(&self, mut visit: F) -> FolioResult<u64>
    where
        F: FnMut(u64, &PageBuffer) -> FolioResult<bool>,
    {
        let end = self.log_length();
        let stream = self.log.rent()?;
        let mut position = 0u64;
        let mut buffer = PageBuffer::zeroed();

        let result = loop {
            if position >= end {
                break Ok(position);
            }
            let read = buffer
                .as_mut_slice()
                .and_then(|data| stream.read_at(data, position));
            if let Err(e) = read {
                break Err(e);
            }
            match visit(position, &buffer) {
                Ok(true) => position += PAGE_SIZE as u64,
                Ok(false) => break Ok(position),
                Err(e) => break Err(e),
            }
        };

        self.log.give_back(stream);
        result
    }

    /// Reads a page straight from a file, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Io`] on read failure.
    pub fn read_uncached(&self, origin: FileOrigin, position: u64) -> FolioResult<PageBuffer> {
        if position % PAGE_SIZE as u64 != 0 {
            return Err(FolioError::InvalidPosition { position });
        }
        let pool = self.stream_pool(origin);
        let stream = pool.rent()?;
        let mut buffer = PageBuffer::zeroed();
        let read = buffer
            .as_mut_slice()
            .and_then(|data| stream.read_at(data, position));
        pool.give_back(stream);
        read?;
        buffer.set_position(origin, position)?;
        Ok(buffer)
    }

    /// Writes page bytes straight into the data file at the page's home
    /// position. Only used by checkpoint and initialization, while no
    /// transaction runs.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Io`] on write failure.
    pub fn write_data_page(&self, page_id: PageId, data: &[u8]) -> FolioResult<()> {
        self.state.ensure_usable()?;
        self.data
            .writer()
            .write_at(data, page_id.file_position())
            .map_err(|e| self.fail("data write failed", e))
    }

    /// Syncs the data file.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Io`] on failure.
    pub fn sync_data(&self) -> FolioResult<()> {
        self.data
            .writer()
            .sync()
            .map_err(|e| self.fail("data sync failed", e))
    }

    /// Truncates the log at `position` so later appends start there. Used
    /// after a checkpoint (position 0) and after restore finds a torn tail.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Io`] on failure.
    pub fn truncate_log(&self, position: u64) -> FolioResult<()> {
        self.queue.wait()?;
        let mut log_end = self.log_end.lock();
        self.log
            .writer()
            .set_len(position)
            .and_then(|()| self.log.writer().sync())
            .map_err(|e| self.fail("log truncate failed", e))?;
        *log_end = position;
        debug!(position, "log truncated");
        Ok(())
    }

    /// Stops the writer after it drained the queue.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    fn fail(&self, what: &str, error: FolioError) -> FolioError {
        self.state.set_fatal(format!("{what}: {error}"));
        error
    }
}

impl std::fmt::Debug for DiskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskService")
            .field("log_end", &self.log_length())
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{verify_page_checksum, BasePage, PageType};
    use crate::stream::MemoryStreamFactory;

    fn service() -> (Arc<DiskService>, MemoryStreamFactory) {
        let log = MemoryStreamFactory::new("log");
        let disk = DiskService::open(
            Arc::new(MemoryStreamFactory::new("data")),
            Arc::new(log.clone()),
            64,
            Arc::new(EngineState::new()),
        )
        .unwrap();
        (Arc::new(disk), log)
    }

    fn page(disk: &DiskService, id: u32) -> PageBuffer {
        BasePage::new(disk.new_page(), PageId::new(id), PageType::Data)
            .unwrap()
            .into_buffer()
            .unwrap()
    }

    #[test]
    fn test_write_log_pages_assigns_positions() {
        let (disk, log) = service();
        let positions = disk
            .write_log_pages(vec![page(&disk, 3), page(&disk, 9)])
            .unwrap();

        assert_eq!(positions[0], PagePosition::new(PageId::new(3), 0));
        assert_eq!(positions[1], PagePosition::new(PageId::new(9), PAGE_SIZE as u64));
        assert_eq!(disk.log_pages(), 2);

        disk.queue().wait().unwrap();
        let bytes = log.to_vec();
        assert!(verify_page_checksum(&bytes[PAGE_SIZE..]));
    }

    #[test]
    fn test_scan_log_stops_on_request() {
        let (disk, _log) = service();
        disk.write_log_pages((1..=3).map(|i| page(&disk, i)).collect())
            .unwrap();
        disk.queue().wait().unwrap();

        let mut seen = Vec::new();
        let stop = disk
            .scan_log(|position, buffer| {
                let page = BasePage::read(buffer.to_exclusive())?;
                seen.push(page.page_id().as_u32());
                Ok(position < PAGE_SIZE as u64)
            })
            .unwrap();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(stop, PAGE_SIZE as u64);
    }

    #[test]
    fn test_data_page_round_trip() {
        let (disk, _log) = service();
        assert!(disk.data_is_empty().unwrap());

        let buffer = page(&disk, 2);
        disk.write_data_page(PageId::new(2), buffer.as_slice()).unwrap();
        disk.sync_data().unwrap();

        let read = disk.read_uncached(FileOrigin::Data, PageId::new(2).file_position()).unwrap();
        assert_eq!(BasePage::read(read).unwrap().page_id(), PageId::new(2));
    }

    #[test]
    fn test_truncate_log() {
        let (disk, log) = service();
        disk.write_log_pages(vec![page(&disk, 1)]).unwrap();
        disk.truncate_log(0).unwrap();
        assert_eq!(disk.log_length(), 0);
        assert!(log.to_vec().is_empty());
    }
}
