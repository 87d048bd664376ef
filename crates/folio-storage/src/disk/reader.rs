//! Per-snapshot disk reader.

use std::sync::Arc;

use folio_common::{FileOrigin, FolioResult};

use super::service::DiskService;
use crate::buffer::PageBuffer;
use crate::stream::Stream;

/// Reads pages through the cache, renting at most one stream per file.
///
/// A reader is not shared between threads: each snapshot owns one and the
/// rented streams go back to their pools when it is dropped.
pub struct DiskReader {
    disk: Arc<DiskService>,
    data: Option<Arc<dyn Stream>>,
    log: Option<Arc<dyn Stream>>,
}

impl DiskReader {
    pub(crate) fn new(disk: Arc<DiskService>) -> Self {
        Self {
            disk,
            data: None,
            log: None,
        }
    }

    fn stream(&mut self, origin: FileOrigin) -> FolioResult<Arc<dyn Stream>> {
        let slot = match origin {
            FileOrigin::Data => &mut self.data,
            FileOrigin::Log => &mut self.log,
        };
        if let Some(stream) = slot {
            return Ok(Arc::clone(stream));
        }
        let stream = self.disk.stream_pool(origin).rent()?;
        *slot = Some(Arc::clone(&stream));
        Ok(stream)
    }

    /// Reads the page at `position`: a shared cached buffer, or a private
    /// copy when `writable`.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::InvalidPosition`] for a
    /// misaligned position and [`folio_common::FolioError::Io`] on read
    /// failure.
    pub fn read_page(&mut self, origin: FileOrigin, position: u64, writable: bool) -> FolioResult<PageBuffer> {
        let stream = self.stream(origin)?;
        let load = |buf: &mut [u8]| stream.read_at(buf, position);
        let cache = self.disk.cache();

        if writable {
            cache.get_writable(origin, position, load)
        } else {
            cache.get_readable(origin, position, load)
        }
    }

    /// A zeroed, unpositioned page buffer.
    #[must_use]
    pub fn new_page(&self) -> PageBuffer {
        self.disk.new_page()
    }

    /// The service this reader belongs to.
    #[must_use]
    pub fn disk(&self) -> &Arc<DiskService> {
        &self.disk
    }
}

impl Drop for DiskReader {
    fn drop(&mut self) {
        if let Some(stream) = self.data.take() {
            self.disk.stream_pool(FileOrigin::Data).give_back(stream);
        }
        if let Some(stream) = self.log.take() {
            self.disk.stream_pool(FileOrigin::Log).give_back(stream);
        }
    }
}

impl std::fmt::Debug for DiskReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskReader")
            .field("data", &self.data.is_some())
            .field("log", &self.log.is_some())
            .finish()
    }
}
