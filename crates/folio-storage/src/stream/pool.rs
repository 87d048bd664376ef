//! Stream pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use folio_common::FolioResult;

use super::{Stream, StreamFactory};

/// Maximum number of idle reader streams kept open.
const MAX_IDLE_READERS: usize = 16;

/// Owns the writer stream of one file and recycles reader streams.
pub struct StreamPool {
    factory: Arc<dyn StreamFactory>,
    writer: Arc<dyn Stream>,
    readers: Mutex<Vec<Arc<dyn Stream>>>,
    opened: AtomicUsize,
}

impl StreamPool {
    /// Creates a pool and opens the writer stream.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::Io`] if the file cannot be
    /// opened.
    pub fn new(factory: Arc<dyn StreamFactory>) -> FolioResult<Self> {
        let writer = factory.open()?;
        Ok(Self {
            factory,
            writer,
            readers: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(1),
        })
    }

    /// The factory streams are opened from.
    #[must_use]
    pub fn factory(&self) -> &Arc<dyn StreamFactory> {
        &self.factory
    }

    /// The single writer stream.
    #[must_use]
    pub fn writer(&self) -> &Arc<dyn Stream> {
        &self.writer
    }

    /// Rents a reader stream, opening a new one when none is idle.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::Io`] if a new stream cannot be
    /// opened.
    pub fn rent(&self) -> FolioResult<Arc<dyn Stream>> {
        if let Some(stream) = self.readers.lock().pop() {
            return Ok(stream);
        }
        let stream = self.factory.open()?;
        let opened = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(file = %self.factory.name(), opened, "opened reader stream");
        Ok(stream)
    }

    /// Returns a rented reader stream.
    pub fn give_back(&self, stream: Arc<dyn Stream>) {
        let mut readers = self.readers.lock();
        if readers.len() < MAX_IDLE_READERS {
            readers.push(stream);
        }
    }

    /// Number of idle reader streams.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.readers.lock().len()
    }

    /// Number of streams opened so far, writer included.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPool")
            .field("file", &self.factory.name())
            .field("idle", &self.idle())
            .finish()
    }
}
