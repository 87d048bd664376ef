//! Log writer queue.
//!
//! A dedicated thread owns every write to the log file. Pages arrive on an
//! unbounded channel in the order their log positions were assigned; the
//! worker writes each one, drops its share of the cached frame, and syncs
//! once per drained batch. Flush barriers ride the same channel so a caller
//! can wait for everything enqueued before it.
//!
//! After the first I/O error the engine state is marked failed and the
//! worker discards every remaining page.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use folio_common::{EngineState, FolioError, FolioResult};

use crate::buffer::PageBuffer;
use crate::stream::Stream;

/// Message consumed by the writer thread.
enum QueueItem {
    /// A shared page buffer positioned in the log.
    Page(PageBuffer),
    /// Acknowledged once every earlier page is written and synced.
    Barrier(Sender<FolioResult<()>>),
}

/// Ordered, single-writer queue in front of the log stream.
pub struct DiskWriterQueue {
    sender: Mutex<Option<Sender<QueueItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    state: Arc<EngineState>,
}

impl DiskWriterQueue {
    /// Starts the writer thread over `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Io`] if the thread cannot be spawned.
    pub fn start(stream: Arc<dyn Stream>, state: Arc<EngineState>) -> FolioResult<Self> {
        let (sender, receiver) = unbounded();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = Arc::clone(&pending);
        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name("folio-log-writer".into())
            .spawn(move || writer_loop(&receiver, stream.as_ref(), &worker_pending, &worker_state))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            pending,
            state,
        })
    }

    /// Appends a page. The buffer must be shared (published in the cache)
    /// and positioned in the log. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::EngineUnusable`] once the writer failed,
    /// [`FolioError::EngineClosed`] after shutdown and
    /// [`FolioError::Internal`] for an exclusive buffer.
    pub fn enqueue(&self, page: PageBuffer) -> FolioResult<()> {
        self.state.ensure_usable()?;
        if !page.is_shared() {
            return Err(FolioError::internal("log pages must be published before enqueue"));
        }

        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(FolioError::EngineClosed)?;
        self.pending.fetch_add(1, Ordering::AcqRel);
        sender.send(QueueItem::Page(page)).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            FolioError::EngineClosed
        })
    }

    /// Blocks until every page enqueued so far is written and synced.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::EngineUnusable`] if a write failed.
    pub fn wait(&self) -> FolioResult<()> {
        let (ack, done) = crossbeam_channel::bounded(1);
        {
            let sender = self.sender.lock();
            let Some(sender) = sender.as_ref() else {
                return self.state.ensure_usable();
            };
            if sender.send(QueueItem::Barrier(ack)).is_err() {
                return self.state.ensure_usable();
            }
        }
        done.recv().unwrap_or_else(|_| self.state.ensure_usable())
    }

    /// Number of pages enqueued but not yet written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Returns true when nothing is waiting to be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting pages, drains the queue and joins the worker.
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                self.state.set_fatal("log writer thread panicked");
            }
        }
        debug!("log writer stopped");
    }
}

impl Drop for DiskWriterQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DiskWriterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskWriterQueue")
            .field("pending", &self.len())
            .finish()
    }
}

fn writer_loop(
    receiver: &Receiver<QueueItem>,
    stream: &dyn Stream,
    pending: &AtomicUsize,
    state: &EngineState,
) {
    while let Ok(first) = receiver.recv() {
        let mut barriers = Vec::new();
        let mut written = 0usize;

        for item in std::iter::once(first).chain(receiver.try_iter()) {
            match item {
                QueueItem::Page(page) => {
                    if !state.is_failed() {
                        match stream.write_at(page.as_slice(), page.position()) {
                            Ok(()) => written += 1,
                            Err(e) => {
                                error!(position = page.position(), error = %e, "log write failed");
                                state.set_fatal(format!("log write failed: {e}"));
                            }
                        }
                    }
                    pending.fetch_sub(1, Ordering::AcqRel);
                }
                QueueItem::Barrier(ack) => barriers.push(ack),
            }
        }

        if written > 0 && !state.is_failed() {
            if let Err(e) = stream.sync() {
                error!(error = %e, "log sync failed");
                state.set_fatal(format!("log sync failed: {e}"));
            }
            trace!(pages = written, "log batch written");
        }

        for ack in barriers {
            let _ = ack.send(state.ensure_usable());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::stream::{MemoryStreamFactory, StreamFactory};
    use folio_common::{FileOrigin, PAGE_SIZE};

    struct FailingStream;

    impl Stream for FailingStream {
        fn read_at(&self, buf: &mut [u8], _offset: u64) -> FolioResult<()> {
            buf.fill(0);
            Ok(())
        }
        fn write_at(&self, _buf: &[u8], _offset: u64) -> FolioResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }
        fn len(&self) -> FolioResult<u64> {
            Ok(0)
        }
        fn set_len(&self, _len: u64) -> FolioResult<()> {
            Ok(())
        }
        fn sync(&self) -> FolioResult<()> {
            Ok(())
        }
    }

    fn published(pool: &BufferPool, position: u64, fill: u8) -> PageBuffer {
        let mut page = pool.new_page();
        page.as_mut_slice().unwrap().fill(fill);
        page.set_position(FileOrigin::Log, position).unwrap();
        pool.move_to_readable(page).unwrap()
    }

    #[test]
    fn test_pages_written_in_order() {
        let factory = MemoryStreamFactory::new("log");
        let state = Arc::new(EngineState::new());
        let queue = DiskWriterQueue::start(factory.open().unwrap(), Arc::clone(&state)).unwrap();
        let pool = BufferPool::new(16);

        for i in 0..4u8 {
            queue
                .enqueue(published(&pool, u64::from(i) * PAGE_SIZE as u64, i + 1))
                .unwrap();
        }
        queue.wait().unwrap();

        let bytes = factory.to_vec();
        assert_eq!(bytes.len(), 4 * PAGE_SIZE);
        for i in 0..4 {
            assert_eq!(bytes[i * PAGE_SIZE], i as u8 + 1);
        }
        assert!(queue.is_empty());
        // Shares were released by the worker.
        assert_eq!(pool.stats().shared_frames, 0);
    }

    #[test]
    fn test_exclusive_page_rejected() {
        let factory = MemoryStreamFactory::new("log");
        let queue =
            DiskWriterQueue::start(factory.open().unwrap(), Arc::new(EngineState::new())).unwrap();
        let pool = BufferPool::new(4);
        assert!(queue.enqueue(pool.new_page()).is_err());
    }

    #[test]
    fn test_write_failure_poisons_engine() {
        let state = Arc::new(EngineState::new());
        let queue = DiskWriterQueue::start(Arc::new(FailingStream), Arc::clone(&state)).unwrap();
        let pool = BufferPool::new(4);

        queue.enqueue(published(&pool, 0, 1)).unwrap();
        let err = queue.wait().unwrap_err();
        assert!(matches!(err, FolioError::EngineUnusable { .. }));
        assert!(state.is_failed());

        let err = queue.enqueue(published(&pool, PAGE_SIZE as u64, 2)).unwrap_err();
        assert!(matches!(err, FolioError::EngineUnusable { .. }));
    }

    #[test]
    fn test_shutdown_drains() {
        let factory = MemoryStreamFactory::new("log");
        let queue =
            DiskWriterQueue::start(factory.open().unwrap(), Arc::new(EngineState::new())).unwrap();
        let pool = BufferPool::new(4);
        queue.enqueue(published(&pool, 0, 9)).unwrap();

        queue.shutdown();
        queue.shutdown();
        assert_eq!(factory.to_vec()[0], 9);
        assert!(matches!(
            queue.enqueue(published(&pool, 0, 1)),
            Err(FolioError::EngineClosed)
        ));
    }
}
