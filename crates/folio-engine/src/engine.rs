//! Main storage engine.
//!
//! The [`Engine`] is the top-level entry point of Folio. It opens the data
//! file and its log, rebuilds the WAL index from the log, and hands out
//! [`Session`]s through which all work happens.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use folio_common::{
    EngineConfig, EngineState, FileOrigin, FolioError, FolioResult, PageId,
};
use folio_storage::page::write_page_checksum;
use folio_storage::{
    BasePage, BufferPoolStats, DiskService, FileStreamFactory, HeaderPage, MemoryStreamFactory,
    PageType, StreamFactory,
};
use folio_txn::{MonitorStats, StorageContext};
use folio_wal::{restore_index, CheckpointInfo, CheckpointManager, WalIndex, WalIndexStats};

use crate::keys::KeyExtractor;
use crate::session::{Session, SessionId};

// ============================================================================
// Builder
// ============================================================================

/// Opens an [`Engine`] with optional collaborators.
///
/// # Example
///
/// ```rust
/// use folio_common::EngineConfig;
/// use folio_engine::Engine;
///
/// let engine = Engine::builder(EngineConfig::in_memory()).open().unwrap();
/// assert!(engine.collection_names().is_empty());
/// engine.close().unwrap();
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    extractor: Option<Arc<dyn KeyExtractor>>,
    data: Option<Arc<dyn StreamFactory>>,
    log: Option<Arc<dyn StreamFactory>>,
}

impl EngineBuilder {
    /// Sets the extractor used to compute secondary index keys.
    #[must_use]
    pub fn key_extractor(mut self, extractor: Arc<dyn KeyExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Stores data pages in `factory` instead of the configured file.
    #[must_use]
    pub fn data_stream(mut self, factory: Arc<dyn StreamFactory>) -> Self {
        self.data = Some(factory);
        self
    }

    /// Stores the log in `factory` instead of the configured file.
    #[must_use]
    pub fn log_stream(mut self, factory: Arc<dyn StreamFactory>) -> Self {
        self.log = Some(factory);
        self
    }

    fn streams(&mut self) -> (Arc<dyn StreamFactory>, Arc<dyn StreamFactory>) {
        let (default_data, default_log): (Arc<dyn StreamFactory>, Arc<dyn StreamFactory>) =
            match (&self.config.filename, self.config.log_filename()) {
                (Some(data), Some(log)) => (
                    Arc::new(FileStreamFactory::new(data.clone())),
                    Arc::new(FileStreamFactory::new(log)),
                ),
                _ => (
                    Arc::new(MemoryStreamFactory::new(":memory:")),
                    Arc::new(MemoryStreamFactory::new(":memory:-log")),
                ),
            };
        (
            self.data.take().unwrap_or(default_data),
            self.log.take().unwrap_or(default_log),
        )
    }

    /// Opens the engine: creates the data file when empty, restores the
    /// WAL index from the log and checkpoints whatever the log holds.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidConfig`] for an invalid configuration,
    /// [`FolioError::Io`] when a file cannot be opened and
    /// [`FolioError::Corruption`] for a file that is not a Folio file.
    pub fn open(mut self) -> FolioResult<Engine> {
        self.config.validate()?;
        let (data, log) = self.streams();

        let state = Arc::new(EngineState::new());
        let disk = Arc::new(DiskService::open(
            data,
            log,
            self.config.cache_size,
            Arc::clone(&state),
        )?);

        let header = if disk.data_is_empty()? {
            initialize(&disk)?
        } else {
            HeaderPage::load(disk.read_uncached(FileOrigin::Data, 0)?)?
        };

        let wal = WalIndex::new();
        let restored = restore_index(&disk, &wal)?;
        if restored.transactions > 0 || restored.torn_tail {
            info!(
                pages = restored.pages,
                transactions = restored.transactions,
                torn_tail = restored.torn_tail,
                "restored WAL index from log"
            );
        }
        let header = match restored.header {
            Some(buffer) => HeaderPage::load(buffer)?,
            None => header,
        };

        let ctx = Arc::new(StorageContext::new(self.config, disk, wal, header));
        let checkpoints = CheckpointManager::new();
        if ctx.disk().log_pages() > 0 {
            checkpoints.checkpoint(ctx.disk(), ctx.wal())?;
        }

        info!(
            file = ?ctx.config().filename,
            last_page = ctx.header().lock().last_page_id().as_u32(),
            "engine opened"
        );

        Ok(Engine {
            inner: Arc::new(EngineInner {
                ctx,
                checkpoints,
                extractor: self.extractor,
                closed: AtomicBool::new(false),
                next_session_id: AtomicU64::new(1),
                started_at: Instant::now(),
            }),
        })
    }
}

/// Writes a fresh header page at position 0 of an empty data file.
fn initialize(disk: &DiskService) -> FolioResult<HeaderPage> {
    let mut header = HeaderPage::new(disk.new_page())?;
    let mut data = header.update_buffer()?.as_slice().to_vec();
    write_page_checksum(&mut data);
    disk.write_data_page(PageId::HEADER, &data)?;
    disk.sync_data()?;
    debug!("initialized new data file");
    Ok(header)
}

// ============================================================================
// Engine
// ============================================================================

/// Engine statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Transaction counters.
    pub transactions: MonitorStats,
    /// Buffer pool counters.
    pub cache: BufferPoolStats,
    /// WAL index counters.
    pub wal: WalIndexStats,
    /// Pages currently in the log.
    pub log_pages: u64,
    /// Number of collections.
    pub collections: usize,
    /// Last checkpoint, if any ran.
    pub last_checkpoint: Option<CheckpointInfo>,
    /// Time since open.
    pub uptime: Duration,
}

pub(crate) struct EngineInner {
    ctx: Arc<StorageContext>,
    checkpoints: CheckpointManager,
    extractor: Option<Arc<dyn KeyExtractor>>,
    closed: AtomicBool,
    next_session_id: AtomicU64,
    started_at: Instant,
}

impl EngineInner {
    fn shutdown(&self) -> FolioResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let aborted = self.ctx.monitor().abort_all();
        let result = if self.ctx.state().is_failed() {
            warn!("engine is unusable, skipping the final checkpoint");
            Ok(())
        } else {
            match self.ctx.locks().enter_exclusive() {
                Ok(_guard) => self
                    .checkpoints
                    .checkpoint(self.ctx.disk(), self.ctx.wal())
                    .map(|_| ()),
                Err(e) => {
                    warn!(error = %e, "transactions still running, skipping the final checkpoint");
                    Ok(())
                }
            }
        };

        self.ctx.state().set_closed();
        self.ctx.disk().shutdown();
        info!(aborted, "engine closed");
        result
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "error while closing engine");
        }
    }
}

/// The storage engine. Cheap to clone; every clone refers to the same
/// open file.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Opens an engine with the given configuration.
    ///
    /// # Errors
    ///
    /// See [`EngineBuilder::open`].
    pub fn open(config: EngineConfig) -> FolioResult<Self> {
        Self::builder(config).open()
    }

    /// Starts building an engine.
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            extractor: None,
            data: None,
            log: None,
        }
    }

    /// Creates a new session.
    #[must_use]
    pub fn session(&self) -> Session {
        let id = SessionId::new(self.inner.next_session_id.fetch_add(1, Ordering::Relaxed));
        Session::new(id, self.clone())
    }

    pub(crate) fn context(&self) -> &Arc<StorageContext> {
        &self.inner.ctx
    }

    pub(crate) fn extractor(&self) -> Option<&Arc<dyn KeyExtractor>> {
        self.inner.extractor.as_ref()
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.inner.ctx.config()
    }

    /// Returns true once [`Engine::close`] ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Names of all committed collections.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.inner.ctx.header().lock().collection_names()
    }

    /// Copies every confirmed page from the log into the data file and
    /// empties the log. Waits for running transactions to finish.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::LockTimeout`] when transactions keep running
    /// past the lock timeout and any I/O error.
    pub fn checkpoint(&self) -> FolioResult<CheckpointInfo> {
        let ctx = &self.inner.ctx;
        ctx.ensure_usable()?;
        let _guard = ctx.locks().enter_exclusive()?;
        let info = self.inner.checkpoints.checkpoint(ctx.disk(), ctx.wal())?;
        info!(
            pages = info.pages_copied,
            log_pages = info.log_pages,
            duration_ms = info.duration.as_millis() as u64,
            "checkpoint completed"
        );
        Ok(info)
    }

    /// Checkpoints when the log grew past `checkpoint_size` and no
    /// transaction is running. Failures are logged, not returned.
    pub(crate) fn auto_checkpoint(&self) {
        let ctx = &self.inner.ctx;
        if !CheckpointManager::needs_checkpoint(ctx.disk(), ctx.config().checkpoint_size) {
            return;
        }
        let Some(_guard) = ctx.locks().try_enter_exclusive() else {
            return;
        };
        match self.inner.checkpoints.checkpoint(ctx.disk(), ctx.wal()) {
            Ok(info) => debug!(pages = info.pages_copied, "automatic checkpoint"),
            Err(e) => warn!(error = %e, "automatic checkpoint failed"),
        }
    }

    /// Walks the header's free-empty page list at the latest confirmed
    /// version.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] when a listed page is not empty or
    /// the list loops.
    pub fn free_empty_pages(&self) -> FolioResult<Vec<PageId>> {
        let ctx = &self.inner.ctx;
        ctx.ensure_usable()?;

        let header = ctx.header().lock();
        let version = ctx.wal().current_read_version();
        let mut reader = ctx.disk().reader();

        let mut pages = Vec::new();
        let mut seen = HashSet::new();
        let mut next = header.free_empty_page_list();
        while next.is_valid() {
            if !seen.insert(next) {
                return Err(FolioError::corruption(format!(
                    "free empty page list loops at page {next}"
                )));
            }
            let buffer = match ctx.wal().get_page_index(next, version) {
                Some(position) => reader.read_page(FileOrigin::Log, position, false)?,
                None => reader.read_page(FileOrigin::Data, next.file_position(), false)?,
            };
            let page = BasePage::read(buffer)?;
            if page.page_type() != PageType::Empty {
                return Err(FolioError::corruption(format!(
                    "page {next} in the free empty list is a {} page",
                    page.page_type()
                )));
            }
            pages.push(next);
            next = page.next_page_id();
        }
        Ok(pages)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let ctx = &self.inner.ctx;
        EngineStats {
            transactions: ctx.monitor().stats(),
            cache: ctx.disk().cache().stats(),
            wal: ctx.wal().stats(),
            log_pages: ctx.disk().log_pages(),
            collections: ctx.header().lock().collection_names().len(),
            last_checkpoint: self.inner.checkpoints.last_checkpoint(),
            uptime: self.inner.started_at.elapsed(),
        }
    }

    /// Closes the engine: flags running transactions aborted, checkpoints
    /// when they have finished within the lock timeout, and stops the log
    /// writer. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns any I/O error of the final checkpoint.
    pub fn close(&self) -> FolioResult<()> {
        self.inner.shutdown()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("filename", &self.config().filename)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
