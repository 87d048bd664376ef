//! Engine-wide state shared by every transaction.

use std::sync::Arc;

use parking_lot::Mutex;

use folio_common::{EngineConfig, EngineState, FolioResult};
use folio_storage::{DiskService, HeaderPage};
use folio_wal::WalIndex;

use crate::lock::LockService;
use crate::monitor::TransactionMonitor;

/// Services every transaction and snapshot works against.
///
/// The header page is the in-memory copy of page 0. It is only ever
/// written to the log as a clone, by a committing transaction holding its
/// mutex, so its mutex also orders header changes with WAL confirmations.
#[derive(Debug)]
pub struct StorageContext {
    config: EngineConfig,
    disk: Arc<DiskService>,
    wal: WalIndex,
    locks: LockService,
    header: Mutex<HeaderPage>,
    monitor: TransactionMonitor,
}

impl StorageContext {
    /// Bundles the services of an opened engine.
    #[must_use]
    pub fn new(config: EngineConfig, disk: Arc<DiskService>, wal: WalIndex, header: HeaderPage) -> Self {
        let locks = LockService::new(config.lock_timeout);
        Self {
            config,
            disk,
            wal,
            locks,
            header: Mutex::new(header),
            monitor: TransactionMonitor::new(),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Disk service.
    #[must_use]
    pub fn disk(&self) -> &Arc<DiskService> {
        &self.disk
    }

    /// WAL index.
    #[must_use]
    pub fn wal(&self) -> &WalIndex {
        &self.wal
    }

    /// Lock service.
    #[must_use]
    pub fn locks(&self) -> &LockService {
        &self.locks
    }

    /// The in-memory header page.
    #[must_use]
    pub fn header(&self) -> &Mutex<HeaderPage> {
        &self.header
    }

    /// Transaction monitor.
    #[must_use]
    pub fn monitor(&self) -> &TransactionMonitor {
        &self.monitor
    }

    /// Engine usability flags.
    #[must_use]
    pub fn state(&self) -> &Arc<EngineState> {
        self.disk.state()
    }

    /// Fails once the engine is closed or poisoned.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::EngineUnusable`] or
    /// [`folio_common::FolioError::EngineClosed`].
    pub fn ensure_usable(&self) -> FolioResult<()> {
        self.state().ensure_usable()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use folio_storage::MemoryStreamFactory;

    /// An in-memory context with a fresh header.
    pub(crate) fn context() -> Arc<StorageContext> {
        let state = Arc::new(EngineState::new());
        let disk = Arc::new(
            DiskService::open(
                Arc::new(MemoryStreamFactory::new("data")),
                Arc::new(MemoryStreamFactory::new("log")),
                128,
                state,
            )
            .unwrap(),
        );
        let header = HeaderPage::new(disk.new_page()).unwrap();
        Arc::new(StorageContext::new(
            EngineConfig::for_testing(),
            disk,
            WalIndex::new(),
            header,
        ))
    }

    #[test]
    fn test_context_accessors() {
        let ctx = context();
        assert!(ctx.ensure_usable().is_ok());
        assert_eq!(ctx.locks().timeout(), ctx.config().lock_timeout);
        assert_eq!(ctx.header().lock().last_page_id(), folio_common::PageId::HEADER);

        ctx.state().set_closed();
        assert!(ctx.ensure_usable().is_err());
    }
}
