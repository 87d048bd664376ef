//! Checkpoint management.
//!
//! A checkpoint copies every page of every confirmed transaction from the
//! log into the data file at its home position, then empties the log. After
//! a checkpoint the WAL index is empty and every page resolves to the data
//! file again.
//!
//! The caller must hold the engine exclusively: no transaction may read a
//! log position while the log is being truncated.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use folio_common::{FolioError, FolioResult, TxnId};
use folio_storage::page::write_page_checksum;
use folio_storage::{BasePage, DiskService};

use crate::index::WalIndex;

/// Information about a completed checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    /// Checkpoint sequence number since the engine opened.
    pub checkpoint_id: u64,
    /// Pages copied into the data file.
    pub pages_copied: u64,
    /// Log pages scanned.
    pub log_pages: u64,
    /// Time taken to complete the checkpoint.
    pub duration: Duration,
}

/// Checkpoint manager.
///
/// Serializes checkpoints and remembers the last one.
#[derive(Debug, Default)]
pub struct CheckpointManager {
    in_progress: AtomicBool,
    checkpoint_count: AtomicU64,
    last_checkpoint: Mutex<Option<CheckpointInfo>>,
}

impl CheckpointManager {
    /// Creates a new checkpoint manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a checkpoint is in progress.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Returns the last completed checkpoint info.
    #[must_use]
    pub fn last_checkpoint(&self) -> Option<CheckpointInfo> {
        self.last_checkpoint.lock().clone()
    }

    /// Returns true once the log holds at least `threshold` pages. A
    /// threshold of 0 never triggers.
    #[must_use]
    pub fn needs_checkpoint(disk: &DiskService, threshold: usize) -> bool {
        threshold > 0 && disk.log_pages() >= threshold as u64
    }

    /// Performs a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Internal`] if another checkpoint is running, or
    /// any I/O error from the data file or the log. I/O errors poison the
    /// engine.
    pub fn checkpoint(&self, disk: &DiskService, wal: &WalIndex) -> FolioResult<CheckpointInfo> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FolioError::internal("checkpoint already in progress"));
        }

        let result = self.run(disk, wal);
        self.in_progress.store(false, Ordering::Release);

        let info = result?;
        *self.last_checkpoint.lock() = Some(info.clone());
        Ok(info)
    }

    fn run(&self, disk: &DiskService, wal: &WalIndex) -> FolioResult<CheckpointInfo> {
        let start = Instant::now();
        disk.state().ensure_usable()?;
        disk.queue().wait()?;

        let log_pages = disk.log_pages();
        let mut pages_copied = 0u64;

        if log_pages > 0 {
            disk.scan_log(|position, buffer| {
                let page = BasePage::read(buffer.to_exclusive())?;
                if !wal.is_confirmed(page.transaction_id()) {
                    return Ok(true);
                }

                let page_id = page.page_id();
                let mut page = page;
                page.set_transaction_id(TxnId::INVALID);
                page.set_confirmed(false);
                let mut copy = page.into_buffer()?;
                let data = copy.as_mut_slice()?;
                write_page_checksum(data);
                disk.write_data_page(page_id, data)?;

                debug!(page_id = page_id.as_u32(), position, "checkpoint copied page");
                pages_copied += 1;
                Ok(true)
            })?;

            disk.sync_data()?;
            disk.truncate_log(0)?;
        }

        wal.clear();
        let kept = disk.cache().clear();
        if kept > 0 {
            warn!(kept, "buffer frames still shared after checkpoint");
        }

        let checkpoint_id = self.checkpoint_count.fetch_add(1, Ordering::AcqRel) + 1;
        let info = CheckpointInfo {
            checkpoint_id,
            pages_copied,
            log_pages,
            duration: start.elapsed(),
        };
        info!(
            checkpoint_id,
            pages = pages_copied,
            log_pages,
            duration_ms = info.duration.as_millis() as u64,
            "checkpoint complete"
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use folio_common::{EngineState, FileOrigin, PageId};
    use folio_storage::{MemoryStreamFactory, PageBuffer, PageType};

    fn open() -> (DiskService, MemoryStreamFactory) {
        let data = MemoryStreamFactory::new("data");
        let disk = DiskService::open(
            Arc::new(data.clone()),
            Arc::new(MemoryStreamFactory::new("log")),
            32,
            Arc::new(EngineState::new()),
        )
        .unwrap();
        (disk, data)
    }

    fn page(disk: &DiskService, id: u32, txn: u32, confirmed: bool, marker: u8) -> PageBuffer {
        let mut page = BasePage::new(disk.new_page(), PageId::new(id), PageType::Data).unwrap();
        page.set_transaction_id(TxnId::new(txn));
        page.set_confirmed(confirmed);
        page.data_mut().unwrap()[100] = marker;
        page.into_buffer().unwrap()
    }

    #[test]
    fn test_copies_confirmed_pages_only() {
        let (disk, _data) = open();
        let wal = WalIndex::new();

        let positions = disk
            .write_log_pages(vec![page(&disk, 1, 1, false, 7), page(&disk, 2, 1, true, 8)])
            .unwrap();
        wal.confirm_transaction(TxnId::new(1), &positions);
        disk.write_log_pages(vec![page(&disk, 3, 2, false, 9)]).unwrap();

        let manager = CheckpointManager::new();
        let info = manager.checkpoint(&disk, &wal).unwrap();

        assert_eq!(info.pages_copied, 2);
        assert_eq!(info.log_pages, 3);
        assert_eq!(disk.log_length(), 0);
        assert_eq!(wal.stats().pages, 0);
        assert!(disk.cache().is_empty());

        let copied = disk
            .read_uncached(FileOrigin::Data, PageId::new(2).file_position())
            .unwrap();
        assert_eq!(copied.as_slice()[100], 8);
        let base = BasePage::read(copied).unwrap();
        assert_eq!(base.transaction_id(), TxnId::INVALID);
        assert!(!base.is_confirmed());

        let skipped = disk
            .read_uncached(FileOrigin::Data, PageId::new(3).file_position())
            .unwrap();
        assert!(skipped.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_last_confirmed_version_wins() {
        let (disk, _data) = open();
        let wal = WalIndex::new();

        for (txn, marker) in [(1u32, 1u8), (2, 2)] {
            let positions = disk
                .write_log_pages(vec![page(&disk, 4, txn, true, marker)])
                .unwrap();
            wal.confirm_transaction(TxnId::new(txn), &positions);
        }

        CheckpointManager::new().checkpoint(&disk, &wal).unwrap();
        let copied = disk
            .read_uncached(FileOrigin::Data, PageId::new(4).file_position())
            .unwrap();
        assert_eq!(copied.as_slice()[100], 2);
    }

    #[test]
    fn test_needs_checkpoint() {
        let (disk, _data) = open();
        assert!(!CheckpointManager::needs_checkpoint(&disk, 0));
        assert!(!CheckpointManager::needs_checkpoint(&disk, 1));

        disk.write_log_pages(vec![page(&disk, 1, 1, true, 0)]).unwrap();
        assert!(CheckpointManager::needs_checkpoint(&disk, 1));
        assert!(!CheckpointManager::needs_checkpoint(&disk, 0));
    }

    #[test]
    fn test_empty_log_checkpoint() {
        let (disk, _data) = open();
        let wal = WalIndex::new();
        let manager = CheckpointManager::new();
        let info = manager.checkpoint(&disk, &wal).unwrap();
        assert_eq!(info.pages_copied, 0);
        assert_eq!(manager.last_checkpoint().unwrap().checkpoint_id, 1);
    }
}
