//! Rebuilding the WAL index from the log on open.

use std::collections::HashMap;

use tracing::{info, warn};

use folio_common::{FolioResult, PagePosition, TxnId};
use folio_storage::page::verify_page_checksum;
use folio_storage::{BasePage, DiskService, PageBuffer, PageType};

use crate::index::WalIndex;

/// Outcome of [`restore_index`].
#[derive(Debug, Default)]
pub struct RestoreInfo {
    /// Log pages scanned.
    pub pages: u64,
    /// Transactions confirmed from the log.
    pub transactions: usize,
    /// Position right after the last valid page.
    pub end_position: u64,
    /// True when a page failed its checksum and the log was cut there.
    pub torn_tail: bool,
    /// Latest confirmed header page found in the log.
    pub header: Option<PageBuffer>,
}

/// Scans the log and confirms every transaction whose confirmed page is
/// present. Pages of a transaction that never confirmed are ignored. A page
/// failing its checksum ends the scan and the log is truncated there.
///
/// # Errors
///
/// Returns [`folio_common::FolioError::Io`] on read failure.
pub fn restore_index(disk: &DiskService, wal: &WalIndex) -> FolioResult<RestoreInfo> {
    let mut pending: HashMap<TxnId, Vec<PagePosition>> = HashMap::new();
    let mut info = RestoreInfo::default();

    let end = disk.scan_log(|position, buffer| {
        let bytes = buffer.as_slice();
        if bytes.iter().all(|b| *b == 0) {
            info.pages += 1;
            return Ok(true);
        }
        if !verify_page_checksum(bytes) {
            warn!(position, "log page failed checksum, ignoring the rest of the log");
            info.torn_tail = true;
            return Ok(false);
        }

        let page = BasePage::read(buffer.to_exclusive())?;
        let txn_id = page.transaction_id();
        pending
            .entry(txn_id)
            .or_default()
            .push(PagePosition::new(page.page_id(), position));
        wal.observe_transaction_id(txn_id);

        if page.is_confirmed() {
            let positions = pending.remove(&txn_id).unwrap_or_default();
            wal.confirm_transaction(txn_id, &positions);
            info.transactions += 1;
            if page.page_type() == PageType::Header {
                info.header = Some(page.into_buffer_unchanged());
            }
        }

        info.pages += 1;
        Ok(true)
    })?;

    info.end_position = end;
    if info.torn_tail {
        disk.truncate_log(end)?;
    }

    info!(
        pages = info.pages,
        transactions = info.transactions,
        discarded = pending.len(),
        torn_tail = info.torn_tail,
        "restored wal index"
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use folio_common::{EngineState, PageId, PAGE_SIZE};
    use folio_storage::{HeaderPage, MemoryStreamFactory, StreamFactory};

    fn open(log: &MemoryStreamFactory) -> DiskService {
        DiskService::open(
            Arc::new(MemoryStreamFactory::new("data")),
            Arc::new(log.clone()),
            32,
            Arc::new(EngineState::new()),
        )
        .unwrap()
    }

    fn page(disk: &DiskService, id: u32, txn: u32, confirmed: bool) -> PageBuffer {
        let mut page = BasePage::new(disk.new_page(), PageId::new(id), PageType::Data).unwrap();
        page.set_transaction_id(TxnId::new(txn));
        page.set_confirmed(confirmed);
        page.into_buffer().unwrap()
    }

    #[test]
    fn test_confirmed_transactions_restored() {
        let log = MemoryStreamFactory::new("log");
        {
            let disk = open(&log);
            disk.write_log_pages(vec![
                page(&disk, 1, 1, false),
                page(&disk, 2, 1, true),
                page(&disk, 3, 2, false),
            ])
            .unwrap();
            disk.shutdown();
        }

        let disk = open(&log);
        let wal = WalIndex::new();
        let info = restore_index(&disk, &wal).unwrap();

        assert_eq!(info.pages, 3);
        assert_eq!(info.transactions, 1);
        assert!(wal.is_confirmed(TxnId::new(1)));
        assert!(!wal.is_confirmed(TxnId::new(2)));
        assert_eq!(wal.last_transaction_id(), TxnId::new(2));

        let version = wal.current_read_version();
        assert_eq!(wal.get_page_index(PageId::new(1), version), Some(0));
        assert_eq!(wal.get_page_index(PageId::new(3), version), None);
    }

    #[test]
    fn test_header_page_is_returned() {
        let log = MemoryStreamFactory::new("log");
        {
            let disk = open(&log);
            let mut header = HeaderPage::new(disk.new_page()).unwrap();
            header.set_last_page_id(PageId::new(17));
            let clone = header.write_clone(disk.new_page(), TxnId::new(5)).unwrap();
            disk.write_log_pages(vec![page(&disk, 4, 5, false), clone]).unwrap();
            disk.shutdown();
        }

        let disk = open(&log);
        let wal = WalIndex::new();
        let info = restore_index(&disk, &wal).unwrap();
        let header = HeaderPage::load(info.header.unwrap()).unwrap();
        assert_eq!(header.last_page_id(), PageId::new(17));
    }

    #[test]
    fn test_torn_tail_truncates() {
        let log = MemoryStreamFactory::new("log");
        {
            let disk = open(&log);
            disk.write_log_pages(vec![page(&disk, 1, 1, true), page(&disk, 2, 2, true)])
                .unwrap();
            disk.shutdown();
        }
        // Corrupt the second page.
        log.open().unwrap().write_at(&[0xAB; 16], PAGE_SIZE as u64 + 100).unwrap();

        let disk = open(&log);
        let wal = WalIndex::new();
        let info = restore_index(&disk, &wal).unwrap();

        assert!(info.torn_tail);
        assert_eq!(info.transactions, 1);
        assert_eq!(info.end_position, PAGE_SIZE as u64);
        assert_eq!(disk.log_length(), PAGE_SIZE as u64);
        assert!(!wal.is_confirmed(TxnId::new(2)));
    }
}
