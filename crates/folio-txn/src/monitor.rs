//! Transaction monitor.
//!
//! Keeps the set of live transactions so that engine shutdown can flag
//! every one of them aborted, and counts how transactions end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use folio_common::TxnId;

#[derive(Debug)]
struct ActiveTransaction {
    started: Instant,
    aborted: Arc<AtomicBool>,
}

/// Counters kept by the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Transactions currently running.
    pub active: usize,
    /// Transactions begun since open.
    pub started: u64,
    /// Transactions committed.
    pub committed: u64,
    /// Transactions rolled back.
    pub rolled_back: u64,
    /// Transactions aborted by shutdown.
    pub aborted: u64,
}

/// Registry of live transactions.
#[derive(Debug, Default)]
pub struct TransactionMonitor {
    active: Mutex<HashMap<TxnId, ActiveTransaction>>,
    started: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    aborted: AtomicU64,
}

/// How a transaction left the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Committed.
    Committed,
    /// Rolled back by the caller or after an error.
    RolledBack,
    /// Torn down by shutdown.
    Aborted,
}

impl TransactionMonitor {
    /// Creates an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transaction and returns its abort flag.
    pub fn register(&self, txn_id: TxnId) -> Arc<AtomicBool> {
        let aborted = Arc::new(AtomicBool::new(false));
        self.active.lock().insert(
            txn_id,
            ActiveTransaction {
                started: Instant::now(),
                aborted: Arc::clone(&aborted),
            },
        );
        self.started.fetch_add(1, Ordering::Relaxed);
        aborted
    }

    /// Removes a finished transaction.
    pub fn unregister(&self, txn_id: TxnId, outcome: TransactionOutcome) {
        let entry = self.active.lock().remove(&txn_id);
        let counter = match outcome {
            TransactionOutcome::Committed => &self.committed,
            TransactionOutcome::RolledBack => &self.rolled_back,
            TransactionOutcome::Aborted => &self.aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = entry {
            debug!(
                txn_id = txn_id.as_u32(),
                ?outcome,
                elapsed_us = entry.started.elapsed().as_micros() as u64,
                "transaction finished"
            );
        }
    }

    /// Flags every live transaction aborted. Their next operation fails
    /// with [`folio_common::FolioError::TransactionAborted`]. Returns how
    /// many were flagged.
    pub fn abort_all(&self) -> usize {
        let active = self.active.lock();
        for entry in active.values() {
            entry.aborted.store(true, Ordering::Release);
        }
        if !active.is_empty() {
            warn!(count = active.len(), "aborting active transactions");
        }
        active.len()
    }

    /// Number of live transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Age of the oldest live transaction.
    #[must_use]
    pub fn oldest_active(&self) -> Option<Duration> {
        self.active
            .lock()
            .values()
            .map(|entry| entry.started.elapsed())
            .max()
    }

    /// Returns the counters.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            active: self.active_count(),
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_finish() {
        let monitor = TransactionMonitor::new();
        monitor.register(TxnId::new(1));
        monitor.register(TxnId::new(2));
        assert_eq!(monitor.active_count(), 2);
        assert!(monitor.oldest_active().is_some());

        monitor.unregister(TxnId::new(1), TransactionOutcome::Committed);
        monitor.unregister(TxnId::new(2), TransactionOutcome::RolledBack);

        let stats = monitor.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.started, 2);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.rolled_back, 1);
        assert!(monitor.oldest_active().is_none());
    }

    #[test]
    fn test_abort_all_sets_flags() {
        let monitor = TransactionMonitor::new();
        let first = monitor.register(TxnId::new(7));
        let second = monitor.register(TxnId::new(8));

        assert_eq!(monitor.abort_all(), 2);
        assert!(first.load(Ordering::Acquire));
        assert!(second.load(Ordering::Acquire));
    }
}
