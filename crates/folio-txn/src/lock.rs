//! Lock service.
//!
//! Two kinds of locks protect the engine:
//! - The transaction gate. Every transaction holds it shared from begin to
//!   commit/rollback; checkpoint and shutdown take it exclusively, which
//!   waits for every transaction to leave and keeps new ones out.
//! - Collection reserved locks. The first write snapshot of a collection in
//!   a transaction reserves the collection until the transaction ends, so
//!   each collection has at most one writer while readers never block.
//!
//! # Compatibility
//!
//! ```text
//!                  │ gate shared │ gate exclusive │ reserved(c) │
//! ─────────────────┼─────────────┼────────────────┼─────────────┤
//!   gate shared    │      ✓      │       ✗        │      ✓      │
//!   gate exclusive │      ✗      │       ✗        │      -      │
//!   reserved(c)    │      ✓      │       -        │      ✗      │
//! ```
//!
//! A waiting exclusive request holds back new shared entries. Every wait is
//! bounded by the configured timeout and fails with
//! [`FolioError::LockTimeout`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use folio_common::{FolioError, FolioResult, TxnId};

/// Access mode of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Reads at a fixed version; never blocks.
    Read,
    /// Reserves the collection and reads the latest version.
    Write,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Statistics about the lock service.
#[derive(Debug, Default)]
pub struct LockStats {
    /// Transactions admitted through the gate.
    pub transactions: AtomicU64,
    /// Exclusive gate acquisitions.
    pub exclusive: AtomicU64,
    /// Collection reservations granted.
    pub reservations: AtomicU64,
    /// Acquisitions that had to wait.
    pub waits: AtomicU64,
    /// Acquisitions that timed out.
    pub timeouts: AtomicU64,
}

impl LockStats {
    fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct GateState {
    transactions: usize,
    exclusive: bool,
    exclusive_waiters: usize,
}

/// The lock service of one engine.
#[derive(Debug)]
pub struct LockService {
    timeout: Duration,
    gate: Mutex<GateState>,
    gate_changed: Condvar,
    /// Lowercase collection name to the transaction reserving it.
    collections: Mutex<HashMap<String, TxnId>>,
    collection_released: Condvar,
    stats: LockStats,
}

impl LockService {
    /// Creates a lock service whose waits give up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            gate: Mutex::new(GateState::default()),
            gate_changed: Condvar::new(),
            collections: Mutex::new(HashMap::new()),
            collection_released: Condvar::new(),
            stats: LockStats::default(),
        }
    }

    /// Configured wait timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the lock statistics.
    #[must_use]
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    fn timed_out(&self, resource: impl Into<String>) -> FolioError {
        LockStats::record(&self.stats.timeouts);
        FolioError::LockTimeout {
            resource: resource.into(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    // ------------------------------------------------------------------
    // Transaction gate
    // ------------------------------------------------------------------

    /// Enters the gate in shared mode for a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::LockTimeout`] when the gate stays exclusive
    /// for longer than the timeout.
    pub fn enter_transaction(&self) -> FolioResult<()> {
        let deadline = Instant::now() + self.timeout;
        let mut gate = self.gate.lock();
        if gate.exclusive || gate.exclusive_waiters > 0 {
            LockStats::record(&self.stats.waits);
        }
        while gate.exclusive || gate.exclusive_waiters > 0 {
            if self.gate_changed.wait_until(&mut gate, deadline).timed_out()
                && (gate.exclusive || gate.exclusive_waiters > 0)
            {
                return Err(self.timed_out("transaction gate"));
            }
        }
        gate.transactions += 1;
        LockStats::record(&self.stats.transactions);
        Ok(())
    }

    /// Leaves the gate. Called once per successful
    /// [`LockService::enter_transaction`].
    pub fn exit_transaction(&self) {
        let mut gate = self.gate.lock();
        gate.transactions = gate.transactions.saturating_sub(1);
        if gate.transactions == 0 {
            self.gate_changed.notify_all();
        }
    }

    /// Number of transactions inside the gate.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.gate.lock().transactions
    }

    /// Takes the gate exclusively, waiting for every transaction to leave.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::LockTimeout`] when transactions are still
    /// active after the timeout.
    pub fn enter_exclusive(&self) -> FolioResult<ExclusiveGuard<'_>> {
        let deadline = Instant::now() + self.timeout;
        let mut gate = self.gate.lock();
        gate.exclusive_waiters += 1;
        if gate.exclusive || gate.transactions > 0 {
            LockStats::record(&self.stats.waits);
        }
        while gate.exclusive || gate.transactions > 0 {
            if self.gate_changed.wait_until(&mut gate, deadline).timed_out()
                && (gate.exclusive || gate.transactions > 0)
            {
                gate.exclusive_waiters -= 1;
                self.gate_changed.notify_all();
                return Err(self.timed_out("exclusive gate"));
            }
        }
        gate.exclusive_waiters -= 1;
        gate.exclusive = true;
        LockStats::record(&self.stats.exclusive);
        debug!("entered exclusive mode");
        Ok(ExclusiveGuard { locks: self })
    }

    /// Takes the gate exclusively only if nothing else holds it.
    #[must_use]
    pub fn try_enter_exclusive(&self) -> Option<ExclusiveGuard<'_>> {
        let mut gate = self.gate.lock();
        if gate.exclusive || gate.transactions > 0 {
            return None;
        }
        gate.exclusive = true;
        LockStats::record(&self.stats.exclusive);
        Some(ExclusiveGuard { locks: self })
    }

    fn exit_exclusive(&self) {
        let mut gate = self.gate.lock();
        gate.exclusive = false;
        self.gate_changed.notify_all();
        debug!("left exclusive mode");
    }

    // ------------------------------------------------------------------
    // Collection reserved locks
    // ------------------------------------------------------------------

    /// Reserves `collection` for `txn_id`. Re-entrant for the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::LockTimeout`] when another transaction keeps
    /// the collection for longer than the timeout.
    pub fn enter_collection(&self, collection: &str, txn_id: TxnId) -> FolioResult<()> {
        let key = collection.to_lowercase();
        let deadline = Instant::now() + self.timeout;
        let mut reserved = self.collections.lock();
        let mut waited = false;

        loop {
            match reserved.get(&key) {
                None => break,
                Some(owner) if *owner == txn_id => return Ok(()),
                Some(_) => {}
            }
            if !waited {
                waited = true;
                LockStats::record(&self.stats.waits);
            }
            if self
                .collection_released
                .wait_until(&mut reserved, deadline)
                .timed_out()
                && reserved.get(&key).is_some_and(|owner| *owner != txn_id)
            {
                return Err(self.timed_out(format!("collection '{collection}'")));
            }
        }

        reserved.insert(key, txn_id);
        LockStats::record(&self.stats.reservations);
        trace!(collection, txn_id = txn_id.as_u32(), "collection reserved");
        Ok(())
    }

    /// Releases the reservation of `collection` held by `txn_id`.
    pub fn exit_collection(&self, collection: &str, txn_id: TxnId) {
        let key = collection.to_lowercase();
        let mut reserved = self.collections.lock();
        if reserved.get(&key) == Some(&txn_id) {
            reserved.remove(&key);
            self.collection_released.notify_all();
            trace!(collection, txn_id = txn_id.as_u32(), "collection released");
        }
    }

    /// Transaction currently reserving `collection`.
    #[must_use]
    pub fn collection_owner(&self, collection: &str) -> Option<TxnId> {
        self.collections.lock().get(&collection.to_lowercase()).copied()
    }
}

/// Holds the gate exclusively until dropped.
#[derive(Debug)]
pub struct ExclusiveGuard<'a> {
    locks: &'a LockService,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.locks.exit_exclusive();
    }
}
