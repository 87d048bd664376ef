//! # folio-txn
//!
//! Transactions and snapshots for Folio.
//!
//! This crate provides:
//! - The [`LockService`]: a shared/exclusive gate between transactions and
//!   checkpoints, plus one write reservation per collection
//! - [`Transaction`]: begin, safepoint, commit and rollback
//! - [`Snapshot`]: one transaction's view of one collection, with page
//!   allocation and the collection's free lists
//! - The [`TransactionMonitor`]: live transactions and their outcomes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Transaction                           │
//! │  ┌───────────────┐  ┌───────────────┐  ┌─────────────────┐  │
//! │  │ Snapshot (r)  │  │ Snapshot (w)  │  │TransactionPages │  │
//! │  │  "orders"     │  │  "users"      │  │ new / deleted / │  │
//! │  └───────┬───────┘  └───────┬───────┘  │ dirty / actions │  │
//! │          │                  │          └─────────────────┘  │
//! └──────────┼──────────────────┼───────────────────────────────┘
//!            ▼                  ▼
//!   ┌───────────────────────────────────────────────────────┐
//!   │ StorageContext: DiskService, WalIndex, LockService,   │
//!   │                 HeaderPage, TransactionMonitor        │
//!   └───────────────────────────────────────────────────────┘
//! ```
//!
//! Readers never block writers: a read snapshot pins the WAL read version
//! current when it opened and keeps seeing that version until it ends.
//! Writers on the same collection are serialized by the collection
//! reservation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod lock;
pub mod manager;
pub mod monitor;
pub mod pages;
pub mod snapshot;

pub use context::StorageContext;
pub use lock::{ExclusiveGuard, LockMode, LockService, LockStats};
pub use manager::{Transaction, TransactionState};
pub use monitor::{MonitorStats, TransactionMonitor, TransactionOutcome};
pub use pages::{CommitAction, TransactionPages};
pub use snapshot::Snapshot;
