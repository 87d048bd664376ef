//! # folio-wal
//!
//! Write-ahead log bookkeeping for Folio.
//!
//! The log file itself is an append-only sequence of full pages written by
//! the disk writer queue in `folio-storage`. This crate decides which of
//! those pages are visible:
//! - The [`WalIndex`] maps each page id to its confirmed log versions
//! - [`restore_index`] rebuilds the index from the log on open
//! - [`CheckpointManager`] folds confirmed pages back into the data file
//!
//! # Page visibility
//!
//! ```text
//!   log:  [p1 t1] [p2 t1*] [p1 t2] [p3 t3] [p1 t3*]
//!                     │                        │
//!                 version 1                version 2
//!
//!   read version 1: p1 -> log 0, p2 -> log 8192, p3 -> data file
//!   read version 2: p1 -> log 32768, p3 -> log 24576
//! ```
//!
//! `*` marks the confirmed page that closes a transaction. Pages of a
//! transaction whose confirmed page never reached the log (t2 above) are
//! never visible.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Versioned page index.
pub mod index;

/// Index restore from the log.
pub mod restore;

/// Checkpoint management.
pub mod checkpoint;

pub use checkpoint::{CheckpointInfo, CheckpointManager};
pub use index::{WalIndex, WalIndexStats, LATEST_VERSION};
pub use restore::{restore_index, RestoreInfo};
