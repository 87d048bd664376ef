//! # folio-engine
//!
//! Embedded document storage engine for Folio.
//!
//! This crate provides:
//! - The [`Engine`]: opens the data file and its log, restores the WAL
//!   index, checkpoints and closes
//! - [`Session`]: explicit and auto transactions plus the document and
//!   index operations
//! - The [`IndexService`]: skip-list indexes stored in index pages
//! - The [`DataService`]: documents stored as chains of data blocks
//! - [`Cursor`]: lazy index scans
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Session                              │
//! │   insert / update / upsert / delete / find / query / count   │
//! └───────────────┬──────────────────────────────┬──────────────┘
//!                 │                              │
//!        ┌────────▼────────┐            ┌────────▼────────┐
//!        │  IndexService   │            │   DataService   │
//!        │  (skip lists)   │            │ (block chains)  │
//!        └────────┬────────┘            └────────┬────────┘
//!                 └──────────────┬───────────────┘
//!                       ┌────────▼────────┐
//!                       │ Transaction /   │
//!                       │ Snapshot        │   folio-txn
//!                       └────────┬────────┘
//!                       ┌────────▼────────┐
//!                       │ WAL index, log, │   folio-wal
//!                       │ data file       │   folio-storage
//!                       └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use folio_common::{EngineConfig, IndexKey};
//! use folio_engine::Engine;
//!
//! let engine = Engine::open(EngineConfig::in_memory()).unwrap();
//! let session = engine.session();
//!
//! session.insert("users", IndexKey::from(1i64), b"alice").unwrap();
//! let doc = session.find_by_id("users", &IndexKey::from(1i64)).unwrap();
//! assert_eq!(doc.as_deref(), Some(&b"alice"[..]));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod data;
pub mod engine;
pub mod index;
pub mod keys;
mod ops;
pub mod session;

pub use cursor::{Cursor, KeyRange, Query};
pub use data::{DataReader, DataService};
pub use engine::{Engine, EngineBuilder, EngineStats};
pub use index::IndexService;
pub use keys::KeyExtractor;
pub use session::{Session, SessionId};
