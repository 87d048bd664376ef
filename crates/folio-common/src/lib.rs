//! # folio-common
//!
//! Common types, errors, and configuration for Folio.
//!
//! This crate provides the foundational types shared by every Folio
//! component:
//!
//! - **Types**: page identifiers, transaction identifiers, page addresses,
//!   file origins and the ordered [`IndexKey`]
//! - **Errors**: unified error handling with [`FolioError`]
//! - **Config**: the [`EngineConfig`] structure
//! - **Constants**: on-disk layout sizes and engine limits
//! - **State**: the engine-wide usability flag shared by all services
//!
//! ## Example
//!
//! ```rust
//! use folio_common::types::{PageAddress, PageId, TxnId};
//! use folio_common::error::FolioResult;
//!
//! fn example() -> FolioResult<()> {
//!     let page_id = PageId::new(42);
//!     let txn_id = TxnId::new(1);
//!     let address = PageAddress::new(page_id, 3);
//!     assert!(!address.is_empty());
//!     assert!(txn_id.is_valid());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod config;
pub mod constants;
pub mod error;
pub mod state;
pub mod types;

// Re-export commonly used items at the crate root
pub use cancel::CancellationToken;
pub use config::EngineConfig;
pub use constants::*;
pub use error::{ErrorCode, FolioError, FolioResult};
pub use state::EngineState;
pub use types::{FileOrigin, IndexKey, Order, PageAddress, PageId, PagePosition, TxnId};
