//! Type definitions for Folio.
//!
//! This module contains the identifiers and values shared across crates.

mod address;
mod ids;
mod key;
mod order;

pub use address::{FileOrigin, PageAddress, PagePosition};
pub use ids::{PageId, TxnId};
pub use key::IndexKey;
pub use order::Order;
