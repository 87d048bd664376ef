//! Error handling for Folio.
//!
//! This module provides a unified error type and result alias used
//! across all Folio components.

mod engine;

pub use engine::{ErrorCode, FolioError};

/// Result type alias for Folio operations.
pub type FolioResult<T> = std::result::Result<T, FolioError>;
