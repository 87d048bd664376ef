//! Engine error types.
//!
//! Provides the error type shared by every Folio component.

use std::fmt;
use thiserror::Error;

use crate::types::{PageId, TxnId};

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation not supported.
    NotSupported = 0x0002,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// Operation was cancelled.
    Cancelled = 0x0005,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Data corruption detected.
    Corruption = 0x0104,

    // Contract violations (0x0200 - 0x02FF)
    /// Page position not aligned to the page size.
    InvalidPosition = 0x0200,
    /// Attempt to mutate a shared page buffer.
    ReadOnlyPage = 0x0201,
    /// Operation on a committed, rolled back or aborted transaction.
    TransactionClosed = 0x0202,
    /// Page read with an unexpected page type.
    PageTypeMismatch = 0x0203,

    // Data errors (0x0300 - 0x03FF)
    /// Document exceeds the maximum size.
    DocumentTooLarge = 0x0300,
    /// Index key exceeds the maximum length.
    IndexKeyTooLong = 0x0301,
    /// Index key is not allowed.
    InvalidIndexKey = 0x0302,
    /// Duplicate key in a unique index.
    DuplicateKey = 0x0303,
    /// Index does not exist.
    IndexNotFound = 0x0304,
    /// Index already exists with another definition.
    IndexAlreadyExists = 0x0305,
    /// Collection page has no room for another index.
    CollectionFull = 0x0306,
    /// Header page has no room for another collection.
    HeaderFull = 0x0307,
    /// Collection or index name is not valid.
    InvalidName = 0x0308,

    // Transaction errors (0x0400 - 0x04FF)
    /// Lock acquisition timed out.
    LockTimeout = 0x0400,
    /// Cursors are still open on the session.
    OpenCursors = 0x0401,
    /// Transaction was aborted by engine shutdown.
    TransactionAborted = 0x0402,

    // Engine errors (0x0500 - 0x05FF)
    /// Engine hit a fatal failure and rejects all work.
    EngineUnusable = 0x0500,
    /// Engine was closed.
    EngineClosed = 0x0501,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Contract",
            0x03 => "Data",
            0x04 => "Transaction",
            0x05 => "Engine",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Folio.
///
/// # Example
///
/// ```rust
/// use folio_common::error::{FolioError, FolioResult};
///
/// fn check(size: usize) -> FolioResult<()> {
///     Err(FolioError::DocumentTooLarge { size, max_size: 1024 })
/// }
/// assert!(check(4096).is_err());
/// ```
#[derive(Debug, Error)]
pub enum FolioError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Operation not supported.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Operation was cancelled.
    #[error("operation was cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Page checksum mismatch.
    #[error("page {page_id} checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// The page whose checksum failed.
        page_id: PageId,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    // ==========================================================================
    // Contract Violations
    // ==========================================================================
    /// Position not aligned to the page size.
    #[error("position {position} is not aligned to the page size")]
    InvalidPosition {
        /// The misaligned position.
        position: u64,
    },

    /// Mutable access requested on a shared page buffer.
    #[error("page {page_id} is shared and cannot be modified")]
    ReadOnlyPage {
        /// The page.
        page_id: PageId,
    },

    /// Transaction already finished.
    #[error("transaction {txn_id} is already {state}")]
    TransactionClosed {
        /// The transaction.
        txn_id: TxnId,
        /// Its terminal state.
        state: String,
    },

    /// Page read with an unexpected type.
    #[error("page {page_id} has type {actual}, expected {expected}")]
    PageTypeMismatch {
        /// The page.
        page_id: PageId,
        /// Expected type.
        expected: String,
        /// Actual type.
        actual: String,
    },

    // ==========================================================================
    // Data Errors
    // ==========================================================================
    /// Document exceeds the maximum size.
    #[error("document size {size} exceeds maximum {max_size}")]
    DocumentTooLarge {
        /// Document size.
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// Index key exceeds the maximum encoded length.
    #[error("index key size {size} exceeds maximum {max_size}")]
    IndexKeyTooLong {
        /// Encoded key size.
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// Index key is reserved or otherwise not allowed.
    #[error("invalid index key: {message}")]
    InvalidIndexKey {
        /// Error message.
        message: String,
    },

    /// Duplicate key in a unique index.
    #[error("duplicate key {key} in unique index '{index}'")]
    DuplicateKey {
        /// Index name.
        index: String,
        /// Display form of the key.
        key: String,
    },

    /// Index does not exist.
    #[error("index '{index}' not found in collection '{collection}'")]
    IndexNotFound {
        /// Collection name.
        collection: String,
        /// Index name.
        index: String,
    },

    /// Index exists with another definition.
    #[error("index '{index}' already exists in collection '{collection}' with another definition")]
    IndexAlreadyExists {
        /// Collection name.
        collection: String,
        /// Index name.
        index: String,
    },

    /// No room left in the collection page.
    #[error("collection '{collection}' has no room for another index")]
    CollectionFull {
        /// Collection name.
        collection: String,
    },

    /// No room left in the header page.
    #[error("header page has no room for collection '{collection}'")]
    HeaderFull {
        /// Collection name.
        collection: String,
    },

    /// Invalid collection or index name.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// Lock acquisition timed out.
    #[error("timed out after {timeout_ms}ms waiting for lock on {resource}")]
    LockTimeout {
        /// The locked resource.
        resource: String,
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Cursors are still open on the session.
    #[error("{count} cursor(s) still open on this session")]
    OpenCursors {
        /// Open cursor count.
        count: usize,
    },

    /// Transaction was aborted by engine shutdown.
    #[error("transaction {txn_id} was aborted")]
    TransactionAborted {
        /// The transaction.
        txn_id: TxnId,
    },

    // ==========================================================================
    // Engine Errors
    // ==========================================================================
    /// Engine hit a fatal failure.
    #[error("engine is unusable: {reason}")]
    EngineUnusable {
        /// The first fatal failure.
        reason: String,
    },

    /// Engine was closed.
    #[error("engine is closed")]
    EngineClosed,
}

impl FolioError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::NotSupported { .. } => ErrorCode::NotSupported,
            Self::InvalidArgument { .. } | Self::InvalidConfig { .. } => {
                ErrorCode::InvalidArgument
            }
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Io { .. } => ErrorCode::Io,
            Self::Corruption { .. } | Self::ChecksumMismatch { .. } => ErrorCode::Corruption,
            Self::InvalidPosition { .. } => ErrorCode::InvalidPosition,
            Self::ReadOnlyPage { .. } => ErrorCode::ReadOnlyPage,
            Self::TransactionClosed { .. } => ErrorCode::TransactionClosed,
            Self::PageTypeMismatch { .. } => ErrorCode::PageTypeMismatch,
            Self::DocumentTooLarge { .. } => ErrorCode::DocumentTooLarge,
            Self::IndexKeyTooLong { .. } => ErrorCode::IndexKeyTooLong,
            Self::InvalidIndexKey { .. } => ErrorCode::InvalidIndexKey,
            Self::DuplicateKey { .. } => ErrorCode::DuplicateKey,
            Self::IndexNotFound { .. } => ErrorCode::IndexNotFound,
            Self::IndexAlreadyExists { .. } => ErrorCode::IndexAlreadyExists,
            Self::CollectionFull { .. } => ErrorCode::CollectionFull,
            Self::HeaderFull { .. } => ErrorCode::HeaderFull,
            Self::InvalidName { .. } => ErrorCode::InvalidName,
            Self::LockTimeout { .. } => ErrorCode::LockTimeout,
            Self::OpenCursors { .. } => ErrorCode::OpenCursors,
            Self::TransactionAborted { .. } => ErrorCode::TransactionAborted,
            Self::EngineUnusable { .. } => ErrorCode::EngineUnusable,
            Self::EngineClosed => ErrorCode::EngineClosed,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Returns true for programming-contract violations.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPosition { .. }
                | Self::ReadOnlyPage { .. }
                | Self::TransactionClosed { .. }
                | Self::PageTypeMismatch { .. }
        )
    }

    /// Returns true if the engine cannot continue after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Corruption { .. }
                | Self::ChecksumMismatch { .. }
                | Self::EngineUnusable { .. }
        )
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }
}
