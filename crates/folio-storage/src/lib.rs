//! # folio-storage
//!
//! Page storage layer for Folio.
//!
//! This crate owns everything between the transaction machinery and the
//! operating system:
//! - On-disk page layouts: slotted base pages, the header page, collection
//!   pages, skip-list index nodes and data blocks
//! - A buffer pool of shared (read-only) and exclusive (writable) page
//!   buffers
//! - Stream abstractions over files and memory, with pooled read handles
//! - The disk reader and the single-threaded, ordered log writer queue

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Page layouts and on-disk format
pub mod page;

/// Buffer pool and page buffers
pub mod buffer;

/// File and memory streams
pub mod stream;

/// Disk reader, writer queue and disk service
pub mod disk;

pub use buffer::{BufferPool, BufferPoolStats, PageBuffer};
pub use disk::{DiskReader, DiskService, DiskWriterQueue};
pub use page::{
    BasePage, CollectionIndex, CollectionPage, DataBlock, FreeListKind, HeaderPage,
    HeaderSavepoint, IndexNode, PageType,
};
pub use stream::{FileStreamFactory, MemoryStreamFactory, Stream, StreamFactory, StreamPool};
