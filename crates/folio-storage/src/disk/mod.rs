//! Disk access.
//!
//! ```text
//!   Snapshot ──► DiskReader ──► BufferPool ──► StreamPool (data | log)
//!                                   ▲
//!   Commit ──► DiskService::write_log_pages ──► DiskWriterQueue ──► log file
//! ```
//!
//! Reads always go through the cache. Writes only ever append to the log;
//! the data file changes during checkpoint and when a new file is
//! initialized.

mod queue;
mod reader;
mod service;

pub use queue::DiskWriterQueue;
pub use reader::DiskReader;
pub use service::DiskService;
