//! Positional byte streams over files and memory.
//!
//! All operations are position-based (pread/pwrite style), so a stream can
//! be shared between threads. The engine opens two stream families, one for
//! the data file and one for the log file, each through a
//! [`StreamFactory`]:
//!
//! - [`FileStreamFactory`] opens operating system files
//! - [`MemoryStreamFactory`] keeps the bytes in a shared vector, used for
//!   in-memory engines and tests
//!
//! A [`StreamPool`] owns the single writer stream of a file and rents
//! reader streams to disk readers.

mod file;
mod memory;
mod pool;

use std::sync::Arc;

use folio_common::FolioResult;

pub use file::{FileStream, FileStreamFactory};
pub use memory::{MemoryStream, MemoryStreamFactory};
pub use pool::StreamPool;

/// A positional byte stream.
pub trait Stream: Send + Sync {
    /// Reads `buf.len()` bytes at `offset`. Bytes past the end of the
    /// stream read as zeros.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::Io`] on I/O failure.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> FolioResult<()>;

    /// Writes all of `buf` at `offset`, extending the stream if needed.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::Io`] on I/O failure.
    fn write_at(&self, buf: &[u8], offset: u64) -> FolioResult<()>;

    /// Current length in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::Io`] on I/O failure.
    fn len(&self) -> FolioResult<u64>;

    /// Returns true when the stream holds no bytes.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::Io`] on I/O failure.
    fn is_empty(&self) -> FolioResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncates or extends the stream.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::Io`] on I/O failure.
    fn set_len(&self, len: u64) -> FolioResult<()>;

    /// Flushes written bytes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::Io`] on I/O failure.
    fn sync(&self) -> FolioResult<()>;
}

/// Opens streams over one logical file.
pub trait StreamFactory: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Returns true if the underlying file already exists.
    fn exists(&self) -> bool;

    /// Opens a new stream, creating the file if needed.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::Io`] when the file cannot be
    /// opened.
    fn open(&self) -> FolioResult<Arc<dyn Stream>>;
}
