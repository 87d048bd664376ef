//! Operating system file streams.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use folio_common::FolioResult;

use super::{Stream, StreamFactory};

/// A file stream.
///
/// The file is wrapped in a mutex so seek and read/write happen as one
/// step.
pub struct FileStream {
    file: Mutex<File>,
    path: PathBuf,
}

impl FileStream {
    /// Opens `path` for reading and writing, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns [`folio_common::FolioError::Io`] when the file cannot be
    /// opened.
    pub fn open(path: impl AsRef<Path>) -> FolioResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Stream for FileStream {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> FolioResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < buf.len() {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf[total..].fill(0);
        Ok(())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> FolioResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn len(&self) -> FolioResult<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn set_len(&self, len: u64) -> FolioResult<()> {
        self.file.lock().set_len(len)?;
        Ok(())
    }

    fn sync(&self) -> FolioResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream").field("path", &self.path).finish()
    }
}

/// Opens [`FileStream`]s over one path.
#[derive(Debug, Clone)]
pub struct FileStreamFactory {
    path: PathBuf,
}

impl FileStreamFactory {
    /// Creates a factory for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StreamFactory for FileStreamFactory {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn open(&self) -> FolioResult<Arc<dyn Stream>> {
        Ok(Arc::new(FileStream::open(&self.path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FileStreamFactory::new(dir.path().join("data.db"));
        assert!(!factory.exists());

        let stream = factory.open().unwrap();
        assert!(factory.exists());
        stream.write_at(b"folio", 100).unwrap();
        assert_eq!(stream.len().unwrap(), 105);

        let reader = factory.open().unwrap();
        let mut buf = [0u8; 5];
        reader.read_at(&mut buf, 100).unwrap();
        assert_eq!(&buf, b"folio");
    }

    #[test]
    fn test_read_past_end_is_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let stream = FileStream::open(dir.path().join("short.db")).unwrap();
        stream.write_at(&[7u8; 4], 0).unwrap();

        let mut buf = [1u8; 8];
        stream.read_at(&mut buf, 2).unwrap();
        assert_eq!(buf, [7, 7, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_set_len_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let stream = FileStream::open(dir.path().join("log.db")).unwrap();
        stream.write_at(&[1u8; 64], 0).unwrap();
        stream.set_len(0).unwrap();
        stream.sync().unwrap();
        assert!(stream.is_empty().unwrap());
    }
}
