//! In-memory streams.

use std::sync::Arc;

use parking_lot::RwLock;

use folio_common::FolioResult;

use super::{Stream, StreamFactory};

/// A stream over a shared, growable byte vector.
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl Stream for MemoryStream {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> FolioResult<()> {
        let bytes = self.bytes.read();
        let start = (offset as usize).min(bytes.len());
        let end = (start + buf.len()).min(bytes.len());
        let n = end - start;
        buf[..n].copy_from_slice(&bytes[start..end]);
        buf[n..].fill(0);
        Ok(())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> FolioResult<()> {
        let mut bytes = self.bytes.write();
        let start = offset as usize;
        let end = start + buf.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> FolioResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn set_len(&self, len: u64) -> FolioResult<()> {
        self.bytes.write().resize(len as usize, 0);
        Ok(())
    }

    fn sync(&self) -> FolioResult<()> {
        Ok(())
    }
}

/// Hands out [`MemoryStream`]s sharing one byte vector. Cloning the factory
/// shares the bytes too, so an engine can be reopened over the same memory.
#[derive(Debug, Clone)]
pub struct MemoryStreamFactory {
    name: String,
    stream: MemoryStream,
}

impl MemoryStreamFactory {
    /// Creates an empty in-memory file.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream: MemoryStream::default(),
        }
    }

    /// Copy of the current bytes.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.stream.bytes.read().clone()
    }
}

impl StreamFactory for MemoryStreamFactory {
    fn name(&self) -> String {
        format!(":memory:{}", self.name)
    }

    fn exists(&self) -> bool {
        !self.stream.bytes.read().is_empty()
    }

    fn open(&self) -> FolioResult<Arc<dyn Stream>> {
        Ok(Arc::new(self.stream.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_share_bytes() {
        let factory = MemoryStreamFactory::new("data");
        assert!(!factory.exists());

        let writer = factory.open().unwrap();
        let reader = factory.clone().open().unwrap();
        writer.write_at(b"abc", 2).unwrap();

        let mut buf = [9u8; 6];
        reader.read_at(&mut buf, 0).unwrap();
        assert_eq!(buf, [0, 0, b'a', b'b', b'c', 0]);
        assert!(factory.exists());
    }

    #[test]
    fn test_set_len() {
        let factory = MemoryStreamFactory::new("log");
        let stream = factory.open().unwrap();
        stream.write_at(&[1u8; 16], 0).unwrap();
        stream.set_len(4).unwrap();
        assert_eq!(stream.len().unwrap(), 4);
        assert_eq!(factory.to_vec(), vec![1u8; 4]);
    }
}
