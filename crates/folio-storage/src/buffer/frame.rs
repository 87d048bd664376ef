//! Page buffers and cached frames.
//!
//! A [`PageBuffer`] is either:
//!
//! - **shared**: a handle on a [`Frame`] published in the buffer pool. The
//!   frame's bytes never change after publication; every live handle holds
//!   one share, released when the handle is dropped.
//! - **exclusive**: a private allocation owned by exactly one holder, the
//!   only kind that may be mutated.
//!
//! The tag is checked whenever mutable access is requested, so a writer can
//! never modify bytes other readers are looking at.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use folio_common::{FileOrigin, FolioError, FolioResult, PageId, PAGE_SIZE};

/// Position of a buffer that is not yet placed in any file.
pub const NO_POSITION: u64 = u64::MAX;

/// A published, read-only page held by the buffer pool.
pub(crate) struct Frame {
    data: Box<[u8]>,
    origin: FileOrigin,
    position: u64,
    shares: AtomicU32,
    last_access: AtomicU64,
}

impl Frame {
    pub(crate) fn new(data: Box<[u8]>, origin: FileOrigin, position: u64, tick: u64) -> Self {
        Self {
            data,
            origin,
            position,
            shares: AtomicU32::new(0),
            last_access: AtomicU64::new(tick),
        }
    }

    #[inline]
    pub(crate) fn share_count(&self) -> u32 {
        self.shares.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn into_data(self) -> Box<[u8]> {
        self.data
    }

    /// Creates a new shared handle. Callers must hold the pool's map lock so
    /// eviction cannot observe a zero share count in between.
    pub(crate) fn acquire(self: &Arc<Self>) -> PageBuffer {
        self.shares.fetch_add(1, Ordering::AcqRel);
        PageBuffer {
            origin: Some(self.origin),
            position: self.position,
            kind: BufferKind::Shared(Arc::clone(self)),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("origin", &self.origin)
            .field("position", &self.position)
            .field("shares", &self.share_count())
            .finish()
    }
}

enum BufferKind {
    Shared(Arc<Frame>),
    Exclusive(Box<[u8]>),
}

/// In-memory bytes backing one page.
pub struct PageBuffer {
    origin: Option<FileOrigin>,
    position: u64,
    kind: BufferKind,
}

impl PageBuffer {
    /// Creates an exclusive buffer over `data`, which must be one page long.
    pub(crate) fn exclusive(data: Box<[u8]>, origin: Option<FileOrigin>, position: u64) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            origin,
            position,
            kind: BufferKind::Exclusive(data),
        }
    }

    /// Creates a zeroed exclusive buffer with no position. Mostly useful in
    /// tests; engine code obtains buffers from the pool.
    #[must_use]
    pub fn zeroed() -> Self {
        Self::exclusive(vec![0u8; PAGE_SIZE].into_boxed_slice(), None, NO_POSITION)
    }

    /// File this buffer was read from or published to.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> Option<FileOrigin> {
        self.origin
    }

    /// Byte position inside its file, or [`NO_POSITION`].
    #[inline]
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Places an exclusive buffer at a file position.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] for shared buffers and
    /// [`FolioError::InvalidPosition`] for misaligned positions.
    pub fn set_position(&mut self, origin: FileOrigin, position: u64) -> FolioResult<()> {
        if self.is_shared() {
            return Err(self.read_only_error());
        }
        if position % PAGE_SIZE as u64 != 0 {
            return Err(FolioError::InvalidPosition { position });
        }
        self.origin = Some(origin);
        self.position = position;
        Ok(())
    }

    /// Returns true for shared (read-only) buffers.
    #[inline]
    #[must_use]
    pub fn is_shared(&self) -> bool {
        matches!(self.kind, BufferKind::Shared(_))
    }

    /// Number of live shares of the underlying frame (0 for exclusive).
    #[must_use]
    pub fn share_count(&self) -> u32 {
        match &self.kind {
            BufferKind::Shared(frame) => frame.share_count(),
            BufferKind::Exclusive(_) => 0,
        }
    }

    /// Read access to the page bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.kind {
            BufferKind::Shared(frame) => frame.data(),
            BufferKind::Exclusive(data) => data,
        }
    }

    /// Write access to the page bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] when the buffer is shared.
    #[inline]
    pub fn as_mut_slice(&mut self) -> FolioResult<&mut [u8]> {
        if self.is_shared() {
            return Err(self.read_only_error());
        }
        match &mut self.kind {
            BufferKind::Exclusive(data) => Ok(data),
            BufferKind::Shared(_) => Err(FolioError::internal("buffer changed kind")),
        }
    }

    /// Another shared handle on the same frame, or `None` for exclusive
    /// buffers.
    #[must_use]
    pub fn share(&self) -> Option<Self> {
        match &self.kind {
            BufferKind::Shared(frame) => Some(frame.acquire()),
            BufferKind::Exclusive(_) => None,
        }
    }

    /// Private writable copy of this buffer's bytes.
    #[must_use]
    pub fn to_exclusive(&self) -> Self {
        Self::exclusive(
            self.as_slice().to_vec().into_boxed_slice(),
            self.origin,
            self.position,
        )
    }

    /// Takes the allocation out of an exclusive buffer.
    pub(crate) fn into_exclusive_data(mut self) -> Result<Box<[u8]>, Self> {
        if let BufferKind::Exclusive(data) = &mut self.kind {
            return Ok(std::mem::take(data));
        }
        Err(self)
    }

    fn read_only_error(&self) -> FolioError {
        let data = self.as_slice();
        FolioError::ReadOnlyPage {
            page_id: PageId::from_le_bytes([data[0], data[1], data[2], data[3]]),
        }
    }
}

impl Drop for PageBuffer {
    fn drop(&mut self) {
        if let BufferKind::Shared(frame) = &self.kind {
            frame.shares.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl fmt::Debug for PageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBuffer")
            .field("origin", &self.origin)
            .field("position", &self.position)
            .field("shared", &self.is_shared())
            .field("shares", &self.share_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Arc<Frame> {
        let mut data = vec![0u8; PAGE_SIZE].into_boxed_slice();
        data[0] = 9;
        Arc::new(Frame::new(data, FileOrigin::Log, 0, 0))
    }

    #[test]
    fn test_exclusive_is_writable() {
        let mut buffer = PageBuffer::zeroed();
        assert!(!buffer.is_shared());
        buffer.as_mut_slice().unwrap()[10] = 1;
        assert_eq!(buffer.as_slice()[10], 1);
        assert_eq!(buffer.position(), NO_POSITION);
    }

    #[test]
    fn test_shared_is_read_only() {
        let frame = frame();
        let mut buffer = frame.acquire();
        assert!(buffer.is_shared());
        assert_eq!(frame.share_count(), 1);

        let err = buffer.as_mut_slice().unwrap_err();
        assert!(matches!(err, FolioError::ReadOnlyPage { page_id } if page_id == PageId::new(9)));
    }

    #[test]
    fn test_share_counting() {
        let frame = frame();
        let first = frame.acquire();
        let second = first.share().unwrap();
        assert_eq!(frame.share_count(), 2);

        drop(first);
        assert_eq!(frame.share_count(), 1);
        drop(second);
        assert_eq!(frame.share_count(), 0);
    }

    #[test]
    fn test_to_exclusive_copies() {
        let frame = frame();
        let shared = frame.acquire();
        let mut copy = shared.to_exclusive();
        copy.as_mut_slice().unwrap()[0] = 1;
        assert_eq!(shared.as_slice()[0], 9);
        assert_eq!(copy.origin(), Some(FileOrigin::Log));
    }

    #[test]
    fn test_set_position_alignment() {
        let mut buffer = PageBuffer::zeroed();
        assert!(buffer.set_position(FileOrigin::Log, 8192).is_ok());
        assert!(matches!(
            buffer.set_position(FileOrigin::Log, 100),
            Err(FolioError::InvalidPosition { position: 100 })
        ));
    }

    #[test]
    fn test_into_exclusive_data() {
        let buffer = PageBuffer::zeroed();
        assert!(buffer.into_exclusive_data().is_ok());

        let frame = frame();
        let shared = frame.acquire();
        let back = shared.into_exclusive_data().unwrap_err();
        assert_eq!(frame.share_count(), 1);
        drop(back);
        assert_eq!(frame.share_count(), 0);
    }
}
