//! Buffer pool implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use folio_common::{FileOrigin, FolioError, FolioResult, PAGE_SIZE};

use super::frame::{Frame, PageBuffer, NO_POSITION};
use super::BufferPoolStats;

/// Maximum number of recycled allocations kept for reuse.
const MAX_FREE_BUFFERS: usize = 256;

type FrameKey = (FileOrigin, u64);

/// Cache of page buffers keyed by (file origin, position).
///
/// Readable pages are published as shared [`Frame`]s; writable pages are
/// private copies handed to exactly one transaction. Frames become
/// evictable once their share count drops to zero.
pub struct BufferPool {
    /// Target number of cached frames.
    capacity: usize,
    /// Published, read-only frames.
    readable: RwLock<HashMap<FrameKey, Arc<Frame>>>,
    /// Recycled page allocations.
    free: Mutex<Vec<Box<[u8]>>>,
    /// Logical clock used for LRU ordering.
    clock: AtomicU64,

    fetch_count: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
    writable_count: AtomicU64,
}

impl BufferPool {
    /// Creates a buffer pool targeting `capacity` cached frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            readable: RwLock::new(HashMap::new()),
            free: Mutex::new(Vec::new()),
            clock: AtomicU64::new(0),
            fetch_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            writable_count: AtomicU64::new(0),
        }
    }

    /// Returns a shared, read-only buffer for the page at `position`,
    /// calling `load` to fill it on a cache miss.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidPosition`] for misaligned positions and
    /// any error produced by `load`.
    pub fn get_readable<F>(&self, origin: FileOrigin, position: u64, load: F) -> FolioResult<PageBuffer>
    where
        F: FnOnce(&mut [u8]) -> FolioResult<()>,
    {
        check_position(position)?;
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        let key = (origin, position);

        if let Some(buffer) = self.lookup(&key) {
            return Ok(buffer);
        }

        self.miss_count.fetch_add(1, Ordering::Relaxed);
        let mut data = self.allocate();
        if let Err(e) = load(&mut data) {
            self.recycle(data);
            return Err(e);
        }

        let tick = self.tick();
        let mut readable = self.readable.write();
        // Another reader may have loaded the same page first.
        if let Some(existing) = readable.get(&key) {
            let buffer = existing.acquire();
            drop(readable);
            self.recycle(data);
            return Ok(buffer);
        }
        let frame = Arc::new(Frame::new(data, origin, position, tick));
        readable.insert(key, Arc::clone(&frame));
        let buffer = frame.acquire();
        self.evict_locked(&mut readable);
        Ok(buffer)
    }

    /// Returns a private, writable copy of the page at `position`. A cached
    /// frame is copied; otherwise `load` fills a fresh buffer that is not
    /// cached.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidPosition`] for misaligned positions and
    /// any error produced by `load`.
    pub fn get_writable<F>(&self, origin: FileOrigin, position: u64, load: F) -> FolioResult<PageBuffer>
    where
        F: FnOnce(&mut [u8]) -> FolioResult<()>,
    {
        check_position(position)?;
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        self.writable_count.fetch_add(1, Ordering::Relaxed);
        let key = (origin, position);

        let mut data = self.allocate();
        {
            let readable = self.readable.read();
            if let Some(frame) = readable.get(&key) {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                frame.touch(self.tick());
                data.copy_from_slice(frame.data());
                return Ok(PageBuffer::exclusive(data, Some(origin), position));
            }
        }

        self.miss_count.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = load(&mut data) {
            self.recycle(data);
            return Err(e);
        }
        Ok(PageBuffer::exclusive(data, Some(origin), position))
    }

    /// Returns a zeroed, exclusive buffer with no file position.
    #[must_use]
    pub fn new_page(&self) -> PageBuffer {
        PageBuffer::exclusive(self.allocate(), None, NO_POSITION)
    }

    /// Publishes a written exclusive buffer as a shared frame and returns
    /// the first share of it.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] if the buffer is already shared
    /// and [`FolioError::InvalidPosition`] if it has no file position.
    pub fn move_to_readable(&self, buffer: PageBuffer) -> FolioResult<PageBuffer> {
        let origin = buffer.origin();
        let position = buffer.position();
        let data = buffer.into_exclusive_data().map_err(|shared| {
            let data = shared.as_slice();
            FolioError::ReadOnlyPage {
                page_id: folio_common::PageId::from_le_bytes([data[0], data[1], data[2], data[3]]),
            }
        })?;

        let Some(origin) = origin.filter(|_| position != NO_POSITION) else {
            self.recycle(data);
            return Err(FolioError::InvalidPosition { position });
        };

        let frame = Arc::new(Frame::new(data, origin, position, self.tick()));
        let mut readable = self.readable.write();
        readable.insert((origin, position), Arc::clone(&frame));
        let shared = frame.acquire();
        self.evict_locked(&mut readable);
        Ok(shared)
    }

    /// Returns an exclusive buffer's allocation to the pool. Shared buffers
    /// are simply released.
    pub fn discard(&self, buffer: PageBuffer) {
        if let Ok(data) = buffer.into_exclusive_data() {
            self.recycle(data);
        }
    }

    /// Drops every unshared frame. Returns the number of frames that were
    /// still shared and therefore kept.
    pub fn clear(&self) -> usize {
        let mut readable = self.readable.write();
        let before = readable.len();
        readable.retain(|_, frame| frame.share_count() > 0);
        let kept = readable.len();
        self.eviction_count
            .fetch_add((before - kept) as u64, Ordering::Relaxed);
        trace!(evicted = before - kept, kept, "cleared buffer pool");
        kept
    }

    /// Number of published frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.readable.read().len()
    }

    /// Returns true when no frames are published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readable.read().is_empty()
    }

    /// Target number of cached frames.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns statistics about the buffer pool.
    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        let readable = self.readable.read();
        let shared_frames = readable.values().filter(|f| f.share_count() > 0).count();

        BufferPoolStats {
            fetches: self.fetch_count.load(Ordering::Relaxed),
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            evictions: self.eviction_count.load(Ordering::Relaxed),
            writable_copies: self.writable_count.load(Ordering::Relaxed),
            cached_frames: readable.len(),
            shared_frames,
            free_buffers: self.free.lock().len(),
        }
    }

    fn lookup(&self, key: &FrameKey) -> Option<PageBuffer> {
        let readable = self.readable.read();
        let frame = readable.get(key)?;
        self.hit_count.fetch_add(1, Ordering::Relaxed);
        frame.touch(self.tick());
        Some(frame.acquire())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn allocate(&self) -> Box<[u8]> {
        if let Some(mut data) = self.free.lock().pop() {
            data.fill(0);
            return data;
        }
        vec![0u8; PAGE_SIZE].into_boxed_slice()
    }

    fn recycle(&self, data: Box<[u8]>) {
        if data.len() != PAGE_SIZE {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < MAX_FREE_BUFFERS {
            free.push(data);
        }
    }

    /// Evicts least recently used unshared frames until the pool is back
    /// under capacity. Shared frames are never evicted, so the pool may stay
    /// over capacity while readers hold many pages.
    fn evict_locked(&self, readable: &mut HashMap<FrameKey, Arc<Frame>>) {
        if readable.len() <= self.capacity {
            return;
        }

        let excess = readable.len() - self.capacity;
        let mut candidates: Vec<(u64, FrameKey)> = readable
            .iter()
            .filter(|(_, frame)| frame.share_count() == 0)
            .map(|(key, frame)| (frame.last_access(), *key))
            .collect();
        candidates.sort_unstable_by_key(|(tick, _)| *tick);

        for (_, key) in candidates.into_iter().take(excess) {
            if let Some(frame) = readable.remove(&key) {
                self.eviction_count.fetch_add(1, Ordering::Relaxed);
                if let Ok(frame) = Arc::try_unwrap(frame) {
                    self.recycle(frame.into_data());
                }
            }
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity)
            .field("cached_frames", &self.len())
            .finish()
    }
}

/// Rejects positions that are not a multiple of the page size.
fn check_position(position: u64) -> FolioResult<()> {
    if position % PAGE_SIZE as u64 != 0 {
        return Err(FolioError::InvalidPosition { position });
    }
    Ok(())
}
