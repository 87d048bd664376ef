//! Page buffer cache.
//!
//! The buffer pool caches page images read from the data file and the log
//! file, keyed by `(origin, position)`:
//!
//! - **Readable pages** are published as shared frames. Any number of
//!   snapshots may hold the same frame; none of them may write to it.
//! - **Writable pages** are private copies owned by one snapshot until they
//!   are handed to the log writer and published back as readable.
//! - **Eviction** drops least recently used frames whose share count is
//!   zero once the pool grows past its capacity.
//!
//! ```text
//!   get_readable ──► [ (origin, pos) → Frame{shares} ] ◄── move_to_readable
//!                              │ copy
//!                              ▼
//!   get_writable ──►   PageBuffer::Exclusive  ──► log writer queue
//! ```

mod frame;
mod pool;

pub use frame::{PageBuffer, NO_POSITION};
pub use pool::BufferPool;

/// Statistics for buffer pool monitoring.
#[derive(Debug, Clone, Default)]
pub struct BufferPoolStats {
    /// Total number of page requests.
    pub fetches: u64,
    /// Number of requests served from a cached frame.
    pub hits: u64,
    /// Number of requests that had to load the page.
    pub misses: u64,
    /// Number of frames evicted.
    pub evictions: u64,
    /// Number of writable copies handed out.
    pub writable_copies: u64,
    /// Current number of cached frames.
    pub cached_frames: usize,
    /// Current number of frames with at least one share.
    pub shared_frames: usize,
    /// Recycled allocations waiting for reuse.
    pub free_buffers: usize,
}

impl BufferPoolStats {
    /// Returns the cache hit ratio (0.0 to 1.0).
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        if self.fetches == 0 {
            0.0
        } else {
            self.hits as f64 / self.fetches as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_hit_ratio() {
        let mut stats = BufferPoolStats::default();
        assert_eq!(stats.hit_ratio(), 0.0);

        stats.fetches = 100;
        stats.hits = 80;
        assert!((stats.hit_ratio() - 0.8).abs() < f64::EPSILON);
    }
}
