//! Pool of file read buffers shared by concurrent transfers
//!
//! Each in-flight file transfer borrows one buffer of `read_buffer_size`
//! bytes for its whole lifetime and returns it when the transfer ends,
//! successfully or not. Buffers are allocated on first use and kept for
//! reuse up to the pool size, so an idle connector holds no memory.
//!
//! # Example
//!
//! ```
//! use pipe_sinks::util::BufferPool;
//!
//! let pool = BufferPool::new(4, 1024);
//! let buf = pool.get();
//! assert!(buf.capacity() >= 1024);
//! pool.put(buf);
//! assert_eq!(pool.available(), 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

/// Lock-free pool of reusable read buffers
pub struct BufferPool {
    queue: ArrayQueue<BytesMut>,
    buffer_capacity: usize,
    metrics: BufferPoolMetrics,
}

/// Pool hit/miss counters
#[derive(Debug, Default)]
pub struct BufferPoolMetrics {
    /// Buffers handed out from the pool
    pub hits: AtomicU64,
    /// Buffers allocated because the pool was empty
    pub misses: AtomicU64,
    /// Buffers dropped on return (pool full or buffer shrunk)
    pub drops: AtomicU64,
}

impl BufferPoolMetrics {
    pub const fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            drops: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> BufferPoolSnapshot {
        BufferPoolSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub drops: u64,
}

impl BufferPool {
    /// Create an empty pool keeping at most `pool_size` buffers of
    /// `buffer_capacity` bytes
    pub fn new(pool_size: usize, buffer_capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(pool_size.max(1)),
            buffer_capacity,
            metrics: BufferPoolMetrics::new(),
        }
    }

    /// Borrow an empty buffer with at least `buffer_capacity` bytes of capacity
    #[inline]
    pub fn get(&self) -> BytesMut {
        match self.queue.pop() {
            Some(buf) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(self.buffer_capacity)
            }
        }
    }

    /// Return a buffer; it is cleared, and dropped when the pool is full or
    /// the buffer no longer has the full capacity
    #[inline]
    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() < self.buffer_capacity || self.queue.push(buf).is_err() {
            self.metrics.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Buffers ready for reuse
    #[inline]
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of pooled buffers
    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    #[inline]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    #[inline]
    pub fn metrics(&self) -> &BufferPoolMetrics {
        &self.metrics
    }
}

#[cfg(test)]
#[path = "buffer_pool_test.rs"]
mod buffer_pool_test;
