//! Owned grant from the memory manager
//!
//! A block has a granted `size` and a separately tracked `usage`. Usage is
//! advisory: it may exceed the size (the queue accounts bytes against a
//! zero-sized block) and it is mirrored into the manager's per-pool
//! counters. All operations take `&self` so a block can be shared between
//! a producer and a consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{MemoryError, Result};
use crate::manager::{MemoryManager, MemoryPool, saturating_sub};

/// Byte budget granted from one pool
#[derive(Debug)]
pub struct MemoryBlock {
    manager: Arc<MemoryManager>,
    pool: MemoryPool,
    size: AtomicU64,
    usage: AtomicU64,
    closed: AtomicBool,
    /// Serialises grant changes so the manager sees exactly the block's deltas
    grant: Mutex<()>,
}

impl MemoryBlock {
    pub(crate) fn new(manager: Arc<MemoryManager>, pool: MemoryPool, size: u64) -> Self {
        Self {
            manager,
            pool,
            size: AtomicU64::new(size),
            usage: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            grant: Mutex::new(()),
        }
    }

    /// Pool this block was drawn from
    #[inline]
    pub fn pool(&self) -> MemoryPool {
        self.pool
    }

    /// Granted bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Bytes currently accounted as used
    #[inline]
    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Account `bytes` more usage
    pub fn add_usage(&self, bytes: u64) {
        if self.is_closed() {
            return;
        }
        self.usage.fetch_add(bytes, Ordering::AcqRel);
        self.manager.add_used(self.pool, bytes);
    }

    /// Account `bytes` less usage, stopping at zero
    pub fn reduce_usage(&self, bytes: u64) {
        let previous = saturating_sub(&self.usage, bytes);
        self.manager.reduce_used(self.pool, previous.min(bytes));
    }

    /// Change the grant to `new_size` bytes
    ///
    /// Growing reserves the difference from the manager and fails without
    /// changing the block if the budget cannot cover it. Shrinking always
    /// succeeds.
    pub fn resize(&self, new_size: u64) -> Result<()> {
        let _grant = self.grant.lock();
        if self.is_closed() {
            return Err(MemoryError::Closed(self.pool));
        }

        let current = self.size();
        if new_size > current {
            self.manager.reserve(self.pool, new_size - current)?;
        } else {
            self.manager.release(self.pool, current - new_size);
        }
        self.size.store(new_size, Ordering::Release);

        tracing::debug!(
            pool = %self.pool,
            from = current,
            to = new_size,
            "memory block resized"
        );
        Ok(())
    }

    /// Return the grant and any outstanding usage to the manager
    ///
    /// Idempotent.
    pub fn close(&self) {
        let _grant = self.grant.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let size = self.size.swap(0, Ordering::AcqRel);
        let usage = self.usage.swap(0, Ordering::AcqRel);
        self.manager.release(self.pool, size);
        self.manager.reduce_used(self.pool, usage);
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        self.close();
    }
}
