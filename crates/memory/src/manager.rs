//! Process-wide memory manager
//!
//! Tracks how much of the node's budget has been granted to blocks and how
//! much of each grant is currently in use. Grants are reserved with a CAS
//! loop so concurrent pipes can never push the total over the budget.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::block::MemoryBlock;
use crate::error::{MemoryError, Result};

/// Named pool a block is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryPool {
    /// Shared budget backing every tablet batch
    Batch,
    /// Byte accounting of the realtime queues
    Queue,
}

impl MemoryPool {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Queue => "queue",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Batch => 0,
            Self::Queue => 1,
        }
    }
}

impl fmt::Display for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    /// Bytes granted to blocks of this pool
    allocated: AtomicU64,
    /// Bytes reported in use by blocks of this pool
    used: AtomicU64,
}

/// Process-wide memory budget
#[derive(Debug)]
pub struct MemoryManager {
    total_bytes: u64,
    allocated: AtomicU64,
    pools: [PoolCounters; 2],
}

impl MemoryManager {
    /// Create a manager with `total_bytes` of budget
    pub fn new(total_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            total_bytes,
            allocated: AtomicU64::new(0),
            pools: Default::default(),
        })
    }

    /// Total budget
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Budget not yet granted to any block
    #[inline]
    pub fn available_bytes(&self) -> u64 {
        self.total_bytes
            .saturating_sub(self.allocated.load(Ordering::Acquire))
    }

    /// Grant a block of `bytes` from `pool`
    ///
    /// Fails with `MemoryError::Insufficient` when the remaining budget is
    /// smaller than the request. A zero-byte request always succeeds.
    pub fn try_allocate(self: &Arc<Self>, pool: MemoryPool, bytes: u64) -> Result<MemoryBlock> {
        self.reserve(pool, bytes)?;
        Ok(MemoryBlock::new(Arc::clone(self), pool, bytes))
    }

    /// Zero-sized block that only tracks usage
    pub fn allocate_empty(self: &Arc<Self>, pool: MemoryPool) -> MemoryBlock {
        MemoryBlock::new(Arc::clone(self), pool, 0)
    }

    /// Reserve `bytes` of budget for `pool`
    pub(crate) fn reserve(&self, pool: MemoryPool, bytes: u64) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }

        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |allocated| {
                allocated
                    .checked_add(bytes)
                    .filter(|next| *next <= self.total_bytes)
            })
            .map_err(|allocated| {
                MemoryError::insufficient(pool, bytes, self.total_bytes.saturating_sub(allocated))
            })?;

        self.pools[pool.index()]
            .allocated
            .fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    /// Return `bytes` of budget previously reserved for `pool`
    pub(crate) fn release(&self, pool: MemoryPool, bytes: u64) {
        if bytes == 0 {
            return;
        }
        saturating_sub(&self.allocated, bytes);
        saturating_sub(&self.pools[pool.index()].allocated, bytes);
    }

    pub(crate) fn add_used(&self, pool: MemoryPool, bytes: u64) {
        self.pools[pool.index()]
            .used
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn reduce_used(&self, pool: MemoryPool, bytes: u64) {
        saturating_sub(&self.pools[pool.index()].used, bytes);
    }

    /// Point-in-time view of the budget
    pub fn snapshot(&self) -> MemorySnapshot {
        let batch = &self.pools[MemoryPool::Batch.index()];
        let queue = &self.pools[MemoryPool::Queue.index()];
        MemorySnapshot {
            total_bytes: self.total_bytes,
            allocated_bytes: self.allocated.load(Ordering::Relaxed),
            batch_allocated: batch.allocated.load(Ordering::Relaxed),
            batch_used: batch.used.load(Ordering::Relaxed),
            queue_allocated: queue.allocated.load(Ordering::Relaxed),
            queue_used: queue.used.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the memory manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub allocated_bytes: u64,
    pub batch_allocated: u64,
    pub batch_used: u64,
    pub queue_allocated: u64,
    pub queue_used: u64,
}

/// Subtract without wrapping below zero
pub(crate) fn saturating_sub(counter: &AtomicU64, bytes: u64) -> u64 {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(current.saturating_sub(bytes))
        })
        .unwrap_or_else(|current| current)
}
