//! Shared budget for tablet batches
//!
//! All batch accumulators on a node share one fixed `MemoryBlock`. Each
//! accumulator registers a `DynamicMemoryBlock` asking for its configured
//! batch size and receives whatever is left unassigned, possibly less.
//!
//! Batches report how they flush through `update_efficiency(ratio)`, where
//! `ratio` is the elapsed delay divided by the maximum delay. A batch whose
//! smoothed ratio reaches 1 flushes on time rather than on size, so its
//! grant is cut to a fraction of the request and the bytes become available
//! to batches that fill up. When the ratio drops again the request is
//! granted back (space permitting).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::block::MemoryBlock;

/// Weight of the newest sample in the efficiency average
const EFFICIENCY_ALPHA: f64 = 0.5;

/// A time-flushing block keeps 1/SHRINK_FACTOR of its request
const SHRINK_FACTOR: u64 = 4;

/// Smallest grant a shrunk block is cut to (never more than its request)
const MIN_SHRUNK_SIZE: u64 = 64 * 1024;

/// Fixed block carved into per-batch grants
#[derive(Debug)]
pub struct SharedBatchBudget {
    block: MemoryBlock,
    next_id: AtomicU64,
    blocks: Mutex<Vec<(u64, Weak<DynamicMemoryBlock>)>>,
}

impl SharedBatchBudget {
    pub(crate) fn new(block: MemoryBlock) -> Arc<Self> {
        Arc::new(Self {
            block,
            next_id: AtomicU64::new(0),
            blocks: Mutex::new(Vec::new()),
        })
    }

    /// Bytes backing every registered block
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.block.size()
    }

    /// Bytes currently granted to open blocks
    pub fn assigned(&self) -> u64 {
        self.live_blocks().iter().map(|block| block.size()).sum()
    }

    /// Number of open blocks
    pub fn block_count(&self) -> usize {
        self.live_blocks().len()
    }

    /// Register a block asking for `requested` bytes
    ///
    /// The grant is `min(requested, unassigned)`; check `size()` for the
    /// effective capacity.
    pub fn register_block(self: &Arc<Self>, requested: u64) -> Arc<DynamicMemoryBlock> {
        let block = Arc::new(DynamicMemoryBlock {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            budget: Arc::clone(self),
            requested,
            granted: AtomicU64::new(0),
            usage: AtomicU64::new(0),
            efficiency: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        self.blocks.lock().push((block.id, Arc::downgrade(&block)));
        self.rebalance();

        if block.size() < requested {
            tracing::info!(
                requested,
                granted = block.size(),
                capacity = self.capacity(),
                "batch budget granted less than requested"
            );
        }
        block
    }

    /// Recompute every open block's grant
    ///
    /// Blocks are served in registration order. Each receives its target
    /// (the request, or a fraction of it when flushing on time) capped by
    /// what is still unassigned.
    pub fn rebalance(&self) {
        // Upgraded handles are dropped after the lock so a block's Drop
        // never runs while the list is locked.
        let live: Vec<Arc<DynamicMemoryBlock>> = {
            let mut blocks = self.blocks.lock();
            blocks.retain(|(_, weak)| weak.strong_count() > 0);
            let live = open_blocks(&blocks);

            let mut remaining = self.capacity();
            for block in &live {
                let grant = block.target_size().min(remaining);
                remaining -= grant;
                block.granted.store(grant, Ordering::Release);
            }
            live
        };
        drop(live);
    }

    fn live_blocks(&self) -> Vec<Arc<DynamicMemoryBlock>> {
        let blocks = self.blocks.lock();
        open_blocks(&blocks)
    }

    fn unregister(&self, id: u64) {
        self.blocks
            .lock()
            .retain(|(block_id, weak)| *block_id != id && weak.strong_count() > 0);
        self.rebalance();
    }
}

/// Per-batch slice of the shared budget
#[derive(Debug)]
pub struct DynamicMemoryBlock {
    id: u64,
    budget: Arc<SharedBatchBudget>,
    requested: u64,
    granted: AtomicU64,
    usage: AtomicU64,
    /// Smoothed elapsed/max-delay ratio; `None` until the first flush
    efficiency: Mutex<Option<f64>>,
    closed: AtomicBool,
}

impl DynamicMemoryBlock {
    /// Effective capacity
    #[inline]
    pub fn size(&self) -> u64 {
        self.granted.load(Ordering::Acquire)
    }

    /// Bytes asked for at registration
    #[inline]
    pub fn requested(&self) -> u64 {
        self.requested
    }

    #[inline]
    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn add_usage(&self, bytes: u64) {
        self.usage.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn reduce_usage(&self, bytes: u64) {
        crate::manager::saturating_sub(&self.usage, bytes);
    }

    pub fn reset_usage(&self) {
        self.usage.store(0, Ordering::Release);
    }

    /// Current smoothed efficiency, if any flush was reported
    pub fn efficiency(&self) -> Option<f64> {
        *self.efficiency.lock()
    }

    /// Feed back how a batch flushed: elapsed delay / max delay
    ///
    /// Triggers a rebalance of the shared budget when the block moves
    /// between flushing on size and flushing on time.
    pub fn update_efficiency(&self, ratio: f64) {
        if self.is_closed() || !ratio.is_finite() {
            return;
        }
        let ratio = ratio.max(0.0);

        let (was_on_time, is_on_time) = {
            let mut efficiency = self.efficiency.lock();
            let was_on_time = (*efficiency).is_some_and(flushes_on_time);
            let next = match *efficiency {
                Some(previous) => EFFICIENCY_ALPHA * ratio + (1.0 - EFFICIENCY_ALPHA) * previous,
                None => ratio,
            };
            *efficiency = Some(next);
            (was_on_time, flushes_on_time(next))
        };

        if was_on_time != is_on_time {
            self.budget.rebalance();
            tracing::info!(
                requested = self.requested,
                granted = self.size(),
                on_time = is_on_time,
                "batch budget adjusted"
            );
        }
    }

    /// Return the slice to the shared budget
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.granted.store(0, Ordering::Release);
        self.usage.store(0, Ordering::Release);
        self.budget.unregister(self.id);
    }

    fn target_size(&self) -> u64 {
        match self.efficiency() {
            Some(efficiency) if flushes_on_time(efficiency) => (self.requested / SHRINK_FACTOR)
                .max(MIN_SHRUNK_SIZE)
                .min(self.requested),
            _ => self.requested,
        }
    }
}

impl Drop for DynamicMemoryBlock {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_blocks(blocks: &[(u64, Weak<DynamicMemoryBlock>)]) -> Vec<Arc<DynamicMemoryBlock>> {
    blocks
        .iter()
        .filter_map(|(_, weak)| weak.upgrade())
        .filter(|block| !block.is_closed())
        .collect()
}

#[inline]
fn flushes_on_time(efficiency: f64) -> bool {
    efficiency >= 1.0
}
