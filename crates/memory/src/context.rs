//! Startup resource context
//!
//! Built once from `MemoryConfig` and handed to every component that needs
//! memory. The shared batch budget is created lazily, at most once, the
//! first time a batch accumulator asks for it.

use std::sync::{Arc, OnceLock};

use pipe_config::MemoryConfig;

use crate::block::MemoryBlock;
use crate::budget::SharedBatchBudget;
use crate::manager::{MemoryManager, MemoryPool};

/// Process-wide memory resources
#[derive(Debug)]
pub struct ResourceContext {
    manager: Arc<MemoryManager>,
    batch_budget_bytes: u64,
    queue_budget_bytes: u64,
    batch_budget: OnceLock<Arc<SharedBatchBudget>>,
}

impl ResourceContext {
    pub fn new(config: &MemoryConfig) -> Self {
        Self::with_manager(
            MemoryManager::new(config.total_bytes),
            config.batch_budget_bytes,
            config.queue_budget_bytes,
        )
    }

    /// Build a context around an existing manager
    pub fn with_manager(
        manager: Arc<MemoryManager>,
        batch_budget_bytes: u64,
        queue_budget_bytes: u64,
    ) -> Self {
        Self {
            manager,
            batch_budget_bytes,
            queue_budget_bytes,
            batch_budget: OnceLock::new(),
        }
    }

    #[inline]
    pub fn manager(&self) -> &Arc<MemoryManager> {
        &self.manager
    }

    /// Shared batch budget, allocating it on first use
    ///
    /// Starts from the configured budget and halves the candidate until the
    /// manager grants it. If every candidate down to one byte is refused,
    /// the budget is a zero-sized placeholder: batches then emit on every
    /// event instead of failing startup.
    pub fn init_batch_budget(&self) -> &Arc<SharedBatchBudget> {
        self.batch_budget
            .get_or_init(|| SharedBatchBudget::new(self.allocate_batch_block()))
    }

    /// Batch budget if it was already initialised
    pub fn batch_budget(&self) -> Option<&Arc<SharedBatchBudget>> {
        self.batch_budget.get()
    }

    /// Block for one queue's byte accounting
    ///
    /// Falls back to a zero-sized block when the budget is exhausted; queue
    /// usage is still tracked against it.
    pub fn queue_block(&self) -> MemoryBlock {
        match self
            .manager
            .try_allocate(MemoryPool::Queue, self.queue_budget_bytes)
        {
            Ok(block) => block,
            Err(error) => {
                tracing::warn!(%error, "queue memory budget unavailable, tracking usage only");
                self.manager.allocate_empty(MemoryPool::Queue)
            }
        }
    }

    fn allocate_batch_block(&self) -> MemoryBlock {
        let mut candidate = self.batch_budget_bytes;
        while candidate > 0 {
            match self.manager.try_allocate(MemoryPool::Batch, candidate) {
                Ok(block) => {
                    tracing::info!(bytes = candidate, "batch memory budget allocated");
                    return block;
                }
                Err(error) => {
                    tracing::warn!(bytes = candidate, %error, "batch memory budget refused, halving");
                    candidate /= 2;
                }
            }
        }

        tracing::warn!("no batch memory budget available, using a zero-sized budget");
        self.manager.allocate_empty(MemoryPool::Batch)
    }
}
