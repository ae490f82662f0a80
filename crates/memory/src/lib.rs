//! Pipe Memory - Process-wide memory accounting
//!
//! Every pipe on a node draws from one byte budget. The budget is split into
//! named pools so the queue's byte accounting and the tablet batches can be
//! observed separately:
//!
//! - `MemoryManager` - Total budget and per-pool counters (all atomics)
//! - `MemoryBlock` - An owned grant from one pool; returned on close or drop
//! - `SharedBatchBudget` - One fixed block carved into per-batch `DynamicMemoryBlock`s
//! - `ResourceContext` - Explicit startup context holding the manager and the
//!   lazily initialised batch budget
//!
//! # Example
//!
//! ```
//! use pipe_config::MemoryConfig;
//! use pipe_memory::ResourceContext;
//!
//! let context = ResourceContext::new(&MemoryConfig::default());
//! let budget = context.init_batch_budget();
//! let block = budget.register_block(1024);
//! assert_eq!(block.size(), 1024);
//! ```

mod block;
mod budget;
mod context;
mod error;
mod manager;

pub use block::MemoryBlock;
pub use budget::{DynamicMemoryBlock, SharedBatchBudget};
pub use context::ResourceContext;
pub use error::{MemoryError, Result};
pub use manager::{MemoryManager, MemoryPool, MemorySnapshot};

#[cfg(test)]
mod block_test;
