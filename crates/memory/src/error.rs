//! Memory error types

use thiserror::Error;

use crate::manager::MemoryPool;

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors raised by the memory manager
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The remaining budget cannot cover the request
    #[error("insufficient memory in {pool} pool: requested {requested} bytes, {available} available")]
    Insufficient {
        pool: MemoryPool,
        requested: u64,
        available: u64,
    },

    /// The block was already closed
    #[error("memory block in {0} pool is closed")]
    Closed(MemoryPool),
}

impl MemoryError {
    /// Create an insufficient-memory error
    pub fn insufficient(pool: MemoryPool, requested: u64, available: u64) -> Self {
        Self::Insufficient {
            pool,
            requested,
            available,
        }
    }
}
