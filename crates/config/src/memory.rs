//! Memory budget configuration

use serde::Deserialize;

/// Process-wide memory budget shared by every pipe on this node
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Total bytes the transport stage may account for
    /// Default: 1073741824 (1GB)
    pub total_bytes: u64,

    /// First candidate for the shared batch budget; halved until granted
    /// Default: 67108864 (64MB)
    pub batch_budget_bytes: u64,

    /// Budget requested for each queue's byte accounting
    /// Default: 67108864 (64MB)
    pub queue_budget_bytes: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            total_bytes: 1024 * 1024 * 1024,
            batch_budget_bytes: 64 * 1024 * 1024,
            queue_budget_bytes: 64 * 1024 * 1024,
        }
    }
}
