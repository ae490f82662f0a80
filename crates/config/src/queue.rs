//! Realtime queue configuration
//!
//! Controls how the realtime priority queue interleaves live events with
//! the backlog of file-class (bulk) events.

use std::time::Duration;

use serde::Deserialize;

/// Realtime priority queue scheduling knobs
///
/// # Example
///
/// ```toml
/// [queue]
/// bulk_poll_threshold = 10
/// historical_poll_threshold = 3
/// max_waiting_bulk_count = 1
/// max_blocking_time_ms = 1000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Ordinary retrievals after which the next retrieval serves the bulk channel
    /// Default: 10
    pub bulk_poll_threshold: usize,

    /// Every Nth bulk retrieval takes the oldest bulk event instead of the freshest
    /// Default: 3 (values below 1 behave as 1)
    pub historical_poll_threshold: u64,

    /// Bulk events allowed in flight before the bulk channel stops being served
    /// Default: 1
    pub max_waiting_bulk_count: usize,

    /// Upper bound for a single blocking retrieval
    /// Default: 1000
    pub max_blocking_time_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            bulk_poll_threshold: 10,
            historical_poll_threshold: 3,
            max_waiting_bulk_count: 1,
            max_blocking_time_ms: 1000,
        }
    }
}

impl QueueConfig {
    /// Historical threshold clamped to at least 1 so the modulo test is defined
    #[inline]
    pub fn effective_historical_poll_threshold(&self) -> u64 {
        self.historical_poll_threshold.max(1)
    }

    /// Maximum blocking time as a `Duration`
    #[inline]
    pub fn max_blocking_time(&self) -> Duration {
        Duration::from_millis(self.max_blocking_time_ms)
    }
}
