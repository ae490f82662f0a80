//! Tablet batch configuration

use std::time::Duration;

use serde::Deserialize;

/// Limits for coalescing tablet events into one request
///
/// A batch is emitted when its accumulated size reaches the granted memory
/// budget (at most `max_batch_size_bytes`) or when `max_delay_ms` has passed
/// since its first event, whichever comes first.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum time an event may wait in a batch
    /// Default: 1000
    pub max_delay_ms: u64,

    /// Requested batch capacity; the memory budget may grant less
    /// Default: 16777216 (16MB)
    pub max_batch_size_bytes: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: 1000,
            max_batch_size_bytes: 16 * 1024 * 1024,
        }
    }
}

impl BatchConfig {
    /// Maximum delay as a `Duration`
    #[inline]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}
