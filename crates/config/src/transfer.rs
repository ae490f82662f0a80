//! File transfer and connector configuration

use std::time::Duration;

use serde::Deserialize;

/// Settings for the resumable file transfer handler and its connector
///
/// # Example
///
/// ```toml
/// [transfer]
/// read_buffer_size = 8388608
/// initial_retry_interval_ms = 1000
/// max_client_number = 16
/// request_timeout_ms = 60000
/// node_id = 1
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes read from a file per piece request
    /// Default: 8388608 (8MB)
    pub read_buffer_size: usize,

    /// Retry interval assigned to an event before its first failure
    /// Default: 1000
    pub initial_retry_interval_ms: u64,

    /// Size of the network client pool
    /// Default: 16
    pub max_client_number: usize,

    /// Timeout applied to a single request
    /// Default: 60000
    pub request_timeout_ms: u64,

    /// Identifier of this node, stamped on every request
    /// Default: 0
    pub node_id: i32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8 * 1024 * 1024,
            initial_retry_interval_ms: 1000,
            max_client_number: 16,
            request_timeout_ms: 60_000,
            node_id: 0,
        }
    }
}

impl TransferConfig {
    /// Request timeout as a `Duration`
    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Initial retry interval as a `Duration`
    #[inline]
    pub fn initial_retry_interval(&self) -> Duration {
        Duration::from_millis(self.initial_retry_interval_ms)
    }
}
