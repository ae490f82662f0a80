//! Sink utilities
//!
//! - **buffer_pool**: read buffers borrowed by file transfers
//! - **rate_limited_logger**: failure logging that does not flood under a
//!   persistent outage

pub mod buffer_pool;
pub mod rate_limited_logger;

pub use buffer_pool::{BufferPool, BufferPoolMetrics, BufferPoolSnapshot};
pub use rate_limited_logger::{DEFAULT_LOG_INTERVAL, RateLimitedLogger};
