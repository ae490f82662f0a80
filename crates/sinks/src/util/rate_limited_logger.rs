//! Rate-limited failure logging
//!
//! A connector stuck against an unavailable peer fails every request; this
//! logs the first failure and then at most one line per interval carrying
//! the number of suppressed failures.
//!
//! # Example
//!
//! ```
//! use pipe_sinks::util::RateLimitedLogger;
//! use std::time::Duration;
//!
//! let logger = RateLimitedLogger::new(Duration::from_secs(10));
//! let error = std::io::Error::other("peer unavailable");
//! assert!(logger.warn("batch send failed", &error));
//! assert!(!logger.warn("batch send failed", &error));
//! assert_eq!(logger.total_count(), 2);
//! ```

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default interval between two logged failures
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Logs at most once per interval, counting what it suppressed
pub struct RateLimitedLogger {
    min_interval: Duration,
    last_logged: Mutex<Option<Instant>>,
    suppressed: AtomicU64,
    total: AtomicU64,
}

impl RateLimitedLogger {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_logged: Mutex::new(None),
            suppressed: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Record a failure at warn level; returns true if it was logged
    pub fn warn(&self, message: &str, error: &dyn Display) -> bool {
        let Some(suppressed) = self.record() else {
            return false;
        };
        tracing::warn!(
            error = %error,
            suppressed,
            total = self.total_count(),
            "{message}"
        );
        true
    }

    /// Record a failure at error level; returns true if it was logged
    pub fn error(&self, message: &str, error: &dyn Display) -> bool {
        let Some(suppressed) = self.record() else {
            return false;
        };
        tracing::error!(
            error = %error,
            suppressed,
            total = self.total_count(),
            "{message}"
        );
        true
    }

    /// Count a failure; returns the suppressed count when it should be logged
    fn record(&self) -> Option<u64> {
        self.total.fetch_add(1, Ordering::Relaxed);

        let due = {
            let mut last = self.last_logged.lock();
            let now = Instant::now();
            let due = last.is_none_or(|at| now.duration_since(at) >= self.min_interval);
            if due {
                *last = Some(now);
            }
            due
        };

        if due {
            Some(self.suppressed.swap(0, Ordering::Relaxed))
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Failures suppressed since the last logged one
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl Default for RateLimitedLogger {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}
