//! Pipe Metrics
//!
//! Internal metrics for the transport stage of a pipe.
//!
//! # Overview
//!
//! This crate provides:
//! - Atomic metric structs for the realtime queue, tablet batches and the
//!   file transfer connector
//! - Provider traits so the reporter can collect snapshots without knowing
//!   the concrete component types
//! - A periodic reporter with human or JSON output
//!
//! # Metrics Handle Pattern
//!
//! Components keep their metrics in an `Arc` and hand out a lightweight
//! handle implementing the matching provider trait. The handle stays valid
//! after the component is moved into its task.
//!
//! ```text
//! Component (owns Arc<Metrics>)
//!     │
//!     ├──► metrics_handle() → Handle (clones Arc, implements Provider trait)
//!     │
//!     └──► run() [consumes self, Arc keeps metrics alive]
//! ```
//!
//! # Example
//!
//! ```
//! use pipe_metrics::BatchMetrics;
//! use std::time::Duration;
//!
//! let metrics = BatchMetrics::new();
//! metrics.record_emit(Duration::from_millis(120), 4096, 12);
//! assert_eq!(metrics.snapshot().emissions, 1);
//! ```

mod collected;
pub mod format;
mod reporter;
mod traits;

pub use collected::{
    CollectedBatch, CollectedConnector, CollectedMetrics, CollectedQueue, ConnectorRates,
};
pub use format::{HumanFormatter, JsonFormatter, MetricsFormatter};
pub use reporter::{MetricsReporter, MetricsReporterBuilder};
pub use traits::{
    BatchMetrics, BatchMetricsProvider, BatchMetricsSnapshot, ConnectorMetricsProvider,
    ConnectorMetricsSnapshot, QueueMetrics, QueueMetricsProvider, QueueMetricsSnapshot,
    TransferMetrics, TransferMetricsSnapshot,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomic counter wrapper for convenient metric operations
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Create a new counter initialized to 0
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increment the counter by `val` (relaxed ordering for performance)
    #[inline]
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Increment the counter by 1
    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    /// Get the current value (relaxed ordering)
    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Duration samples: count, sum and maximum
#[derive(Debug, Default)]
pub struct Timer {
    count: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl Timer {
    pub const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
            max_micros: AtomicU64::new(0),
        }
    }

    /// Record one sample
    #[inline]
    pub fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            count: self.count.load(Ordering::Relaxed),
            total_micros: self.total_micros.load(Ordering::Relaxed),
            max_micros: self.max_micros.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a `Timer`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TimerSnapshot {
    pub count: u64,
    pub total_micros: u64,
    pub max_micros: u64,
}

impl TimerSnapshot {
    /// Mean sample, zero when nothing was recorded
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.total_micros / self.count)
        }
    }

    pub fn max(&self) -> Duration {
        Duration::from_micros(self.max_micros)
    }
}
