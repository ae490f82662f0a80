//! Metric structs and provider traits
//!
//! Components own one of the metric structs (behind an `Arc`) and expose it
//! through a provider trait so the reporter can collect snapshots.
//!
//! # Design
//!
//! - Traits use `&self` and return `Copy` snapshots
//! - All providers are `Send + Sync` for thread-safe collection
//! - Metric structs use atomics internally, so no locks needed

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::{Timer, TimerSnapshot};

// ============================================================================
// Queue
// ============================================================================

/// Metrics for one realtime priority queue
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// Events admitted
    pub offered: AtomicU64,
    /// Events returned by a retrieval (both channels)
    pub polled: AtomicU64,
    /// Events returned from the bulk channel
    pub bulk_polled: AtomicU64,
    /// Heartbeats dropped because another heartbeat was already last in line
    pub heartbeats_coalesced: AtomicU64,
    /// Events removed by discard or clear
    pub discarded: AtomicU64,
}

impl QueueMetrics {
    pub const fn new() -> Self {
        Self {
            offered: AtomicU64::new(0),
            polled: AtomicU64::new(0),
            bulk_polled: AtomicU64::new(0),
            heartbeats_coalesced: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_offered(&self) {
        self.offered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retrieval, `bulk` when served from the bulk channel
    #[inline]
    pub fn record_polled(&self, bulk: bool) {
        self.polled.fetch_add(1, Ordering::Relaxed);
        if bulk {
            self.bulk_polled.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_heartbeat_coalesced(&self) {
        self.heartbeats_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_discarded(&self, count: u64) {
        self.discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            offered: self.offered.load(Ordering::Relaxed),
            polled: self.polled.load(Ordering::Relaxed),
            bulk_polled: self.bulk_polled.load(Ordering::Relaxed),
            heartbeats_coalesced: self.heartbeats_coalesced.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of queue metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueMetricsSnapshot {
    pub offered: u64,
    pub polled: u64,
    pub bulk_polled: u64,
    pub heartbeats_coalesced: u64,
    pub discarded: u64,
}

/// Trait for queues to provide metrics to the reporter
pub trait QueueMetricsProvider: Send + Sync {
    /// Pipe the queue belongs to
    fn queue_id(&self) -> &str;

    /// Events currently queued (both channels)
    fn queued(&self) -> usize;

    fn snapshot(&self) -> QueueMetricsSnapshot;
}

// ============================================================================
// Batch
// ============================================================================

/// Metrics for tablet batch accumulators
#[derive(Debug, Default)]
pub struct BatchMetrics {
    /// Batches that reached an emit condition
    pub emissions: AtomicU64,
    /// Bytes in emitted batches
    pub bytes: AtomicU64,
    /// Events in emitted batches
    pub events: AtomicU64,
    /// Time from first event to emission
    pub delay: Timer,
}

impl BatchMetrics {
    pub const fn new() -> Self {
        Self {
            emissions: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            events: AtomicU64::new(0),
            delay: Timer::new(),
        }
    }

    /// Record one emission: elapsed delay, total bytes, event count
    #[inline]
    pub fn record_emit(&self, elapsed: Duration, bytes: u64, events: usize) {
        self.emissions.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.events.fetch_add(events as u64, Ordering::Relaxed);
        self.delay.record(elapsed);
    }

    pub fn snapshot(&self) -> BatchMetricsSnapshot {
        BatchMetricsSnapshot {
            emissions: self.emissions.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            delay: self.delay.snapshot(),
        }
    }
}

/// Point-in-time snapshot of batch metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchMetricsSnapshot {
    pub emissions: u64,
    pub bytes: u64,
    pub events: u64,
    pub delay: TimerSnapshot,
}

/// Trait for batch accumulators to provide metrics to the reporter
pub trait BatchMetricsProvider: Send + Sync {
    fn batch_id(&self) -> &str;

    fn snapshot(&self) -> BatchMetricsSnapshot;
}

// ============================================================================
// Transfer
// ============================================================================

/// Metrics for file transfers and tablet batch sends
#[derive(Debug, Default)]
pub struct TransferMetrics {
    /// Piece requests acknowledged
    pub pieces_sent: AtomicU64,
    /// Payload bytes in acknowledged pieces
    pub piece_bytes: AtomicU64,
    /// Round trip of a single piece request
    pub piece_timer: Timer,
    /// Seal requests acknowledged (completed file transfers)
    pub seals: AtomicU64,
    /// Time from transfer start to acknowledged seal
    pub file_timer: Timer,
    /// Offset resets reported by the receiver
    pub offset_resets: AtomicU64,
    /// Events handed to the retry queue
    pub retries: AtomicU64,
    /// Tablet batches acknowledged
    pub batches_sent: AtomicU64,
    /// Events in acknowledged tablet batches
    pub batch_events_sent: AtomicU64,
}

impl TransferMetrics {
    pub const fn new() -> Self {
        Self {
            pieces_sent: AtomicU64::new(0),
            piece_bytes: AtomicU64::new(0),
            piece_timer: Timer::new(),
            seals: AtomicU64::new(0),
            file_timer: Timer::new(),
            offset_resets: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            batch_events_sent: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_piece(&self, bytes: u64, elapsed: Duration) {
        self.pieces_sent.fetch_add(1, Ordering::Relaxed);
        self.piece_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.piece_timer.record(elapsed);
    }

    #[inline]
    pub fn record_seal(&self, elapsed: Duration) {
        self.seals.fetch_add(1, Ordering::Relaxed);
        self.file_timer.record(elapsed);
    }

    #[inline]
    pub fn record_offset_reset(&self) {
        self.offset_resets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch(&self, events: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.batch_events_sent
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransferMetricsSnapshot {
        TransferMetricsSnapshot {
            pieces_sent: self.pieces_sent.load(Ordering::Relaxed),
            piece_bytes: self.piece_bytes.load(Ordering::Relaxed),
            piece_timer: self.piece_timer.snapshot(),
            seals: self.seals.load(Ordering::Relaxed),
            file_timer: self.file_timer.snapshot(),
            offset_resets: self.offset_resets.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batch_events_sent: self.batch_events_sent.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of transfer metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TransferMetricsSnapshot {
    pub pieces_sent: u64,
    pub piece_bytes: u64,
    pub piece_timer: TimerSnapshot,
    pub seals: u64,
    pub file_timer: TimerSnapshot,
    pub offset_resets: u64,
    pub retries: u64,
    pub batches_sent: u64,
    pub batch_events_sent: u64,
}

/// Transfer metrics plus the connector's live state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConnectorMetricsSnapshot {
    pub transfer: TransferMetricsSnapshot,
    /// Events waiting in the retry queue
    pub retrying: usize,
    /// Events sent but not yet acknowledged
    pub in_flight: usize,
}

/// Trait for connectors to provide metrics to the reporter
pub trait ConnectorMetricsProvider: Send + Sync {
    fn connector_id(&self) -> &str;

    fn snapshot(&self) -> ConnectorMetricsSnapshot;
}
