//! Event and in-flight counters shared by the queue and the connector

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use pipe_protocol::{EventKind, SharedEvent};
use tokio::sync::Notify;

/// Per-kind count of queued events and their estimated bytes
#[derive(Debug, Default)]
pub struct EventCounter {
    tablet: AtomicU64,
    file: AtomicU64,
    heartbeat: AtomicU64,
    bytes: AtomicU64,
}

impl EventCounter {
    pub const fn new() -> Self {
        Self {
            tablet: AtomicU64::new(0),
            file: AtomicU64::new(0),
            heartbeat: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Count an admitted event; returns its estimated size
    pub fn increase(&self, event: &SharedEvent) -> u64 {
        let size = event.event().estimated_size();
        self.slot(event.event().kind()).fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
        size
    }

    /// Uncount an event that left the queue; returns its estimated size
    pub fn decrease(&self, event: &SharedEvent) -> u64 {
        let size = event.event().estimated_size();
        sub(self.slot(event.event().kind()), 1);
        sub(&self.bytes, size);
        size
    }

    pub fn reset(&self) {
        self.tablet.store(0, Ordering::Relaxed);
        self.file.store(0, Ordering::Relaxed);
        self.heartbeat.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }

    /// Queued events of `kind`
    pub fn count(&self, kind: EventKind) -> u64 {
        self.slot(kind).load(Ordering::Relaxed)
    }

    /// Estimated bytes of all queued events
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    fn slot(&self, kind: EventKind) -> &AtomicU64 {
        match kind {
            EventKind::Tablet => &self.tablet,
            EventKind::File => &self.file,
            EventKind::Heartbeat => &self.heartbeat,
        }
    }
}

fn sub(counter: &AtomicU64, value: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}

/// Bulk (file) events handed out but not yet finished
///
/// The connector acquires a slot when it starts transferring a file and
/// releases it once the file leaves its buffer. The queue stops serving the
/// bulk channel while the count is at the configured cap; `release` wakes
/// any retrieval blocked on that.
#[derive(Debug, Default)]
pub struct BulkInFlightCounter {
    count: AtomicUsize,
    released: Notify,
}

impl BulkInFlightCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn acquire(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Free one slot; extra releases are ignored
    pub fn release(&self) {
        let freed = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .is_ok();
        if freed {
            self.released.notify_waiters();
        }
    }

    /// Future resolved by the next `release`
    pub(crate) fn released(&self) -> tokio::sync::futures::Notified<'_> {
        self.released.notified()
    }
}
