//! Realtime priority queue
//!
//! Two channels behind one per-queue lock: a FIFO for ordinary events
//! (tablets and heartbeats) and a deque for bulk (file) events.
//!
//! # Retrieval policy
//!
//! ```text
//! polls_since_bulk >= bulk_poll_threshold && in_flight < cap ──► bulk channel, counter = 0
//! otherwise ──► FIFO front
//! FIFO empty && in_flight < cap ──► bulk channel
//!
//! bulk channel: historical += 1
//!     historical % historical_threshold == 0 ──► oldest (front)
//!     otherwise                              ──► freshest (back)
//! ```
//!
//! Every retrieval not served by the threshold increments
//! `polls_since_bulk`. The freshest
//! file is usually the one whose data is still hot, while every Nth bulk
//! retrieval drains the backlog from the other end.
//!
//! # Ownership
//!
//! Queued events keep the reference they were offered with. A heartbeat
//! offered directly behind another heartbeat is dropped and its reference
//! released. Discards release references with `clear_reference_count`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pipe_config::QueueConfig;
use pipe_memory::MemoryBlock;
use pipe_metrics::{QueueMetrics, QueueMetricsProvider, QueueMetricsSnapshot};
use pipe_protocol::SharedEvent;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::counter::{BulkInFlightCounter, EventCounter};

const HOLDER: &str = "realtime_queue";

#[derive(Debug, Default)]
struct Channels {
    fifo: VecDeque<SharedEvent>,
    bulk: VecDeque<SharedEvent>,
    /// Retrievals since the bulk channel was last served by the threshold
    polls_since_bulk: usize,
    /// Bulk retrievals, drives the oldest/freshest choice
    historical_polls: u64,
}

impl Channels {
    fn pop_bulk(&mut self, historical_threshold: u64) -> Option<SharedEvent> {
        if self.bulk.is_empty() {
            return None;
        }
        self.historical_polls += 1;
        if self.historical_polls % historical_threshold == 0 {
            self.bulk.pop_front()
        } else {
            self.bulk.pop_back()
        }
    }

    fn len(&self) -> usize {
        self.fifo.len() + self.bulk.len()
    }
}

/// Queue admitting events without bound, preferring live events over the
/// bulk backlog without starving either
pub struct RealtimeQueue {
    pipe_name: String,
    bulk_poll_threshold: usize,
    historical_poll_threshold: u64,
    max_waiting_bulk_count: usize,
    max_blocking_time: Duration,

    channels: Mutex<Channels>,
    in_flight: Arc<BulkInFlightCounter>,
    counter: EventCounter,
    memory: MemoryBlock,

    size: Arc<AtomicUsize>,
    metrics: Arc<QueueMetrics>,
    offered: Notify,
    shutdown: AtomicBool,
}

/// Metrics handle for a `RealtimeQueue`
///
/// Stays valid after the queue is dropped.
#[derive(Clone)]
pub struct QueueMetricsHandle {
    id: String,
    size: Arc<AtomicUsize>,
    metrics: Arc<QueueMetrics>,
}

impl QueueMetricsProvider for QueueMetricsHandle {
    fn queue_id(&self) -> &str {
        &self.id
    }

    fn queued(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> QueueMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl RealtimeQueue {
    /// Create a queue for `pipe_name`
    ///
    /// `in_flight` is shared with the connector that transfers bulk events;
    /// `memory` receives the estimated bytes of queued events.
    pub fn new(
        pipe_name: impl Into<String>,
        config: &QueueConfig,
        in_flight: Arc<BulkInFlightCounter>,
        memory: MemoryBlock,
    ) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            bulk_poll_threshold: config.bulk_poll_threshold,
            historical_poll_threshold: config.effective_historical_poll_threshold(),
            max_waiting_bulk_count: config.max_waiting_bulk_count,
            max_blocking_time: config.max_blocking_time(),
            channels: Mutex::new(Channels::default()),
            in_flight,
            counter: EventCounter::new(),
            memory,
            size: Arc::new(AtomicUsize::new(0)),
            metrics: Arc::new(QueueMetrics::new()),
            offered: Notify::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    pub fn metrics_handle(&self) -> QueueMetricsHandle {
        QueueMetricsHandle {
            id: self.pipe_name.clone(),
            size: Arc::clone(&self.size),
            metrics: Arc::clone(&self.metrics),
        }
    }

    #[inline]
    pub fn event_counter(&self) -> &EventCounter {
        &self.counter
    }

    #[inline]
    pub fn in_flight(&self) -> &Arc<BulkInFlightCounter> {
        &self.in_flight
    }

    /// Bytes of queued events as accounted in the memory block
    #[inline]
    pub fn memory_usage(&self) -> u64 {
        self.memory.usage()
    }

    /// Admit an event
    ///
    /// Returns false when the event was a heartbeat directly behind another
    /// queued heartbeat; that event's reference has been released.
    pub fn offer(&self, event: SharedEvent) -> bool {
        {
            let mut channels = self.channels.lock();
            if event.event().is_bulk() {
                channels.bulk.push_back(Arc::clone(&event));
            } else if event.event().is_heartbeat()
                && channels
                    .fifo
                    .back()
                    .is_some_and(|last| last.event().is_heartbeat())
            {
                drop(channels);
                event.decrease_reference_count(HOLDER);
                self.metrics.record_heartbeat_coalesced();
                return false;
            } else {
                channels.fifo.push_back(Arc::clone(&event));
            }
            self.size.store(channels.len(), Ordering::Relaxed);
        }

        let bytes = self.counter.increase(&event);
        self.memory.add_usage(bytes);
        self.metrics.record_offered();
        self.offered.notify_waiters();
        true
    }

    /// Retrieve the next event without waiting
    pub fn poll(&self) -> Option<SharedEvent> {
        let bulk_allowed = self.in_flight.get() < self.max_waiting_bulk_count;

        let (event, from_bulk) = {
            let mut channels = self.channels.lock();
            let mut event = None;
            let mut from_bulk = false;

            if channels.polls_since_bulk >= self.bulk_poll_threshold && bulk_allowed {
                event = channels.pop_bulk(self.historical_poll_threshold);
                from_bulk = event.is_some();
                channels.polls_since_bulk = 0;
            }

            if event.is_none() {
                event = channels.fifo.pop_front();
                if event.is_none() && bulk_allowed {
                    event = channels.pop_bulk(self.historical_poll_threshold);
                    from_bulk = event.is_some();
                }
                if event.is_some() {
                    channels.polls_since_bulk += 1;
                }
            }
            self.size.store(channels.len(), Ordering::Relaxed);
            (event, from_bulk)
        };

        let event = event?;
        let bytes = self.counter.decrease(&event);
        self.memory.reduce_usage(bytes);
        self.metrics.record_polled(from_bulk);

        tracing::trace!(
            pipe = %self.pipe_name,
            kind = event.event().kind().as_str(),
            bulk = from_bulk,
            "event polled"
        );
        Some(event)
    }

    /// Retrieve the next event, waiting up to the configured blocking time
    pub async fn waited_poll(&self) -> Option<SharedEvent> {
        self.poll_wait(self.max_blocking_time).await
    }

    /// Retrieve the next event, waiting up to `timeout`
    ///
    /// Wakes on a new offer, on a freed bulk slot and on shutdown. Returns
    /// `None` on timeout or once the queue is shut down.
    pub async fn poll_wait(&self, timeout: Duration) -> Option<SharedEvent> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_shutdown() {
                return None;
            }

            let offered = self.offered.notified();
            let released = self.in_flight.released();
            tokio::pin!(offered);
            tokio::pin!(released);
            offered.as_mut().enable();
            released.as_mut().enable();

            if let Some(event) = self.poll() {
                return Some(event);
            }
            if self.is_shutdown() {
                return None;
            }

            let woke = tokio::time::timeout_at(deadline, async {
                tokio::select! {
                    _ = &mut offered => {}
                    _ = &mut released => {}
                }
            })
            .await;

            if woke.is_err() {
                return None;
            }
        }
    }

    /// Oldest ordinary event, else the oldest bulk event
    pub fn peek(&self) -> Option<SharedEvent> {
        let channels = self.channels.lock();
        channels
            .fifo
            .front()
            .or_else(|| channels.bulk.front())
            .cloned()
    }

    /// Events in both channels
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        let channels = self.channels.lock();
        channels.fifo.is_empty() && channels.bulk.is_empty()
    }

    /// Events in the bulk channel
    pub fn bulk_count(&self) -> usize {
        self.channels.lock().bulk.len()
    }

    /// Visit every queued event, ordinary channel first
    pub fn for_each(&self, mut f: impl FnMut(&SharedEvent)) {
        let channels = self.channels.lock();
        channels.fifo.iter().for_each(&mut f);
        channels.bulk.iter().for_each(&mut f);
    }

    /// Remove every event without touching references
    ///
    /// The caller takes over the references of the returned events.
    pub fn clear(&self) -> Vec<SharedEvent> {
        let drained: Vec<SharedEvent> = {
            let mut channels = self.channels.lock();
            let fifo = std::mem::take(&mut channels.fifo);
            let bulk = std::mem::take(&mut channels.bulk);
            self.size.store(0, Ordering::Relaxed);
            fifo.into_iter().chain(bulk).collect()
        };

        self.counter.reset();
        self.memory.reduce_usage(self.memory.usage());
        drained
    }

    /// Remove every event and release its reference
    pub fn discard_all_events(&self) {
        let drained = self.clear();
        let count = drained.len();
        for event in drained {
            event.clear_reference_count(HOLDER);
        }
        self.metrics.record_discarded(count as u64);

        tracing::debug!(pipe = %self.pipe_name, count, "discarded all queued events");
    }

    /// Remove and release the events of one pipe instance
    ///
    /// Returns the number of events discarded.
    pub fn discard_events_of_pipe(&self, pipe_name: &str, region_id: i32) -> usize {
        let mut removed = Vec::new();
        {
            let mut channels = self.channels.lock();
            let Channels { fifo, bulk, .. } = &mut *channels;
            for channel in [fifo, bulk] {
                channel.retain(|event| {
                    if event.belongs_to(pipe_name, region_id) {
                        removed.push(Arc::clone(event));
                        false
                    } else {
                        true
                    }
                });
            }
            self.size.store(channels.len(), Ordering::Relaxed);
        }

        for event in &removed {
            event.clear_reference_count(HOLDER);
            let bytes = self.counter.decrease(event);
            self.memory.reduce_usage(bytes);
        }
        self.metrics.record_discarded(removed.len() as u64);

        if !removed.is_empty() {
            tracing::info!(
                pipe = pipe_name,
                region = region_id,
                count = removed.len(),
                "discarded queued events of pipe"
            );
        }
        removed.len()
    }

    /// Wake blocked retrievals and make them return `None`
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.offered.notify_waiters();
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}
