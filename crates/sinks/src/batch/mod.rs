//! Tablet Batch - Size and time bounded coalescing of tablet events
//!
//! Small tablet events are encoded into one payload until the payload
//! reaches the batch's granted memory slice or the oldest event has waited
//! for the configured max delay. The slice comes from the process-wide
//! shared batch budget and may be smaller than requested.
//!
//! # Ownership
//!
//! The batch takes its own reference on every accepted event. The
//! references move to the sender with `take_events()`; `close()` and
//! `discard_events_of_pipe()` release them instead.
//!
//! ```text
//! on_event ──► construct payload ──► should_emit? ──► take_events ──► connector
//!                                          │
//!                                          └─ elapsed / max_delay ──► budget efficiency
//! ```
//!
//! # Example
//!
//! ```
//! use pipe_config::{BatchConfig, MemoryConfig};
//! use pipe_memory::ResourceContext;
//! use pipe_protocol::{EnrichedEvent, Event, TabletInsertion};
//! use pipe_sinks::TabletBatch;
//!
//! let context = ResourceContext::new(&MemoryConfig::default());
//! let config = BatchConfig { max_batch_size_bytes: 64, ..Default::default() };
//! let batch = TabletBatch::new("pipe_a", &config, &context);
//!
//! let event = EnrichedEvent::builder(
//!     Event::Tablet(TabletInsertion::new("root.sg.d1", 1, vec![0u8; 100])),
//!     "pipe_a",
//!     1,
//! )
//! .build();
//! assert!(batch.on_event(&event).unwrap());
//!
//! let emitted = batch.take_events();
//! assert_eq!(emitted.len(), 1);
//! ```

mod payload;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use pipe_config::BatchConfig;
use pipe_memory::{DynamicMemoryBlock, ResourceContext};
use pipe_metrics::{BatchMetrics, BatchMetricsProvider, BatchMetricsSnapshot};
use pipe_protocol::SharedEvent;
use tokio::time::Instant;

pub use payload::{BatchPayload, PlainBatchPayload};

pub(crate) const HOLDER: &str = "tablet_batch";

/// Callback receiving `(elapsed since first event, payload bytes, event count)`
/// each time a batch is found due
pub type BatchMetricRecorder = Arc<dyn Fn(Duration, u64, usize) + Send + Sync>;

/// Errors from batch construction
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Event kind has no place in a tablet batch
    #[error("{0} events cannot be batched")]
    UnsupportedEvent(&'static str),

    /// A field does not fit its length prefix
    #[error("{field} of {len} bytes exceeds the encodable length")]
    TooLarge { field: &'static str, len: usize },

    /// Construction failed in a custom payload
    #[error("failed to construct batch: {0}")]
    Construct(String),
}

impl BatchError {
    pub fn too_large(field: &'static str, len: usize) -> Self {
        Self::TooLarge { field, len }
    }

    pub fn construct(msg: impl Into<String>) -> Self {
        Self::Construct(msg.into())
    }

    /// Whether offering the same event again can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::UnsupportedEvent(_) | Self::TooLarge { .. })
    }
}

/// Result type for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

struct BatchState<P> {
    events: Vec<SharedEvent>,
    payload: P,
    first_event_at: Option<Instant>,
}

impl<P: BatchPayload> BatchState<P> {
    fn reset(&mut self) {
        self.events.clear();
        self.payload.reset();
        self.first_event_at = None;
    }
}

/// Events and encoded payload handed to the sender
///
/// The sender owns one reference on each event.
#[derive(Debug, Default)]
pub struct EmittedBatch {
    pub events: Vec<SharedEvent>,
    pub payload: Bytes,
}

impl EmittedBatch {
    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Accumulator coalescing tablet events of one pipe
pub struct TabletBatch<P: BatchPayload = PlainBatchPayload> {
    id: String,
    max_delay: Duration,
    state: Mutex<BatchState<P>>,
    block: Arc<DynamicMemoryBlock>,
    recorder: BatchMetricRecorder,
    metrics: Arc<BatchMetrics>,
    closed: AtomicBool,
}

/// Metrics handle for a `TabletBatch`
#[derive(Clone)]
pub struct BatchMetricsHandle {
    id: String,
    metrics: Arc<BatchMetrics>,
}

impl BatchMetricsProvider for BatchMetricsHandle {
    fn batch_id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> BatchMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl TabletBatch<PlainBatchPayload> {
    /// Create a batch using the plain tablet encoding
    pub fn new(id: impl Into<String>, config: &BatchConfig, context: &ResourceContext) -> Self {
        Self::with_payload(id, config, context, PlainBatchPayload::new())
    }
}

impl<P: BatchPayload> TabletBatch<P> {
    /// Create a batch with a custom payload encoding
    ///
    /// Registers a slice of `config.max_batch_size_bytes` with the shared
    /// batch budget, initialising the budget on first use.
    pub fn with_payload(
        id: impl Into<String>,
        config: &BatchConfig,
        context: &ResourceContext,
        payload: P,
    ) -> Self {
        let id = id.into();
        let block = context
            .init_batch_budget()
            .register_block(config.max_batch_size_bytes);

        if block.size() != config.max_batch_size_bytes {
            tracing::info!(
                batch = %id,
                requested = config.max_batch_size_bytes,
                granted = block.size(),
                "max batch size adjusted to the memory budget"
            );
        }

        Self {
            id,
            max_delay: config.max_delay(),
            state: Mutex::new(BatchState {
                events: Vec::new(),
                payload,
                first_event_at: None,
            }),
            block,
            recorder: Arc::new(|_, _, _| {}),
            metrics: Arc::new(BatchMetrics::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Install a recorder called whenever the batch is found due
    #[must_use]
    pub fn with_recorder(
        mut self,
        recorder: impl Fn(Duration, u64, usize) + Send + Sync + 'static,
    ) -> Self {
        self.recorder = Arc::new(recorder);
        self
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metrics_handle(&self) -> BatchMetricsHandle {
        BatchMetricsHandle {
            id: self.id.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Offer an event; returns whether the batch should now be emitted
    ///
    /// Closed batches reject every event with `Ok(false)`. Offering the
    /// event that was accepted last is a no-op. An event whose reference
    /// can no longer be taken is skipped with a warning. A construction
    /// error releases the reference taken for the event and is returned,
    /// so the caller can retry the whole call.
    pub fn on_event(&self, event: &SharedEvent) -> Result<bool> {
        let mut state = self.state.lock();
        if self.is_closed() {
            return Ok(false);
        }

        let duplicate = state
            .events
            .last()
            .is_some_and(|last| Arc::ptr_eq(last, event));

        if !duplicate {
            if event.increase_reference_count(HOLDER) {
                let before = state.payload.size();
                match state.payload.construct(event) {
                    Ok(true) => {
                        state.events.push(Arc::clone(event));
                        self.block
                            .add_usage(state.payload.size().saturating_sub(before));
                        // Delay runs from the first event actually kept
                        if state.first_event_at.is_none() {
                            state.first_event_at = Some(Instant::now());
                        }
                    }
                    Ok(false) => {
                        event.decrease_reference_count(HOLDER);
                    }
                    Err(error) => {
                        event.decrease_reference_count(HOLDER);
                        return Err(error);
                    }
                }
            } else {
                tracing::warn!(
                    batch = %self.id,
                    pipe = event.pipe_name(),
                    commit_id = %event.commit_id(),
                    "cannot take a reference on released event, skipping it"
                );
            }
        }

        Ok(self.should_emit_locked(&state))
    }

    /// Whether the batch is due
    ///
    /// True when the payload reached the granted size or the first event
    /// has waited for the max delay. An empty batch is never due. A due
    /// batch reports `elapsed / max_delay` to the memory budget and calls
    /// the recorder.
    pub fn should_emit(&self) -> bool {
        let state = self.state.lock();
        self.should_emit_locked(&state)
    }

    fn should_emit_locked(&self, state: &BatchState<P>) -> bool {
        let Some(first_event_at) = state.first_event_at else {
            return false;
        };

        let elapsed = first_event_at.elapsed();
        let total = state.payload.size();
        if total < self.block.size() && elapsed < self.max_delay {
            return false;
        }

        let max_delay = self.max_delay.as_secs_f64();
        let ratio = if max_delay > 0.0 {
            elapsed.as_secs_f64() / max_delay
        } else {
            1.0
        };
        self.block.update_efficiency(ratio);
        (self.recorder)(elapsed, total, state.events.len());
        self.metrics.record_emit(elapsed, total, state.events.len());
        true
    }

    /// Forget the accumulated events after a successful send
    ///
    /// References are not released; they belong to the sender.
    pub fn on_success(&self) {
        let mut state = self.state.lock();
        state.reset();
        self.block.reset_usage();
    }

    /// Take the accumulated events and payload, leaving the batch empty
    pub fn take_events(&self) -> EmittedBatch {
        let mut state = self.state.lock();
        let emitted = EmittedBatch {
            events: std::mem::take(&mut state.events),
            payload: state.payload.take_payload(),
        };
        state.reset();
        self.block.reset_usage();
        emitted
    }

    /// Close the batch, releasing every held reference and the memory slice
    pub fn close(&self) {
        let mut state = self.state.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for event in &state.events {
            event.clear_reference_count(HOLDER);
        }
        state.reset();
        self.block.close();

        tracing::debug!(batch = %self.id, "tablet batch closed");
    }

    /// Release and drop the events of one pipe instance
    ///
    /// The payload keeps the bytes already encoded for them unless no event
    /// is left, in which case the batch starts over.
    pub fn discard_events_of_pipe(&self, pipe_name: &str, region_id: i32) -> usize {
        let mut state = self.state.lock();
        let before = state.events.len();
        state.events.retain(|event| {
            if event.belongs_to(pipe_name, region_id) {
                event.clear_reference_count(HOLDER);
                false
            } else {
                true
            }
        });

        let removed = before - state.events.len();
        if removed > 0 && state.events.is_empty() {
            state.reset();
            self.block.reset_usage();
        }
        removed
    }

    /// Drop one reference on every accumulated event
    pub fn decrease_events_reference_count(&self, holder: &str) {
        let state = self.state.lock();
        for event in &state.events {
            event.decrease_reference_count(holder);
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Encoded payload bytes
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().payload.size()
    }

    /// Current capacity granted by the shared budget
    #[inline]
    pub fn max_batch_size(&self) -> u64 {
        self.block.size()
    }
}

impl<P: BatchPayload> Drop for TabletBatch<P> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "batch_test.rs"]
mod batch_test;
