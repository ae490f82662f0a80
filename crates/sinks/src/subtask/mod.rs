//! Sink subtask - Consumer loop of one pipe
//!
//! Drains the pipe's realtime queue and dispatches each event:
//!
//! ```text
//! RealtimeQueue ──waited_poll──► tablet    ──► TabletBatch ──due──► Connector::send_batch
//!                                file      ──► (flush batch) ──► Connector::transfer_file
//!                                heartbeat ──► flush batch if due
//! ```
//!
//! A polled event arrives with the reference it was offered with. The
//! batch and the connector take their own, so the subtask drops the
//! offered reference once the event is dispatched.
//!
//! A tablet the batch cannot encode for a permanent reason (oversized
//! field, unsupported kind) is dropped. Any other construction failure
//! keeps the tablet, and the loop offers it to the batch again before
//! polling anything newer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pipe_pipeline::RealtimeQueue;
use pipe_protocol::{Event, SharedEvent};
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchPayload, PlainBatchPayload, TabletBatch};
use crate::connector::Connector;
use crate::util::RateLimitedLogger;

const HOLDER: &str = "sink_subtask";

/// Pause before a tablet that failed construction is offered again
pub const BATCH_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Wires one pipe's queue, batch and connector together
pub struct SinkSubtask<P: BatchPayload = PlainBatchPayload> {
    queue: Arc<RealtimeQueue>,
    batch: TabletBatch<P>,
    connector: Arc<Connector>,
    /// Tablet waiting to be offered to the batch again
    pending: Mutex<Option<SharedEvent>>,
    errors: RateLimitedLogger,
}

impl<P: BatchPayload> SinkSubtask<P> {
    pub fn new(queue: Arc<RealtimeQueue>, batch: TabletBatch<P>, connector: Arc<Connector>) -> Self {
        Self {
            queue,
            batch,
            connector,
            pending: Mutex::new(None),
            errors: RateLimitedLogger::default(),
        }
    }

    #[inline]
    pub fn queue(&self) -> &Arc<RealtimeQueue> {
        &self.queue
    }

    #[inline]
    pub fn batch(&self) -> &TabletBatch<P> {
        &self.batch
    }

    #[inline]
    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    /// Dispatch failures seen so far, logged or suppressed
    pub fn failure_count(&self) -> u64 {
        self.errors.total_count()
    }

    /// Whether a tablet is waiting to be offered to the batch again
    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Consume the queue until `cancel` fires or the queue shuts down
    ///
    /// Events still in the batch are sent before returning.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(pipe = self.queue.pipe_name(), "sink subtask starting");

        loop {
            let pending = self.pending.lock().take();
            if let Some(event) = pending {
                if self.queue.is_shutdown() {
                    *self.pending.lock() = Some(event);
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        *self.pending.lock() = Some(event);
                        break;
                    }
                    _ = tokio::time::sleep(BATCH_RETRY_DELAY) => {}
                }
                self.dispatch(event).await;
                continue;
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.queue.waited_poll() => polled,
            };

            match polled {
                Some(event) => self.dispatch(event).await,
                None if self.queue.is_shutdown() => break,
                None => self.flush_if_due().await,
            }
        }

        self.flush().await;
        tracing::info!(pipe = self.queue.pipe_name(), "sink subtask stopped");
    }

    /// Route one polled event and drop the reference it arrived with
    pub async fn dispatch(&self, event: SharedEvent) {
        match event.event() {
            Event::Tablet(_) => match self.batch.on_event(&event) {
                Ok(true) => self.flush().await,
                Ok(false) => {}
                Err(error) if error.is_permanent() => {
                    self.errors.error("tablet cannot be batched, dropping it", &error);
                }
                Err(error) => {
                    // Keeps the offered reference until the retry
                    self.errors.warn("failed to add tablet to batch, retrying it", &error);
                    *self.pending.lock() = Some(event);
                    return;
                }
            },
            Event::File(_) => {
                // Earlier tablets reach the receiver before the file
                self.flush().await;
                if let Err(error) = self.connector.transfer_file(&event) {
                    self.errors.warn("failed to start file transfer", &error);
                }
            }
            Event::Heartbeat(_) => self.flush_if_due().await,
        }

        event.decrease_reference_count(HOLDER);
    }

    async fn flush_if_due(&self) {
        if self.batch.should_emit() {
            self.flush().await;
        }
    }

    async fn flush(&self) {
        let emitted = self.batch.take_events();
        if emitted.is_empty() {
            return;
        }

        let count = emitted.len();
        match self.connector.send_batch(emitted).await {
            Ok(()) => {
                tracing::debug!(pipe = self.queue.pipe_name(), events = count, "tablet batch sent");
            }
            Err(error) => {
                self.errors.warn("failed to send tablet batch", &error);
            }
        }
    }

    /// Discard everything belonging to one pipe instance
    ///
    /// Returns the number of events released across queue, batch and
    /// connector.
    pub fn teardown(&self, pipe_name: &str, region_id: i32) -> usize {
        let mut queued = self.queue.discard_events_of_pipe(pipe_name, region_id);
        {
            let mut pending = self.pending.lock();
            if pending
                .as_ref()
                .is_some_and(|event| event.pipe_name() == pipe_name && event.region_id() == region_id)
                && let Some(event) = pending.take()
                && event.clear_reference_count(HOLDER)
            {
                queued += 1;
            }
        }
        let batched = self.batch.discard_events_of_pipe(pipe_name, region_id);
        let connector = self.connector.discard_events_of_pipe(pipe_name, region_id);

        tracing::info!(
            pipe = pipe_name,
            region = region_id,
            queued,
            batched,
            connector,
            "pipe torn down"
        );
        queued + batched + connector
    }

    /// Shut the queue down and release everything still held
    pub fn close(&self) {
        self.queue.shutdown();
        self.queue.discard_all_events();
        if let Some(event) = self.pending.lock().take() {
            event.clear_reference_count(HOLDER);
        }
        self.batch.close();
        self.connector.close();
    }
}
