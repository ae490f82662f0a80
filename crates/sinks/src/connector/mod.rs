//! Connector - Dispatch of files and tablet batches to one receiver
//!
//! The connector owns everything a pipe needs to talk to its peer: the
//! client pool, the in-flight buffer of file transfers (keyed by commit
//! id), the retry queue, the status handler and the retry policy.
//!
//! # Architecture
//!
//! ```text
//!                   ┌────────────── Connector ───────────────┐
//! transfer_file ──► │ buffer[commit_id] ──spawn──► TransferHandler ──► ClientPool
//!                   │      ▲                          │ failure
//! send_batch ─────► │      │                          ▼
//!                   │      └──── retry worker ◄── retry queue (ready_at)
//!                   └────────────────────────────────────────┘
//! ```
//!
//! # Ownership
//!
//! `transfer_file` takes its own reference on the event; the transfer
//! releases it on success. `send_batch` receives the references taken by
//! the tablet batch and releases them once the batch is acknowledged.
//! Failed events keep their reference while waiting in the retry queue.
//! Discards and `close()` force the count to zero.
//!
//! Every buffered file occupies one slot of the `BulkInFlightCounter`
//! shared with the realtime queue until it is removed from the buffer, so
//! a file waiting for a retry still holds back the next bulk retrieval.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use pipe_config::TransferConfig;
use pipe_metrics::{ConnectorMetricsProvider, ConnectorMetricsSnapshot, TransferMetrics};
use pipe_pipeline::BulkInFlightCounter;
use pipe_protocol::{
    CommitId, ConsensusGroupId, Event, SharedEvent, TabletBatchRequest, TransferRequest,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::batch::{self, BatchPayload, EmittedBatch, PlainBatchPayload};
use crate::transfer::{
    self, ClientError, ClientPool, DefaultRetryPolicy, DefaultStatusHandler, RetryPolicy,
    StatusHandler, TransferContext, TransferError, TransferHandler,
};
use crate::util::BufferPool;

const HOLDER: &str = "connector";

/// Errors returned to callers of the connector
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("connector is closed")]
    Closed,

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Result type for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Live state of a connector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorStatus {
    /// Events waiting in the retry queue
    pub retrying: usize,
    /// File transfers registered and not yet completed
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Gauges {
    retrying: AtomicUsize,
    in_flight: AtomicUsize,
}

struct RetryEntry {
    event: SharedEvent,
    ready_at: Instant,
}

/// Metrics handle for a `Connector`
#[derive(Clone)]
pub struct ConnectorMetricsHandle {
    id: String,
    metrics: Arc<TransferMetrics>,
    gauges: Arc<Gauges>,
}

impl ConnectorMetricsProvider for ConnectorMetricsHandle {
    fn connector_id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> ConnectorMetricsSnapshot {
        ConnectorMetricsSnapshot {
            transfer: self.metrics.snapshot(),
            retrying: self.gauges.retrying.load(Ordering::Relaxed),
            in_flight: self.gauges.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Sends the events of one pipe to its receiver
pub struct Connector {
    id: String,
    config: TransferConfig,
    clients: Arc<ClientPool>,
    buffers: BufferPool,
    in_flight: Arc<BulkInFlightCounter>,
    buffer: Mutex<HashMap<CommitId, SharedEvent>>,
    retry_queue: Mutex<Vec<RetryEntry>>,
    retry_added: Notify,
    status_handler: Box<dyn StatusHandler>,
    retry_policy: Box<dyn RetryPolicy>,
    metrics: Arc<TransferMetrics>,
    gauges: Arc<Gauges>,
    tasks: AtomicUsize,
    changed: Notify,
    closed: AtomicBool,
}

impl Connector {
    /// Create a connector over `clients`
    ///
    /// `in_flight` is the counter shared with the pipe's realtime queue.
    pub fn new(
        id: impl Into<String>,
        config: &TransferConfig,
        clients: Arc<ClientPool>,
        in_flight: Arc<BulkInFlightCounter>,
    ) -> Self {
        Self {
            id: id.into(),
            buffers: BufferPool::new(config.max_client_number, config.read_buffer_size),
            config: config.clone(),
            clients,
            in_flight,
            buffer: Mutex::new(HashMap::new()),
            retry_queue: Mutex::new(Vec::new()),
            retry_added: Notify::new(),
            status_handler: Box::new(DefaultStatusHandler),
            retry_policy: Box::new(DefaultRetryPolicy),
            metrics: Arc::new(TransferMetrics::new()),
            gauges: Arc::new(Gauges::default()),
            tasks: AtomicUsize::new(0),
            changed: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_status_handler(mut self, handler: impl StatusHandler + 'static) -> Self {
        self.status_handler = Box::new(handler);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Box::new(policy);
        self
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metrics_handle(&self) -> ConnectorMetricsHandle {
        ConnectorMetricsHandle {
            id: self.id.clone(),
            metrics: Arc::clone(&self.metrics),
            gauges: Arc::clone(&self.gauges),
        }
    }

    pub fn status(&self) -> ConnectorStatus {
        ConnectorStatus {
            retrying: self.retry_queue.lock().len(),
            in_flight: self.buffer.lock().len(),
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Start transferring a file event in the background
    ///
    /// Returns `Ok(false)` without starting anything when the event was
    /// already released or a transfer for its commit id is in flight.
    pub fn transfer_file(self: &Arc<Self>, event: &SharedEvent) -> Result<bool> {
        if self.is_closed() {
            return Err(ConnectorError::Closed);
        }

        let handler = TransferHandler::new(Arc::clone(event), &self.config)?;
        if !event.increase_reference_count(transfer::HOLDER) {
            tracing::warn!(
                connector = %self.id,
                pipe = event.pipe_name(),
                commit_id = %event.commit_id(),
                "cannot take a reference on released file event, skipping it"
            );
            return Ok(false);
        }

        {
            let mut buffer = self.buffer.lock();
            if buffer.contains_key(&event.commit_id()) {
                drop(buffer);
                event.decrease_reference_count(transfer::HOLDER);
                tracing::debug!(
                    connector = %self.id,
                    commit_id = %event.commit_id(),
                    "file transfer already in flight"
                );
                return Ok(false);
            }
            buffer.insert(event.commit_id(), Arc::clone(event));
            self.gauges.in_flight.store(buffer.len(), Ordering::Relaxed);
        }

        self.in_flight.acquire();
        event.reset_retry_interval(self.config.initial_retry_interval());
        self.spawn_transfer(handler);
        Ok(true)
    }

    /// Send an emitted tablet batch and wait for the answer
    ///
    /// The batch's references are released on success. On failure the
    /// events move to the retry queue and the error is returned.
    pub async fn send_batch(&self, batch: EmittedBatch) -> Result<()> {
        if self.is_closed() {
            for event in &batch.events {
                event.decrease_reference_count(batch::HOLDER);
            }
            return Err(ConnectorError::Closed);
        }
        if batch.is_empty() {
            return Ok(());
        }

        for event in &batch.events {
            event.reset_retry_interval(self.config.initial_retry_interval());
        }
        self.send_tablets(batch.events, batch.payload).await?;
        Ok(())
    }

    async fn send_tablets(
        &self,
        events: Vec<SharedEvent>,
        payload: Bytes,
    ) -> std::result::Result<(), TransferError> {
        let request = TransferRequest::TabletBatch(TabletBatchRequest {
            payload,
            event_count: events.len(),
            consensus_group_id: ConsensusGroupId(
                events.first().map_or(0, |event| event.region_id()),
            ),
            node_id: self.config.node_id,
        });

        match self.request(request).await {
            Ok(()) => {
                self.metrics.record_batch(events.len());
                for event in &events {
                    event.decrease_reference_count(batch::HOLDER);
                }
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    connector = %self.id,
                    events = events.len(),
                    error = %error,
                    "failed to send tablet batch"
                );
                let increase = self.retry_policy.should_increase_interval(&error);
                for event in events {
                    if increase {
                        event.increase_retry_interval();
                    }
                    self.add_failure_event_to_retry_queue(event);
                }
                self.metrics.record_retry();
                Err(error)
            }
        }
    }

    /// One request on a pooled client with the configured timeout
    async fn request(&self, request: TransferRequest) -> std::result::Result<(), TransferError> {
        let name = request.name();
        let client = self.clients.acquire().await;
        let timeout = self.config.request_timeout();

        let response = match tokio::time::timeout(timeout, client.transfer(request)).await {
            Ok(response) => response?,
            Err(_) => return Err(ClientError::Timeout(timeout).into()),
        };
        if !response.code().is_accepted() {
            self.status_handler.handle(&response.status, name)?;
        }
        Ok(())
    }

    fn spawn_transfer(self: &Arc<Self>, handler: TransferHandler) {
        self.tasks.fetch_add(1, Ordering::AcqRel);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let client = this.clients.acquire().await;
            handler.transfer(client, &this.buffers, this.as_ref()).await;
            this.task_done();
        });
    }

    fn spawn_tablet_retry(self: &Arc<Self>, event: SharedEvent, payload: Bytes) {
        self.tasks.fetch_add(1, Ordering::AcqRel);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            // Failure already re-queued the event
            let _ = this.send_tablets(vec![event], payload).await;
            this.task_done();
        });
    }

    fn task_done(&self) {
        self.tasks.fetch_sub(1, Ordering::AcqRel);
        self.changed.notify_waiters();
    }

    /// Re-submit retry-queue events once their retry interval has passed
    ///
    /// Runs until `cancel` fires. Files start a new transfer; tablets are
    /// re-encoded and sent one per batch.
    pub async fn run_retry_worker(self: Arc<Self>, cancel: CancellationToken) {
        tracing::debug!(connector = %self.id, "retry worker starting");

        loop {
            let next = self.resubmit_due();
            let wait = async {
                match next {
                    Some(ready_at) => tokio::time::sleep_until(ready_at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.retry_added.notified() => {}
                _ = wait => {}
            }
        }

        tracing::debug!(connector = %self.id, "retry worker stopped");
    }

    /// Re-submit due events in commit order; returns the next ready time
    fn resubmit_due(self: &Arc<Self>) -> Option<Instant> {
        // Keeps the connector busy while due events are between queue and task
        self.tasks.fetch_add(1, Ordering::AcqRel);
        let now = Instant::now();
        let (mut due, next) = {
            let mut queue = self.retry_queue.lock();
            let mut due = Vec::new();
            queue.retain_mut(|entry| {
                if entry.ready_at <= now {
                    due.push(Arc::clone(&entry.event));
                    false
                } else {
                    true
                }
            });
            self.gauges.retrying.store(queue.len(), Ordering::Relaxed);
            (due, queue.iter().map(|entry| entry.ready_at).min())
        };

        due.sort_by_key(|event| event.commit_id());
        for event in due {
            self.resubmit(event);
        }
        self.task_done();
        next
    }

    fn resubmit(self: &Arc<Self>, event: SharedEvent) {
        if event.is_released() {
            return;
        }
        tracing::debug!(
            connector = %self.id,
            pipe = event.pipe_name(),
            commit_id = %event.commit_id(),
            kind = event.event().kind().as_str(),
            "retrying event"
        );

        match event.event() {
            Event::File(_) => match TransferHandler::new(Arc::clone(&event), &self.config) {
                Ok(handler) => self.spawn_transfer(handler),
                Err(error) => {
                    tracing::error!(
                        connector = %self.id,
                        commit_id = %event.commit_id(),
                        error = %error,
                        "cannot retry file event, dropping it"
                    );
                    if self.remove_event_from_buffer(&event) {
                        event.decrease_reference_count(transfer::HOLDER);
                    }
                }
            },
            Event::Tablet(_) => {
                let mut payload = PlainBatchPayload::new();
                match payload.construct(&event) {
                    Ok(true) => self.spawn_tablet_retry(event, payload.take_payload()),
                    Ok(false) => {
                        event.decrease_reference_count(batch::HOLDER);
                    }
                    Err(error) => {
                        tracing::error!(
                            connector = %self.id,
                            commit_id = %event.commit_id(),
                            error = %error,
                            "cannot re-encode tablet event, dropping it"
                        );
                        event.decrease_reference_count(batch::HOLDER);
                    }
                }
            }
            Event::Heartbeat(_) => {
                event.decrease_reference_count(HOLDER);
            }
        }
    }

    /// Drop the retry-queue and buffer entries of one pipe instance
    ///
    /// References are forced to zero. Transfers already running are not
    /// cancelled; their outcome is ignored. Returns the number of events
    /// released.
    pub fn discard_events_of_pipe(&self, pipe_name: &str, region_id: i32) -> usize {
        let mut released = 0;

        {
            let mut queue = self.retry_queue.lock();
            queue.retain(|entry| {
                if entry.event.belongs_to(pipe_name, region_id) {
                    released += usize::from(entry.event.clear_reference_count(HOLDER));
                    false
                } else {
                    true
                }
            });
            self.gauges.retrying.store(queue.len(), Ordering::Relaxed);
        }

        {
            let mut buffer = self.buffer.lock();
            buffer.retain(|_, event| {
                if event.belongs_to(pipe_name, region_id) {
                    released += usize::from(event.clear_reference_count(HOLDER));
                    self.in_flight.release();
                    false
                } else {
                    true
                }
            });
            self.gauges.in_flight.store(buffer.len(), Ordering::Relaxed);
        }

        if released > 0 {
            tracing::info!(
                connector = %self.id,
                pipe = pipe_name,
                region = region_id,
                released,
                "discarded connector events of pipe"
            );
        }
        self.changed.notify_waiters();
        released
    }

    /// Stop accepting events and release everything buffered or queued
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let retrying = std::mem::take(&mut *self.retry_queue.lock());
        for entry in &retrying {
            entry.event.clear_reference_count(HOLDER);
        }

        let buffered: Vec<_> = self.buffer.lock().drain().map(|(_, event)| event).collect();
        for event in &buffered {
            event.clear_reference_count(HOLDER);
            self.in_flight.release();
        }

        self.gauges.retrying.store(0, Ordering::Relaxed);
        self.gauges.in_flight.store(0, Ordering::Relaxed);
        self.changed.notify_waiters();

        tracing::info!(
            connector = %self.id,
            retrying = retrying.len(),
            in_flight = buffered.len(),
            "connector closed"
        );
    }

    /// Nothing buffered, queued for retry or running
    pub fn is_idle(&self) -> bool {
        self.tasks.load(Ordering::Acquire) == 0
            && self.retry_queue.lock().is_empty()
            && self.buffer.lock().is_empty()
    }

    /// Wait until the connector is idle; returns false on timeout
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if self.is_idle() {
                return true;
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return self.is_idle();
            }
        }
    }
}

impl TransferContext for Connector {
    fn status_handler(&self) -> &dyn StatusHandler {
        self.status_handler.as_ref()
    }

    fn retry_policy(&self) -> &dyn RetryPolicy {
        self.retry_policy.as_ref()
    }

    fn metrics(&self) -> &TransferMetrics {
        &self.metrics
    }

    fn remove_event_from_buffer(&self, event: &SharedEvent) -> bool {
        let removed = {
            let mut buffer = self.buffer.lock();
            let matches = buffer
                .get(&event.commit_id())
                .is_some_and(|buffered| Arc::ptr_eq(buffered, event));
            if matches {
                buffer.remove(&event.commit_id());
            }
            self.gauges.in_flight.store(buffer.len(), Ordering::Relaxed);
            matches
        };

        if removed {
            self.in_flight.release();
            self.changed.notify_waiters();
        }
        removed
    }

    fn add_failure_event_to_retry_queue(&self, event: SharedEvent) {
        if self.is_closed() {
            event.clear_reference_count(HOLDER);
            return;
        }
        if event.is_released() {
            tracing::debug!(
                connector = %self.id,
                commit_id = %event.commit_id(),
                "event released meanwhile, not retrying it"
            );
            return;
        }

        let ready_at = Instant::now() + event.retry_interval();
        {
            let mut queue = self.retry_queue.lock();
            queue.push(RetryEntry { event, ready_at });
            self.gauges.retrying.store(queue.len(), Ordering::Relaxed);
        }
        self.retry_added.notify_one();
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.close();
    }
}
