//! Pipe Pipeline - Realtime priority queue
//!
//! The admission stage between capture and dispatch. Producers offer events
//! without bound; the sink subtask retrieves them one at a time.
//!
//! # Architecture
//!
//! ```text
//! [Capture]                         [RealtimeQueue]                      [Sink subtask]
//!  tablets, heartbeats ──offer──► FIFO ──────────┐
//!                                                ├──poll / poll_wait──► batch / connector
//!  files ───────────────offer──► bulk deque ─────┘
//!                                    ▲
//!                                    └── BulkInFlightCounter (shared with the connector)
//! ```
//!
//! # Key Design
//!
//! - **Per-queue lock**: both channels and both scheduling counters sit
//!   behind one `parking_lot::Mutex`, so size and peek see a consistent
//!   union and nothing is shared between unrelated pipes
//! - **Heartbeat coalescing**: at most one heartbeat waits at the FIFO tail
//! - **Bulk cap**: the bulk channel is served only while fewer than
//!   `max_waiting_bulk_count` files are in flight
//! - **Async wait**: `poll_wait` suspends on `tokio::sync::Notify` until an
//!   offer, a freed bulk slot or shutdown
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use pipe_config::QueueConfig;
//! use pipe_memory::{MemoryManager, MemoryPool};
//! use pipe_pipeline::{BulkInFlightCounter, RealtimeQueue};
//! use pipe_protocol::{EnrichedEvent, Event, Heartbeat};
//!
//! let manager = MemoryManager::new(1 << 20);
//! let queue = RealtimeQueue::new(
//!     "pipe_a",
//!     &QueueConfig::default(),
//!     Arc::new(BulkInFlightCounter::new()),
//!     manager.allocate_empty(MemoryPool::Queue),
//! );
//!
//! queue.offer(EnrichedEvent::builder(Event::Heartbeat(Heartbeat::default()), "pipe_a", 1).build());
//! assert_eq!(queue.len(), 1);
//! assert!(queue.poll().is_some());
//! ```

mod counter;
mod queue;

pub use counter::{BulkInFlightCounter, EventCounter};
pub use queue::{QueueMetricsHandle, RealtimeQueue};
