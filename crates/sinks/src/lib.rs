//! Pipe - Sinks
//!
//! The dispatch side of a pipe: everything between the realtime queue and
//! the receiving peer.
//!
//! # Architecture
//!
//! Tablet events are coalesced into size and time bounded batches. File
//! events are streamed piece by piece with one request in flight and can
//! resume from the receiver's durable offset. Failures land in the
//! connector's retry queue with a per-event backoff.
//!
//! ```text
//! [RealtimeQueue] --> [SinkSubtask] --tablet--> [TabletBatch] --> [Connector] --> [TransferClient]
//!                                   --file----> [Connector] --> [TransferHandler] ---^
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `batch` | Tablet batch accumulator with memory-budgeted size |
//! | `transfer` | Resumable file transfer, clients, status handling |
//! | `connector` | In-flight buffer, retry queue, client pool owner |
//! | `subtask` | Consumer loop wiring queue, batch and connector |
//! | `util` | Read buffer pool, rate-limited failure logging |

pub mod batch;
pub mod connector;
pub mod subtask;
pub mod transfer;

/// Shared helpers (read buffers, rate-limited logging)
pub mod util;

pub use batch::{
    BatchError, BatchMetricRecorder, BatchMetricsHandle, BatchPayload, EmittedBatch,
    PlainBatchPayload, TabletBatch,
};
pub use connector::{Connector, ConnectorError, ConnectorMetricsHandle, ConnectorStatus};
pub use subtask::SinkSubtask;
pub use transfer::{
    ClientError, ClientPool, DefaultRetryPolicy, DefaultStatusHandler, LoopbackReceiver,
    PooledClient, RetryPolicy, StatusHandler, TransferClient, TransferContext, TransferError,
    TransferHandler,
};
