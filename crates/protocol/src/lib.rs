//! Pipe Protocol - Core types for the pipe transport stage
//!
//! This crate provides the types that flow from the capture layer through
//! the realtime queue, the tablet batch and the file transfer handler:
//! - `Event` - Closed set of change events (tablet, file, heartbeat)
//! - `EnrichedEvent` - Event plus pipe identity, commit id and a reference count
//! - `CommitId`, `ConsensusGroupId`, `ProgressIndex` - Opaque consensus markers
//! - `TransferRequest` / `TransferResponse` - Messages exchanged with a peer
//!
//! # Ownership
//!
//! An `EnrichedEvent` is shared as `Arc<EnrichedEvent>` (`SharedEvent`).
//! The `Arc` only keeps the memory alive; whether the underlying data may
//! be reclaimed is decided by the explicit reference count, which runs the
//! event's `ReleaseHook` exactly once when the last holder lets go.
//!
//! ```text
//! capture (count = 1) ──► queue ──► batch / transfer (+1) ──► sent (-1) ──► release hook
//! ```

mod commit;
mod enriched;
mod error;
mod event;
mod transfer;

pub use commit::{CommitId, ConsensusGroupId, ProgressIndex};
pub use enriched::{
    EnrichedEvent, EnrichedEventBuilder, MAX_RETRY_INTERVAL, ReleaseHook, SharedEvent,
    next_retry_interval,
};
pub use error::ProtocolError;
pub use event::{Event, EventKind, FileInsertion, Heartbeat, TabletInsertion};
pub use transfer::{
    FileMeta, FilePiece, FileSeal, StatusCode, TabletBatchRequest, TransferRequest,
    TransferResponse, TransferStatus,
};

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod enriched_test;
