//! Messages exchanged with a peer during transfer
//!
//! A file transfer is a sequence of `FilePiece` requests (modification file
//! first, then the data file) followed by exactly one `FileSeal`. Tablet
//! batches travel as a single `TabletBatch` request. Every request carries
//! the commit id and consensus group id of the write it belongs to.

use std::fmt;

use bytes::Bytes;

use crate::commit::{CommitId, ConsensusGroupId, ProgressIndex};

/// Name and length of a transferred file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub length: u64,
}

/// One slice of a file, written by the receiver at `offset`
#[derive(Debug, Clone)]
pub struct FilePiece {
    pub file_name: String,
    pub offset: u64,
    pub payload: Bytes,
    /// Whether the transfer includes a modification file
    pub with_mod: bool,
    pub commit_id: CommitId,
    pub consensus_group_id: ConsensusGroupId,
    pub node_id: i32,
}

/// Final request of a file transfer; asks the receiver to load the file(s)
#[derive(Debug, Clone)]
pub struct FileSeal {
    pub mod_file: Option<FileMeta>,
    pub data_file: FileMeta,
    pub flush_point_count: u64,
    pub commit_id: CommitId,
    pub consensus_group_id: ConsensusGroupId,
    pub progress_index: ProgressIndex,
    pub node_id: i32,
}

/// Coalesced tablet events
#[derive(Debug, Clone)]
pub struct TabletBatchRequest {
    pub payload: Bytes,
    pub event_count: usize,
    pub consensus_group_id: ConsensusGroupId,
    pub node_id: i32,
}

/// Request sent through a transfer client
#[derive(Debug, Clone)]
pub enum TransferRequest {
    FilePiece(FilePiece),
    FileSeal(FileSeal),
    TabletBatch(TabletBatchRequest),
}

impl TransferRequest {
    /// Short name for logs
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FilePiece(_) => "file_piece",
            Self::FileSeal(_) => "file_seal",
            Self::TabletBatch(_) => "tablet_batch",
        }
    }
}

/// Status reported by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    /// Accepted, but another node is the preferred receiver
    RedirectionRecommend,
    /// The receiver's durable write offset differs from the sender's; resume there
    FileOffsetReset,
    /// The write was already applied
    IdempotentConflict,
    /// Receiver is temporarily unable to accept writes
    TemporaryUnavailable,
    InternalError,
}

impl StatusCode {
    /// Statuses that count as accepted
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Success | Self::RedirectionRecommend)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::RedirectionRecommend => "redirection_recommend",
            Self::FileOffsetReset => "file_offset_reset",
            Self::IdempotentConflict => "idempotent_conflict",
            Self::TemporaryUnavailable => "temporary_unavailable",
            Self::InternalError => "internal_error",
        };
        f.write_str(name)
    }
}

/// Status code plus the receiver's message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub code: StatusCode,
    pub message: String,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

/// Response to any transfer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResponse {
    pub status: TransferStatus,
    /// Receiver's durable offset; set with `FileOffsetReset`
    pub end_writing_offset: Option<u64>,
}

impl TransferResponse {
    pub fn success() -> Self {
        Self::with_status(StatusCode::Success, "")
    }

    /// Ask the sender to resume the current file at `offset`
    pub fn offset_reset(offset: u64) -> Self {
        Self {
            status: TransferStatus {
                code: StatusCode::FileOffsetReset,
                message: format!("resume at offset {offset}"),
            },
            end_writing_offset: Some(offset),
        }
    }

    pub fn with_status(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: TransferStatus {
                code,
                message: message.into(),
            },
            end_writing_offset: None,
        }
    }

    #[inline]
    pub fn code(&self) -> StatusCode {
        self.status.code
    }

    /// Offset to resume from, if this is an offset-reset response
    #[inline]
    pub fn reset_offset(&self) -> Option<u64> {
        match self.status.code {
            StatusCode::FileOffsetReset => self.end_writing_offset,
            _ => None,
        }
    }
}
