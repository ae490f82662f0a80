//! Change events produced by the capture layer
//!
//! The set of event kinds is closed: tablet insertions (row batches), file
//! insertions (sealed data files, optionally with a modification file) and
//! heartbeats. Components dispatch on them with `match`.

use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::transfer::FileMeta;

/// Fixed accounting cost of an event that carries no inline payload
const HEADER_SIZE: u64 = 64;

/// A single change event
#[derive(Debug, Clone)]
pub enum Event {
    /// Row-batch insertion, delivered through the tablet batch
    Tablet(TabletInsertion),
    /// Sealed data file, delivered piece by piece (bulk class)
    File(FileInsertion),
    /// Liveness marker with no data
    Heartbeat(Heartbeat),
}

/// Discriminant of an `Event`, used for counters and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Tablet,
    File,
    Heartbeat,
}

impl EventKind {
    /// Short lowercase name for logs and metrics
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tablet => "tablet",
            Self::File => "file",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl Event {
    /// Kind of this event
    #[inline]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Tablet(_) => EventKind::Tablet,
            Self::File(_) => EventKind::File,
            Self::Heartbeat(_) => EventKind::Heartbeat,
        }
    }

    /// Whether the event belongs to the bulk (file-class) channel
    #[inline]
    pub fn is_bulk(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Whether the event is a heartbeat
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat(_))
    }

    /// Bytes this event occupies while buffered in memory
    ///
    /// File events count only their header: the data stays on disk.
    pub fn estimated_size(&self) -> u64 {
        match self {
            Self::Tablet(tablet) => {
                HEADER_SIZE + tablet.payload.len() as u64 + tablet.target.len() as u64
            }
            Self::File(_) | Self::Heartbeat(_) => HEADER_SIZE,
        }
    }
}

/// Row-batch insertion already serialized by the capture layer
#[derive(Debug, Clone)]
pub struct TabletInsertion {
    /// Device or table the rows belong to
    pub target: String,
    /// Number of rows in `payload`
    pub row_count: u32,
    /// Serialized rows
    pub payload: Bytes,
}

impl TabletInsertion {
    pub fn new(target: impl Into<String>, row_count: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            target: target.into(),
            row_count,
            payload: payload.into(),
        }
    }
}

/// Sealed data file plus its optional modification (deletion) file
#[derive(Debug, Clone)]
pub struct FileInsertion {
    /// Main data file
    pub data_file: PathBuf,
    /// Companion modification file, sent before the data file when present
    pub mod_file: Option<PathBuf>,
    /// Number of flush points folded into the data file
    pub flush_point_count: u64,
}

impl FileInsertion {
    pub fn new(data_file: impl Into<PathBuf>) -> Self {
        Self {
            data_file: data_file.into(),
            mod_file: None,
            flush_point_count: 0,
        }
    }

    /// Attach a modification file
    #[must_use]
    pub fn with_mod_file(mut self, mod_file: impl Into<PathBuf>) -> Self {
        self.mod_file = Some(mod_file.into());
        self
    }

    /// Set the flush point count
    #[must_use]
    pub fn with_flush_point_count(mut self, count: u64) -> Self {
        self.flush_point_count = count;
        self
    }

    /// Whether a modification file has to be transferred first
    #[inline]
    pub fn has_mod_file(&self) -> bool {
        self.mod_file.is_some()
    }

    /// Last path component of the data file
    pub fn data_file_name(&self) -> crate::Result<String> {
        file_name(&self.data_file)
    }

    /// Last path component of the modification file, if any
    pub fn mod_file_name(&self) -> crate::Result<Option<String>> {
        self.mod_file.as_deref().map(file_name).transpose()
    }

    /// Name and current length of the data file
    pub fn data_file_meta(&self) -> crate::Result<FileMeta> {
        file_meta(&self.data_file)
    }

    /// Name and current length of the modification file, if any
    pub fn mod_file_meta(&self) -> crate::Result<Option<FileMeta>> {
        self.mod_file.as_deref().map(file_meta).transpose()
    }
}

/// Liveness marker
#[derive(Debug, Clone, Copy, Default)]
pub struct Heartbeat {
    /// Creation time in milliseconds since the Unix epoch
    pub created_at_ms: u64,
}

/// File name (last path component) of a path
fn file_name(path: &Path) -> crate::Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| ProtocolError::InvalidFileName(path.display().to_string()))
}

fn file_meta(path: &Path) -> crate::Result<FileMeta> {
    let length = std::fs::metadata(path)
        .map_err(|source| ProtocolError::FileMetadata {
            path: path.display().to_string(),
            source,
        })?
        .len();

    Ok(FileMeta {
        name: file_name(path)?,
        length,
    })
}
