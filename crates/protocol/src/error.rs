//! Protocol error types

use thiserror::Error;

/// Errors raised while describing events for the wire
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Path has no usable file name component
    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    /// File metadata could not be read
    #[error("cannot stat '{path}': {source}")]
    FileMetadata {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Operation requires a file insertion event
    #[error("expected a file event, got {0}")]
    NotAFileEvent(&'static str),
}
