//! File Transfer - Resumable piece-by-piece transfer of sealed files
//!
//! One `TransferHandler` moves one file event to the receiver: the
//! modification file first when there is one, then the data file, then a
//! single seal request. Exactly one request is outstanding at a time; the
//! next piece is read only after the previous response arrived.
//!
//! # States
//!
//! ```text
//!  Transferring(mod) ──eof──► Transferring(data) ──eof──► Sealing ──ok──► Complete
//!        │  ▲                        │  ▲                   │
//!        └──┘ piece ack              └──┘ piece ack         │
//!                                                           │
//!  any error / rejected status ─────────────────────────────┴──► retry queue
//! ```
//!
//! A `FileOffsetReset` response carries the receiver's durable offset; the
//! reader seeks there and the transfer continues from that point instead of
//! starting over.
//!
//! # Ownership
//!
//! The connector takes a reference on the event before the handler starts.
//! The handler releases it after the seal is acknowledged, unless the event
//! was discarded from the connector's buffer meanwhile. On failure the
//! event goes to the retry queue still holding that reference.

mod client;
mod loopback;
mod status;

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use pipe_config::TransferConfig;
use pipe_metrics::TransferMetrics;
use pipe_protocol::{
    ConsensusGroupId, Event, FileMeta, FilePiece, FileSeal, ProtocolError, SharedEvent,
    TransferRequest, TransferResponse, TransferStatus,
};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::Instant;

use crate::util::BufferPool;

pub use client::{ClientError, ClientPool, PooledClient, TransferClient};
pub use loopback::LoopbackReceiver;
pub use status::{DefaultRetryPolicy, DefaultStatusHandler, RetryPolicy, StatusHandler};

pub(crate) const HOLDER: &str = "file_transfer";

/// Errors ending a transfer attempt
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Local file could not be opened, read or measured
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Receiver answered with a status the status handler escalated
    #[error("{request} rejected: {status}")]
    Status {
        request: String,
        status: TransferStatus,
    },
}

impl TransferError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn status(request: impl Into<String>, status: TransferStatus) -> Self {
        Self::Status {
            request: request.into(),
            status,
        }
    }
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Connector services a transfer reports to
pub trait TransferContext: Send + Sync {
    fn status_handler(&self) -> &dyn StatusHandler;

    fn retry_policy(&self) -> &dyn RetryPolicy;

    fn metrics(&self) -> &TransferMetrics;

    /// Forget a finished event; returns false if it was not buffered
    fn remove_event_from_buffer(&self, event: &SharedEvent) -> bool;

    /// Queue a failed event for another attempt
    fn add_failure_event_to_retry_queue(&self, event: SharedEvent);
}

/// Which of the event's files is being streamed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferFile {
    Mod,
    Data,
}

/// Progress of one transfer attempt
#[derive(Debug)]
enum TransferState {
    Transferring {
        file: TransferFile,
        reader: File,
        offset: u64,
    },
    Sealing,
    Complete,
}

/// Single-flight transfer of one file event
pub struct TransferHandler {
    event: SharedEvent,
    data_file: PathBuf,
    mod_file: Option<PathBuf>,
    data_file_name: String,
    mod_file_name: Option<String>,
    flush_point_count: u64,
    consensus_group_id: ConsensusGroupId,
    node_id: i32,
    read_buffer_size: usize,
    request_timeout: Duration,
    created_at: Instant,
}

impl TransferHandler {
    /// Prepare a transfer of `event`, which must be a file event
    ///
    /// Requests are scoped to the consensus group of the event's region.
    pub fn new(event: SharedEvent, config: &TransferConfig) -> Result<Self> {
        let Event::File(file) = event.event() else {
            return Err(ProtocolError::NotAFileEvent(event.event().kind().as_str()).into());
        };

        Ok(Self {
            data_file: file.data_file.clone(),
            mod_file: file.mod_file.clone(),
            data_file_name: file.data_file_name()?,
            mod_file_name: file.mod_file_name()?,
            flush_point_count: file.flush_point_count,
            consensus_group_id: ConsensusGroupId(event.region_id()),
            node_id: config.node_id,
            read_buffer_size: config.read_buffer_size.max(1),
            request_timeout: config.request_timeout(),
            created_at: Instant::now(),
            event,
        })
    }

    #[inline]
    pub fn event(&self) -> &SharedEvent {
        &self.event
    }

    /// Run the transfer to completion or failure
    ///
    /// Never returns an error: success releases the event, failure hands it
    /// to the retry queue. The client and read buffer go back to their
    /// pools either way.
    pub async fn transfer(
        self,
        client: PooledClient,
        buffers: &BufferPool,
        context: &dyn TransferContext,
    ) {
        let mut buf = buffers.get();
        buf.resize(self.read_buffer_size, 0);

        let result = self.run(&*client, &mut buf, context).await;
        buffers.put(buf);
        drop(client);

        match result {
            Ok(()) => self.on_complete(context),
            Err(error) => self.on_error(error, context),
        }
    }

    async fn run(
        &self,
        client: &dyn TransferClient,
        buf: &mut BytesMut,
        context: &dyn TransferContext,
    ) -> Result<()> {
        let first = if self.mod_file.is_some() {
            TransferFile::Mod
        } else {
            TransferFile::Data
        };
        let mut state = TransferState::Transferring {
            file: first,
            reader: self.open(first).await?,
            offset: 0,
        };

        loop {
            state = match state {
                TransferState::Transferring {
                    file,
                    reader,
                    offset,
                } => {
                    self.transfer_piece(client, buf, context, file, reader, offset)
                        .await?
                }
                TransferState::Sealing => self.seal(client, context).await?,
                TransferState::Complete => return Ok(()),
            };
        }
    }

    async fn transfer_piece(
        &self,
        client: &dyn TransferClient,
        buf: &mut BytesMut,
        context: &dyn TransferContext,
        file: TransferFile,
        mut reader: File,
        offset: u64,
    ) -> Result<TransferState> {
        let read = self.fill(&mut reader, buf, file).await?;
        if read == 0 {
            return match file {
                TransferFile::Mod => {
                    drop(reader);
                    tracing::debug!(
                        pipe = self.event.pipe_name(),
                        file = self.file_name(file),
                        "modification file sent"
                    );
                    Ok(TransferState::Transferring {
                        file: TransferFile::Data,
                        reader: self.open(TransferFile::Data).await?,
                        offset: 0,
                    })
                }
                TransferFile::Data => Ok(TransferState::Sealing),
            };
        }

        let name = self.file_name(file);
        let request = TransferRequest::FilePiece(FilePiece {
            file_name: name.to_owned(),
            offset,
            payload: Bytes::copy_from_slice(&buf[..read]),
            with_mod: self.mod_file.is_some(),
            commit_id: self.event.commit_id(),
            consensus_group_id: self.consensus_group_id,
            node_id: self.node_id,
        });

        let sent_at = Instant::now();
        let response = self.send(client, request).await?;
        let mut offset = offset + read as u64;

        if let Some(reset) = response.reset_offset() {
            reader
                .seek(SeekFrom::Start(reset))
                .await
                .map_err(|e| TransferError::io(self.path(file), e))?;
            tracing::info!(
                pipe = self.event.pipe_name(),
                file = name,
                from = offset,
                to = reset,
                "resuming file at receiver offset"
            );
            offset = reset;
            context.metrics().record_offset_reset();
        } else if !response.code().is_accepted() {
            context.status_handler().handle(&response.status, name)?;
        }

        context.metrics().record_piece(read as u64, sent_at.elapsed());
        tracing::trace!(
            pipe = self.event.pipe_name(),
            file = name,
            offset,
            bytes = read,
            "piece sent"
        );

        Ok(TransferState::Transferring {
            file,
            reader,
            offset,
        })
    }

    async fn seal(
        &self,
        client: &dyn TransferClient,
        context: &dyn TransferContext,
    ) -> Result<TransferState> {
        let mod_file = match &self.mod_file_name {
            Some(name) => Some(FileMeta {
                name: name.clone(),
                length: self.length(TransferFile::Mod).await?,
            }),
            None => None,
        };
        let request = TransferRequest::FileSeal(FileSeal {
            mod_file,
            data_file: FileMeta {
                name: self.data_file_name.clone(),
                length: self.length(TransferFile::Data).await?,
            },
            flush_point_count: self.flush_point_count,
            commit_id: self.event.commit_id(),
            consensus_group_id: self.consensus_group_id,
            progress_index: self.event.progress_index(),
            node_id: self.node_id,
        });

        let response = self.send(client, request).await?;
        if !response.code().is_accepted() {
            context
                .status_handler()
                .handle(&response.status, &format!("seal {}", self.data_file_name))?;
        }
        Ok(TransferState::Complete)
    }

    async fn send(
        &self,
        client: &dyn TransferClient,
        request: TransferRequest,
    ) -> Result<TransferResponse> {
        match tokio::time::timeout(self.request_timeout, client.transfer(request)).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(ClientError::Timeout(self.request_timeout).into()),
        }
    }

    /// Read until the buffer is full or the file ends
    async fn fill(&self, reader: &mut File, buf: &mut BytesMut, file: TransferFile) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = reader
                .read(&mut buf[filled..])
                .await
                .map_err(|e| TransferError::io(self.path(file), e))?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(filled)
    }

    async fn open(&self, file: TransferFile) -> Result<File> {
        let path = self.path(file);
        File::open(path)
            .await
            .map_err(|e| TransferError::io(path, e))
    }

    async fn length(&self, file: TransferFile) -> Result<u64> {
        let path = self.path(file);
        tokio::fs::metadata(path)
            .await
            .map(|meta| meta.len())
            .map_err(|e| TransferError::io(path, e))
    }

    fn path(&self, file: TransferFile) -> &Path {
        match (file, &self.mod_file) {
            (TransferFile::Mod, Some(path)) => path,
            _ => &self.data_file,
        }
    }

    fn file_name(&self, file: TransferFile) -> &str {
        match (file, &self.mod_file_name) {
            (TransferFile::Mod, Some(name)) => name,
            _ => &self.data_file_name,
        }
    }

    fn on_complete(&self, context: &dyn TransferContext) {
        // A discarded event was already released by the discard
        if context.remove_event_from_buffer(&self.event) {
            self.event.decrease_reference_count(HOLDER);
        }

        let elapsed = self.created_at.elapsed();
        context.metrics().record_seal(elapsed);
        tracing::info!(
            pipe = self.event.pipe_name(),
            file = %self.data_file.display(),
            commit_id = %self.event.commit_id(),
            elapsed_ms = elapsed.as_millis() as u64,
            "file transferred"
        );
    }

    fn on_error(&self, error: TransferError, context: &dyn TransferContext) {
        tracing::warn!(
            pipe = self.event.pipe_name(),
            file = %self.data_file.display(),
            commit_id = %self.event.commit_id(),
            error = %error,
            "failed to transfer file"
        );

        if context.retry_policy().should_increase_interval(&error) {
            let interval = self.event.increase_retry_interval();
            tracing::debug!(
                pipe = self.event.pipe_name(),
                retry_interval_ms = interval.as_millis() as u64,
                "retry interval increased"
            );
        }

        context.add_failure_event_to_retry_queue(Arc::clone(&self.event));
        context.metrics().record_retry();
    }
}

#[cfg(test)]
#[path = "transfer_test.rs"]
mod transfer_test;
