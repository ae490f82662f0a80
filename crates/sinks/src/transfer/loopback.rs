//! In-process receiver writing transferred files to a local directory
//!
//! Implements the receiving half of the piece protocol: a piece is
//! appended only when its offset matches the current file length,
//! otherwise the receiver answers `FileOffsetReset` with the length it
//! has. A seal checks that every announced file is complete.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use pipe_protocol::{
    FileMeta, FilePiece, FileSeal, StatusCode, TabletBatchRequest, TransferRequest,
    TransferResponse,
};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::{ClientError, TransferClient};

const TABLET_LOG: &str = "tablets.log";

#[derive(Debug, Default)]
struct Received {
    seals: Vec<FileSeal>,
    pieces: u64,
    tablet_events: u64,
}

/// Receiver storing files under `root`
pub struct LoopbackReceiver {
    root: PathBuf,
    received: Mutex<Received>,
    writes: tokio::sync::Mutex<()>,
}

impl LoopbackReceiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            received: Mutex::new(Received::default()),
            writes: tokio::sync::Mutex::new(()),
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Seals accepted so far, in arrival order
    pub fn seals(&self) -> Vec<FileSeal> {
        self.received.lock().seals.clone()
    }

    pub fn pieces(&self) -> u64 {
        self.received.lock().pieces
    }

    pub fn tablet_events(&self) -> u64 {
        self.received.lock().tablet_events
    }

    async fn receive_piece(&self, piece: FilePiece) -> Result<TransferResponse, ClientError> {
        let path = self.resolve(&piece.file_name)?;
        let _guard = self.writes.lock().await;

        let length = current_length(&path).await?;
        if piece.offset != length {
            tracing::debug!(
                file = %piece.file_name,
                offset = piece.offset,
                length,
                "piece offset mismatch, asking sender to resume"
            );
            return Ok(TransferResponse::offset_reset(length));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&piece.payload).await?;
        file.flush().await?;

        self.received.lock().pieces += 1;
        Ok(TransferResponse::success())
    }

    async fn receive_seal(&self, seal: FileSeal) -> Result<TransferResponse, ClientError> {
        let _guard = self.writes.lock().await;

        for meta in seal.mod_file.iter().chain(std::iter::once(&seal.data_file)) {
            if let Some(problem) = self.check_complete(meta).await? {
                return Ok(TransferResponse::with_status(
                    StatusCode::InternalError,
                    problem,
                ));
            }
        }

        tracing::info!(
            file = %seal.data_file.name,
            commit_id = %seal.commit_id,
            "file sealed"
        );
        self.received.lock().seals.push(seal);
        Ok(TransferResponse::success())
    }

    async fn receive_tablets(
        &self,
        batch: TabletBatchRequest,
    ) -> Result<TransferResponse, ClientError> {
        let _guard = self.writes.lock().await;

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(TABLET_LOG))
            .await?;
        log.write_all(&batch.payload).await?;
        log.flush().await?;

        self.received.lock().tablet_events += batch.event_count as u64;
        Ok(TransferResponse::success())
    }

    async fn check_complete(&self, meta: &FileMeta) -> Result<Option<String>, ClientError> {
        let length = current_length(&self.resolve(&meta.name)?).await?;
        if length == meta.length {
            Ok(None)
        } else {
            Ok(Some(format!(
                "{} has {} of {} bytes",
                meta.name, length, meta.length
            )))
        }
    }

    /// Map a bare file name into the root directory
    fn resolve(&self, name: &str) -> Result<PathBuf, ClientError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && name != TABLET_LOG;
        if valid {
            Ok(self.root.join(name))
        } else {
            Err(ClientError::InvalidRequest(format!(
                "invalid file name '{name}'"
            )))
        }
    }
}

async fn current_length(path: &Path) -> std::io::Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl TransferClient for LoopbackReceiver {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferResponse, ClientError> {
        match request {
            TransferRequest::FilePiece(piece) => self.receive_piece(piece).await,
            TransferRequest::FileSeal(seal) => self.receive_seal(seal).await,
            TransferRequest::TabletBatch(batch) => self.receive_tablets(batch).await,
        }
    }
}
