//! Tests for the file transfer handler

use super::*;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use pipe_protocol::{
    CommitId, EnrichedEvent, FileInsertion, ProgressIndex, StatusCode, TabletInsertion,
};
use tempfile::TempDir;

/// Client answering from a script, then with success
#[derive(Default)]
struct ScriptedClient {
    requests: Mutex<Vec<TransferRequest>>,
    responses: Mutex<VecDeque<std::result::Result<TransferResponse, ClientError>>>,
}

impl ScriptedClient {
    fn with_responses(
        responses: impl IntoIterator<Item = std::result::Result<TransferResponse, ClientError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into_iter().collect()),
        })
    }

    fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().clone()
    }

    /// `(file name, offset, payload)` of every piece request
    fn pieces(&self) -> Vec<(String, u64, Vec<u8>)> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                TransferRequest::FilePiece(piece) => {
                    Some((piece.file_name, piece.offset, piece.payload.to_vec()))
                }
                _ => None,
            })
            .collect()
    }

    fn seals(&self) -> Vec<FileSeal> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                TransferRequest::FileSeal(seal) => Some(seal),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl TransferClient for ScriptedClient {
    async fn transfer(
        &self,
        request: TransferRequest,
    ) -> std::result::Result<TransferResponse, ClientError> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(TransferResponse::success()))
    }
}

/// Client that never answers
struct SilentClient;

#[async_trait]
impl TransferClient for SilentClient {
    async fn transfer(
        &self,
        _request: TransferRequest,
    ) -> std::result::Result<TransferResponse, ClientError> {
        std::future::pending().await
    }
}

#[derive(Default)]
struct RecordingContext {
    metrics: TransferMetrics,
    removed: Mutex<Vec<SharedEvent>>,
    retried: Mutex<Vec<SharedEvent>>,
    handled: AtomicUsize,
}

impl TransferContext for RecordingContext {
    fn status_handler(&self) -> &dyn StatusHandler {
        self
    }

    fn retry_policy(&self) -> &dyn RetryPolicy {
        &DefaultRetryPolicy
    }

    fn metrics(&self) -> &TransferMetrics {
        &self.metrics
    }

    fn remove_event_from_buffer(&self, event: &SharedEvent) -> bool {
        self.removed.lock().push(Arc::clone(event));
        true
    }

    fn add_failure_event_to_retry_queue(&self, event: SharedEvent) {
        self.retried.lock().push(event);
    }
}

impl StatusHandler for RecordingContext {
    fn handle(&self, status: &TransferStatus, request: &str) -> Result<()> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        DefaultStatusHandler.handle(status, request)
    }
}

struct Files {
    dir: TempDir,
}

impl Files {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// File event holding one reference for the transfer plus the capture's
    fn event(&self, data: &[u8], modification: Option<&[u8]>) -> SharedEvent {
        let mut file = FileInsertion::new(self.write("1-1-0-0.tsfile", data))
            .with_flush_point_count(4);
        if let Some(contents) = modification {
            file = file.with_mod_file(self.write("1-1-0-0.tsfile.mods", contents));
        }
        let event = EnrichedEvent::builder(Event::File(file), "pipe_a", 7)
            .commit_id(CommitId::new(1, 0, 42))
            .progress_index(ProgressIndex(9))
            .build();
        assert!(event.increase_reference_count(HOLDER));
        event
    }
}

fn config(read_buffer_size: usize) -> TransferConfig {
    TransferConfig {
        read_buffer_size,
        node_id: 3,
        ..Default::default()
    }
}

async fn run_transfer(
    event: &SharedEvent,
    client: Arc<dyn TransferClient>,
    context: &RecordingContext,
    read_buffer_size: usize,
) {
    let handler = TransferHandler::new(Arc::clone(event), &config(read_buffer_size)).unwrap();
    let pool = ClientPool::shared(client, 1);
    let buffers = BufferPool::new(1, read_buffer_size);
    handler
        .transfer(pool.acquire().await, &buffers, context)
        .await;
    assert_eq!(pool.available(), 1);
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_mod_file_sent_before_data_file() {
    let files = Files::new();
    let event = files.event(b"DDDDDDD", Some(b"MMMMMMMMMMMM"));
    let client = Arc::new(ScriptedClient::default());
    let context = RecordingContext::default();

    run_transfer(&event, client.clone(), &context, 4).await;

    let pieces = client.pieces();
    let names: Vec<_> = pieces.iter().map(|p| (p.0.as_str(), p.1)).collect();
    assert_eq!(
        names,
        vec![
            ("1-1-0-0.tsfile.mods", 0),
            ("1-1-0-0.tsfile.mods", 4),
            ("1-1-0-0.tsfile.mods", 8),
            ("1-1-0-0.tsfile", 0),
            ("1-1-0-0.tsfile", 4),
        ]
    );
    assert_eq!(pieces[4].2, b"DDD");

    let requests = client.requests();
    assert_eq!(requests.len(), 6);
    assert!(matches!(requests.last(), Some(TransferRequest::FileSeal(_))));
}

#[tokio::test]
async fn test_pieces_carry_event_identity() {
    let files = Files::new();
    let event = files.event(b"abc", None);
    let client = Arc::new(ScriptedClient::default());
    let context = RecordingContext::default();

    run_transfer(&event, client.clone(), &context, 1024).await;

    match &client.requests()[0] {
        TransferRequest::FilePiece(piece) => {
            assert!(!piece.with_mod);
            assert_eq!(piece.commit_id, CommitId::new(1, 0, 42));
            assert_eq!(piece.consensus_group_id, ConsensusGroupId(7));
            assert_eq!(piece.node_id, 3);
        }
        other => panic!("expected a piece, got {}", other.name()),
    }

    let seals = client.seals();
    assert_eq!(seals.len(), 1);
    assert_eq!(seals[0].data_file.length, 3);
    assert_eq!(seals[0].mod_file, None);
    assert_eq!(seals[0].flush_point_count, 4);
    assert_eq!(seals[0].progress_index, ProgressIndex(9));
}

#[tokio::test]
async fn test_seal_carries_both_files() {
    let files = Files::new();
    let event = files.event(b"data", Some(b"mods!"));
    let client = Arc::new(ScriptedClient::default());
    let context = RecordingContext::default();

    run_transfer(&event, client.clone(), &context, 1024).await;

    let seals = client.seals();
    let seal = &seals[0];
    assert_eq!(seal.data_file.length, 4);
    assert_eq!(
        seal.mod_file,
        Some(FileMeta {
            name: "1-1-0-0.tsfile.mods".into(),
            length: 5,
        })
    );
}

#[tokio::test]
async fn test_empty_data_file_sends_only_seal() {
    let files = Files::new();
    let event = files.event(b"", None);
    let client = Arc::new(ScriptedClient::default());
    let context = RecordingContext::default();

    run_transfer(&event, client.clone(), &context, 16).await;

    assert!(client.pieces().is_empty());
    assert_eq!(client.seals().len(), 1);
    assert_eq!(context.removed.lock().len(), 1);
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_offset_reset_resumes_at_receiver_offset() {
    let files = Files::new();
    let event = files.event(b"0123456789", None);
    let client = ScriptedClient::with_responses([
        Ok(TransferResponse::success()),
        Ok(TransferResponse::offset_reset(2)),
    ]);
    let context = RecordingContext::default();

    run_transfer(&event, client.clone(), &context, 4).await;

    let offsets: Vec<_> = client
        .pieces()
        .into_iter()
        .map(|(_, offset, payload)| (offset, payload))
        .collect();
    assert_eq!(
        offsets,
        vec![
            (0, b"0123".to_vec()),
            (4, b"4567".to_vec()),
            (2, b"2345".to_vec()),
            (6, b"6789".to_vec()),
        ]
    );
    assert_eq!(context.metrics.snapshot().offset_resets, 1);
    assert_eq!(client.seals().len(), 1);
    assert!(context.retried.lock().is_empty());
}

#[tokio::test]
async fn test_offset_reset_past_end_seals() {
    let files = Files::new();
    let event = files.event(b"abcdef", None);
    let client = ScriptedClient::with_responses([Ok(TransferResponse::offset_reset(6))]);
    let context = RecordingContext::default();

    run_transfer(&event, client.clone(), &context, 2).await;

    assert_eq!(client.pieces().len(), 1);
    assert_eq!(client.seals().len(), 1);
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test]
async fn test_success_releases_transfer_reference() {
    let files = Files::new();
    let event = files.event(b"abc", None);
    let client = Arc::new(ScriptedClient::default());
    let context = RecordingContext::default();
    assert_eq!(event.reference_count(), 2);

    run_transfer(&event, client, &context, 2).await;

    assert_eq!(event.reference_count(), 1);
    assert!(Arc::ptr_eq(&context.removed.lock()[0], &event));

    let snapshot = context.metrics.snapshot();
    assert_eq!(snapshot.pieces_sent, 2);
    assert_eq!(snapshot.piece_bytes, 3);
    assert_eq!(snapshot.seals, 1);
    assert_eq!(snapshot.retries, 0);
}

#[tokio::test]
async fn test_idempotent_conflict_continues() {
    let files = Files::new();
    let event = files.event(b"abcd", None);
    let client = ScriptedClient::with_responses([Ok(TransferResponse::with_status(
        StatusCode::IdempotentConflict,
        "applied",
    ))]);
    let context = RecordingContext::default();

    run_transfer(&event, client.clone(), &context, 2).await;

    assert_eq!(context.handled.load(Ordering::SeqCst), 1);
    assert_eq!(client.pieces().len(), 2);
    assert_eq!(context.removed.lock().len(), 1);
}

// ============================================================================
// Failure
// ============================================================================

#[tokio::test]
async fn test_client_error_goes_to_retry_queue() {
    let files = Files::new();
    let event = files.event(b"abcd", None);
    let client = ScriptedClient::with_responses([
        Ok(TransferResponse::success()),
        Err(ClientError::Disconnected),
    ]);
    let context = RecordingContext::default();
    let before = event.retry_interval();

    run_transfer(&event, client.clone(), &context, 2).await;

    assert_eq!(context.retried.lock().len(), 1);
    assert!(context.removed.lock().is_empty());
    assert!(event.retry_interval() > before);
    assert_eq!(event.reference_count(), 2);
    assert!(client.seals().is_empty());
    assert_eq!(context.metrics.snapshot().retries, 1);
}

#[tokio::test]
async fn test_permanent_error_keeps_interval() {
    let files = Files::new();
    let event = files.event(b"abcd", None);
    let client = ScriptedClient::with_responses([Ok(TransferResponse::with_status(
        StatusCode::InternalError,
        "disk full",
    ))]);
    let context = RecordingContext::default();
    let before = event.retry_interval();

    run_transfer(&event, client.clone(), &context, 2).await;

    assert_eq!(client.pieces().len(), 1);
    assert_eq!(context.retried.lock().len(), 1);
    assert_eq!(event.retry_interval(), before);
}

#[tokio::test]
async fn test_seal_rejection_runs_status_handler() {
    let files = Files::new();
    let event = files.event(b"ab", None);
    let client = ScriptedClient::with_responses([
        Ok(TransferResponse::success()),
        Ok(TransferResponse::with_status(
            StatusCode::TemporaryUnavailable,
            "read only",
        )),
    ]);
    let context = RecordingContext::default();
    let before = event.retry_interval();

    run_transfer(&event, client.clone(), &context, 2).await;

    assert_eq!(context.handled.load(Ordering::SeqCst), 1);
    assert_eq!(client.seals().len(), 1);
    assert_eq!(context.retried.lock().len(), 1);
    assert!(event.retry_interval() > before);
}

#[tokio::test]
async fn test_missing_file_goes_to_retry_queue() {
    let files = Files::new();
    let event = files.event(b"ab", None);
    std::fs::remove_file(files.dir.path().join("1-1-0-0.tsfile")).unwrap();
    let client = Arc::new(ScriptedClient::default());
    let context = RecordingContext::default();

    run_transfer(&event, client.clone(), &context, 2).await;

    assert!(client.requests().is_empty());
    assert_eq!(context.retried.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout() {
    let files = Files::new();
    let event = files.event(b"ab", None);
    let context = RecordingContext::default();
    let before = event.retry_interval();

    run_transfer(&event, Arc::new(SilentClient), &context, 2).await;

    assert_eq!(context.retried.lock().len(), 1);
    assert!(event.retry_interval() > before);
}

#[test]
fn test_tablet_event_rejected() {
    let event = EnrichedEvent::builder(
        Event::Tablet(TabletInsertion::new("d", 1, vec![0u8; 4])),
        "pipe_a",
        1,
    )
    .build();

    let result = TransferHandler::new(event, &config(16));

    assert!(matches!(
        result,
        Err(TransferError::Protocol(ProtocolError::NotAFileEvent("tablet")))
    ));
}

#[tokio::test]
async fn test_end_to_end_with_loopback_receiver() {
    let files = Files::new();
    let event = files.event(b"data file contents", Some(b"mods"));
    let out = TempDir::new().unwrap();
    let receiver = Arc::new(LoopbackReceiver::new(out.path()));
    let context = RecordingContext::default();

    run_transfer(&event, receiver.clone(), &context, 5).await;

    assert_eq!(
        std::fs::read(out.path().join("1-1-0-0.tsfile")).unwrap(),
        b"data file contents"
    );
    assert_eq!(
        std::fs::read(out.path().join("1-1-0-0.tsfile.mods")).unwrap(),
        b"mods"
    );
    assert_eq!(receiver.seals().len(), 1);
    assert_eq!(event.reference_count(), 1);
}

#[tokio::test]
async fn test_resume_against_partial_receiver() {
    let files = Files::new();
    let event = files.event(b"0123456789", None);
    let out = TempDir::new().unwrap();
    std::fs::write(out.path().join("1-1-0-0.tsfile"), b"012345").unwrap();
    let receiver = Arc::new(LoopbackReceiver::new(out.path()));
    let context = RecordingContext::default();

    run_transfer(&event, receiver.clone(), &context, 4).await;

    assert_eq!(
        std::fs::read(out.path().join("1-1-0-0.tsfile")).unwrap(),
        b"0123456789"
    );
    assert_eq!(context.metrics.snapshot().offset_resets, 1);
    assert_eq!(receiver.pieces(), 1);
}
