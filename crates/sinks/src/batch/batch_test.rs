//! Tests for the tablet batch accumulator

use super::*;

use std::sync::atomic::AtomicUsize;

use pipe_config::MemoryConfig;
use pipe_protocol::{EnrichedEvent, Event, FileInsertion, Heartbeat, TabletInsertion};

fn context() -> ResourceContext {
    ResourceContext::new(&MemoryConfig::default())
}

fn config(max_batch_size_bytes: u64, max_delay_ms: u64) -> BatchConfig {
    BatchConfig {
        max_delay_ms,
        max_batch_size_bytes,
    }
}

const TARGET: &str = "d";

/// Plain encoding overhead: target, row count and payload length prefixes
const OVERHEAD: usize = 12 + TARGET.len();

/// Tablet whose plain encoding is exactly `encoded` bytes
fn tablet_encoded(encoded: usize) -> SharedEvent {
    let payload = vec![7u8; encoded - OVERHEAD];
    EnrichedEvent::builder(
        Event::Tablet(TabletInsertion::new(TARGET, 1, payload)),
        "pipe_a",
        1,
    )
    .build()
}

fn tablet_with_hook(pipe: &str, region: i32, released: &Arc<AtomicUsize>) -> SharedEvent {
    let released = Arc::clone(released);
    EnrichedEvent::builder(
        Event::Tablet(TabletInsertion::new("d", 1, vec![1u8; 10])),
        pipe,
        region,
    )
    .on_release(move |_: &EnrichedEvent| {
        released.fetch_add(1, Ordering::SeqCst);
    })
    .build()
}

struct FailingPayload;

impl BatchPayload for FailingPayload {
    fn construct(&mut self, _event: &SharedEvent) -> Result<bool> {
        Err(BatchError::construct("encoder unavailable"))
    }

    fn size(&self) -> u64 {
        0
    }

    fn reset(&mut self) {}

    fn take_payload(&mut self) -> Bytes {
        Bytes::new()
    }
}

// ============================================================================
// Emission
// ============================================================================

#[test]
fn test_plain_encoding_size_matches_request() {
    let mut payload = PlainBatchPayload::new();

    assert!(payload.construct(&tablet_encoded(500)).unwrap());
    assert_eq!(payload.size(), 500);
    assert!(payload.construct(&tablet_encoded(OVERHEAD)).unwrap());
    assert_eq!(payload.size(), 500 + OVERHEAD as u64);
}

#[test]
fn test_below_size_not_due() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1000, 60_000), &context);

    assert!(!batch.on_event(&tablet_encoded(500)).unwrap());
    assert!(!batch.on_event(&tablet_encoded(499)).unwrap());
    assert_eq!(batch.total_bytes(), 999);
    assert!(batch.on_event(&tablet_encoded(OVERHEAD + 1)).unwrap());
}

#[test]
fn test_emits_when_size_reached() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1000, 500), &context);

    assert!(!batch.on_event(&tablet_encoded(500)).unwrap());
    assert!(batch.on_event(&tablet_encoded(501)).unwrap());
    assert_eq!(batch.total_bytes(), 1001);
    assert_eq!(batch.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_single_event_emits_after_delay() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 500), &context);

    assert!(!batch.on_event(&tablet_encoded(100)).unwrap());
    tokio::time::advance(Duration::from_millis(499)).await;
    assert!(!batch.should_emit());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(batch.should_emit());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_does_not_start_delay() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 500), &context);
    let beat =
        EnrichedEvent::builder(Event::Heartbeat(Heartbeat::default()), "pipe_a", 1).build();

    assert!(!batch.on_event(&beat).unwrap());
    tokio::time::advance(Duration::from_millis(400)).await;
    assert!(!batch.on_event(&tablet_encoded(100)).unwrap());

    tokio::time::advance(Duration::from_millis(499)).await;
    assert!(!batch.should_emit());
    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(batch.should_emit());
}

#[test]
fn test_empty_batch_never_due() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1000, 0), &context);
    assert!(!batch.should_emit());
}

#[test]
fn test_recorder_receives_delay_bytes_count() {
    let context = context();
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&samples);
    let batch = TabletBatch::new("pipe_a", &config(100, 60_000), &context)
        .with_recorder(move |elapsed, bytes, count| sink.lock().push((elapsed, bytes, count)));

    assert!(batch.on_event(&tablet_encoded(120)).unwrap());

    let samples = samples.lock();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].1, 120);
    assert_eq!(samples[0].2, 1);
    assert_eq!(batch.metrics_handle().snapshot().emissions, 1);
}

#[test]
fn test_granted_capacity_bounds_emission() {
    let memory = MemoryConfig {
        batch_budget_bytes: 1000,
        ..Default::default()
    };
    let context = ResourceContext::new(&memory);
    let batch = TabletBatch::new("pipe_a", &config(4000, 60_000), &context);

    assert_eq!(batch.max_batch_size(), 1000);
    assert!(batch.on_event(&tablet_encoded(1000)).unwrap());
}

// ============================================================================
// Admission and ownership
// ============================================================================

#[test]
fn test_same_event_accumulated_once() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 60_000), &context);
    let event = tablet_encoded(50);

    batch.on_event(&event).unwrap();
    batch.on_event(&event).unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch.total_bytes(), 50);
    assert_eq!(event.reference_count(), 2);
}

#[test]
fn test_released_event_skipped() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 60_000), &context);
    let event = tablet_encoded(50);
    event.decrease_reference_count("capture");

    assert!(!batch.on_event(&event).unwrap());
    assert!(batch.is_empty());
}

#[test]
fn test_construct_failure_releases_reference() {
    let context = context();
    let batch =
        TabletBatch::with_payload("pipe_a", &config(1 << 20, 60_000), &context, FailingPayload);
    let event = tablet_encoded(50);

    let result = batch.on_event(&event);

    assert!(matches!(result, Err(BatchError::Construct(_))));
    assert_eq!(event.reference_count(), 1);
    assert!(batch.is_empty());
}

#[test]
fn test_file_event_rejected() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 60_000), &context);
    let event = EnrichedEvent::builder(Event::File(FileInsertion::new("/a.tsfile")), "pipe_a", 1)
        .build();

    let result = batch.on_event(&event);

    assert!(matches!(result, Err(BatchError::UnsupportedEvent("file"))));
    assert_eq!(event.reference_count(), 1);
}

#[test]
fn test_heartbeat_not_kept() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 0), &context);
    let event =
        EnrichedEvent::builder(Event::Heartbeat(Heartbeat::default()), "pipe_a", 1).build();

    assert!(!batch.on_event(&event).unwrap());
    assert!(batch.is_empty());
    assert_eq!(event.reference_count(), 1);
}

#[test]
fn test_on_success_keeps_references() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 60_000), &context);
    let event = tablet_encoded(50);
    batch.on_event(&event).unwrap();

    batch.on_success();

    assert!(batch.is_empty());
    assert_eq!(batch.total_bytes(), 0);
    assert_eq!(event.reference_count(), 2);
    assert!(!batch.should_emit());
}

#[test]
fn test_take_events_moves_payload() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 60_000), &context);
    let first = tablet_encoded(40);
    let second = tablet_encoded(60);
    batch.on_event(&first).unwrap();
    batch.on_event(&second).unwrap();

    let emitted = batch.take_events();

    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted.payload.len(), 100);
    assert!(Arc::ptr_eq(&emitted.events[0], &first));
    assert_eq!(&emitted.payload[..4], &1u32.to_be_bytes());
    assert!(batch.is_empty());
    assert_eq!(first.reference_count(), 2);
}

#[test]
fn test_close_releases_and_rejects() {
    let context = context();
    let released = Arc::new(AtomicUsize::new(0));
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 60_000), &context);
    let event = tablet_with_hook("pipe_a", 1, &released);
    batch.on_event(&event).unwrap();

    batch.close();
    batch.close();

    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(batch.is_closed());
    assert!(!batch.on_event(&tablet_encoded(20)).unwrap());
    assert!(batch.is_empty());
}

#[test]
fn test_close_returns_budget_slice() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(4096, 60_000), &context);
    let budget = Arc::clone(context.init_batch_budget());
    assert_eq!(budget.assigned(), 4096);

    drop(batch);

    assert_eq!(budget.assigned(), 0);
}

#[test]
fn test_discard_events_of_pipe() {
    let context = context();
    let dropped = Arc::new(AtomicUsize::new(0));
    let kept = Arc::new(AtomicUsize::new(0));
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 60_000), &context);
    batch.on_event(&tablet_with_hook("pipe_a", 1, &dropped)).unwrap();
    batch.on_event(&tablet_with_hook("pipe_b", 1, &kept)).unwrap();
    batch.on_event(&tablet_with_hook("pipe_a", 1, &dropped)).unwrap();

    assert_eq!(batch.discard_events_of_pipe("pipe_a", 1), 2);

    assert_eq!(batch.len(), 1);
    assert_eq!(dropped.load(Ordering::SeqCst), 2);
    assert_eq!(kept.load(Ordering::SeqCst), 0);
}

#[test]
fn test_discard_last_events_resets_batch() {
    let context = context();
    let released = Arc::new(AtomicUsize::new(0));
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 60_000), &context);
    batch.on_event(&tablet_with_hook("pipe_a", 1, &released)).unwrap();

    batch.discard_events_of_pipe("pipe_a", 1);

    assert_eq!(batch.total_bytes(), 0);
    assert!(!batch.should_emit());
}

#[test]
fn test_decrease_events_reference_count() {
    let context = context();
    let batch = TabletBatch::new("pipe_a", &config(1 << 20, 60_000), &context);
    let event = tablet_encoded(30);
    batch.on_event(&event).unwrap();

    batch.decrease_events_reference_count("sender");

    assert_eq!(event.reference_count(), 1);
}
