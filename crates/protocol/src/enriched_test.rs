//! Tests for reference counting and retry backoff

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use bytes::Bytes;

use crate::{
    CommitId, EnrichedEvent, Event, Heartbeat, MAX_RETRY_INTERVAL, SharedEvent, TabletInsertion,
    next_retry_interval,
};

fn tablet_event(releases: &Arc<AtomicUsize>) -> SharedEvent {
    let releases = Arc::clone(releases);
    EnrichedEvent::builder(
        Event::Tablet(TabletInsertion::new("root.sg.d1", 10, Bytes::from_static(b"rows"))),
        "pipe_a",
        3,
    )
    .commit_id(CommitId::new(0, 0, 42))
    .on_release(move |_: &EnrichedEvent| {
        releases.fetch_add(1, Ordering::SeqCst);
    })
    .build()
}

// ============================================================================
// Reference counting
// ============================================================================

#[test]
fn test_new_event_holds_one_reference() {
    let releases = Arc::new(AtomicUsize::new(0));
    let event = tablet_event(&releases);

    assert_eq!(event.reference_count(), 1);
    assert!(!event.is_released());
    assert_eq!(event.pipe_name(), "pipe_a");
    assert_eq!(event.region_id(), 3);
    assert_eq!(event.commit_id().replicate_index, 42);
}

#[test]
fn test_release_hook_runs_on_last_decrease() {
    let releases = Arc::new(AtomicUsize::new(0));
    let event = tablet_event(&releases);

    assert!(event.increase_reference_count("batch"));
    assert_eq!(event.reference_count(), 2);

    assert!(event.decrease_reference_count("batch"));
    assert_eq!(releases.load(Ordering::SeqCst), 0);

    assert!(event.decrease_reference_count("capture"));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(event.is_released());
}

#[test]
fn test_decrease_never_goes_below_zero() {
    let releases = Arc::new(AtomicUsize::new(0));
    let event = tablet_event(&releases);

    assert!(event.decrease_reference_count("capture"));
    assert!(!event.decrease_reference_count("capture"));
    assert_eq!(event.reference_count(), 0);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn test_increase_fails_after_release() {
    let releases = Arc::new(AtomicUsize::new(0));
    let event = tablet_event(&releases);

    event.decrease_reference_count("capture");
    assert!(!event.increase_reference_count("batch"));
    assert_eq!(event.reference_count(), 0);
}

#[test]
fn test_clear_releases_once() {
    let releases = Arc::new(AtomicUsize::new(0));
    let event = tablet_event(&releases);
    event.increase_reference_count("queue");
    event.increase_reference_count("batch");

    assert!(event.clear_reference_count("teardown"));
    assert!(!event.clear_reference_count("teardown"));
    assert!(!event.decrease_reference_count("batch"));

    assert_eq!(event.reference_count(), 0);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_holders_release_exactly_once() {
    let releases = Arc::new(AtomicUsize::new(0));
    let event = tablet_event(&releases);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                for _ in 0..1000 {
                    if event.increase_reference_count("worker") {
                        event.decrease_reference_count("worker");
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(event.reference_count(), 1);
    assert_eq!(releases.load(Ordering::SeqCst), 0);

    event.decrease_reference_count("capture");
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn test_belongs_to() {
    let event = EnrichedEvent::builder(Event::Heartbeat(Heartbeat::default()), "pipe_a", 1).build();

    assert!(event.belongs_to("pipe_a", 1));
    assert!(!event.belongs_to("pipe_a", 2));
    assert!(!event.belongs_to("pipe_b", 1));
}

// ============================================================================
// Retry backoff
// ============================================================================

#[test]
fn test_retry_interval_doubles_until_ceiling() {
    let event = EnrichedEvent::builder(Event::Heartbeat(Heartbeat::default()), "pipe_a", 1)
        .retry_interval(Duration::from_millis(1000))
        .build();

    let expected = [2000, 4000, 8000, 16000, 20000, 20000, 20000];
    for ms in expected {
        assert_eq!(event.increase_retry_interval(), Duration::from_millis(ms));
    }
    assert_eq!(event.retry_interval(), MAX_RETRY_INTERVAL);
}

#[test]
fn test_retry_interval_after_k_failures() {
    for k in 1..=10u32 {
        let event = EnrichedEvent::builder(Event::Heartbeat(Heartbeat::default()), "p", 0)
            .retry_interval(Duration::from_millis(1000))
            .build();
        for _ in 0..k {
            event.increase_retry_interval();
        }
        let expected = (1000u64 << k).min(20_000);
        assert_eq!(event.retry_interval(), Duration::from_millis(expected));
    }
}

#[test]
fn test_next_retry_interval_overflow_guard() {
    assert_eq!(next_retry_interval(u64::MAX), 20_000);
    assert_eq!(next_retry_interval(u64::MAX / 2 + 1), 20_000);
    assert_eq!(next_retry_interval(0), 20_000);
    assert_eq!(next_retry_interval(1), 2);
}

#[test]
fn test_builder_clamps_initial_interval() {
    let event = EnrichedEvent::builder(Event::Heartbeat(Heartbeat::default()), "p", 0)
        .retry_interval(Duration::from_secs(3600))
        .build();
    assert_eq!(event.retry_interval(), MAX_RETRY_INTERVAL);

    event.reset_retry_interval(Duration::from_millis(500));
    assert_eq!(event.retry_interval(), Duration::from_millis(500));
}
