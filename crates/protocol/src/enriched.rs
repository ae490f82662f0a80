//! Reference-counted event handle
//!
//! `EnrichedEvent` wraps an `Event` with the identity of the pipe that
//! captured it and an explicit holder count. The count starts at 1 (the
//! capture layer's reference) and every stage that keeps the event beyond
//! a call takes its own reference. The release hook runs on exactly one
//! path: the transition to zero, whether reached by a decrement or by a
//! forced clear during teardown.
//!
//! # Example
//!
//! ```
//! use pipe_protocol::{EnrichedEvent, Event, Heartbeat};
//!
//! let event = EnrichedEvent::builder(Event::Heartbeat(Heartbeat::default()), "pipe_a", 1).build();
//! assert!(event.increase_reference_count("batch"));
//! assert!(event.decrease_reference_count("batch"));
//! assert!(event.decrease_reference_count("capture"));
//! assert!(event.is_released());
//! assert!(!event.increase_reference_count("late"));
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::commit::{CommitId, ProgressIndex};
use crate::event::Event;

/// Ceiling for the per-event retry interval
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(20);

const MAX_RETRY_INTERVAL_MS: u64 = MAX_RETRY_INTERVAL.as_millis() as u64;

/// Default retry interval before the first failure
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

/// Shared handle to an enriched event
pub type SharedEvent = Arc<EnrichedEvent>;

/// Callback run once when an event's reference count reaches zero
///
/// The storage layer uses this to reclaim the files or WAL entries backing
/// the event.
pub trait ReleaseHook: Send + Sync {
    fn on_release(&self, event: &EnrichedEvent);
}

impl<F> ReleaseHook for F
where
    F: Fn(&EnrichedEvent) + Send + Sync,
{
    fn on_release(&self, event: &EnrichedEvent) {
        self(event)
    }
}

/// Event plus pipe identity, consensus markers and a holder count
pub struct EnrichedEvent {
    event: Event,
    pipe_name: String,
    region_id: i32,
    commit_id: CommitId,
    progress_index: ProgressIndex,

    /// Active holders; never decremented below zero
    reference_count: AtomicU64,

    /// Set once the release hook has run
    released: AtomicBool,

    /// Current retry backoff in milliseconds
    retry_interval_ms: AtomicU64,

    release_hook: Option<Arc<dyn ReleaseHook>>,
}

impl EnrichedEvent {
    /// Start building an event owned by `pipe_name` on `region_id`
    pub fn builder(
        event: Event,
        pipe_name: impl Into<String>,
        region_id: i32,
    ) -> EnrichedEventBuilder {
        EnrichedEventBuilder {
            event,
            pipe_name: pipe_name.into(),
            region_id,
            commit_id: CommitId::default(),
            progress_index: ProgressIndex::default(),
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            release_hook: None,
        }
    }

    #[inline]
    pub fn event(&self) -> &Event {
        &self.event
    }

    #[inline]
    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    #[inline]
    pub fn region_id(&self) -> i32 {
        self.region_id
    }

    #[inline]
    pub fn commit_id(&self) -> CommitId {
        self.commit_id
    }

    #[inline]
    pub fn progress_index(&self) -> ProgressIndex {
        self.progress_index
    }

    /// Whether the event belongs to the given pipe instance
    #[inline]
    pub fn belongs_to(&self, pipe_name: &str, region_id: i32) -> bool {
        self.region_id == region_id && self.pipe_name == pipe_name
    }

    /// Current number of holders
    #[inline]
    pub fn reference_count(&self) -> u64 {
        self.reference_count.load(Ordering::Acquire)
    }

    /// Whether the release hook has already run
    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Take a reference on behalf of `holder`
    ///
    /// Returns false when the event has already been released; the caller
    /// must then treat the event as gone.
    pub fn increase_reference_count(&self, holder: &str) -> bool {
        let result = self
            .reference_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count > 0).then_some(count + 1)
            });

        match result {
            Ok(previous) => {
                tracing::trace!(
                    pipe = %self.pipe_name,
                    commit_id = %self.commit_id,
                    holder,
                    count = previous + 1,
                    "reference increased"
                );
                true
            }
            Err(_) => false,
        }
    }

    /// Drop a reference held by `holder`
    ///
    /// Runs the release hook when this was the last reference. Returns false
    /// (and logs) if the count was already zero.
    pub fn decrease_reference_count(&self, holder: &str) -> bool {
        let result = self
            .reference_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });

        match result {
            Ok(1) => {
                self.finalize(holder);
                true
            }
            Ok(previous) => {
                tracing::trace!(
                    pipe = %self.pipe_name,
                    commit_id = %self.commit_id,
                    holder,
                    count = previous - 1,
                    "reference decreased"
                );
                true
            }
            Err(_) => {
                tracing::warn!(
                    pipe = %self.pipe_name,
                    commit_id = %self.commit_id,
                    holder,
                    "reference count already zero, ignoring decrease"
                );
                false
            }
        }
    }

    /// Force the count to zero, releasing the event
    ///
    /// Used when a pipe is torn down and every holder is discarded at once.
    /// Returns true if this call performed the release.
    pub fn clear_reference_count(&self, holder: &str) -> bool {
        if self.reference_count.swap(0, Ordering::AcqRel) > 0 {
            self.finalize(holder);
            true
        } else {
            false
        }
    }

    fn finalize(&self, holder: &str) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::debug!(
            pipe = %self.pipe_name,
            region = self.region_id,
            commit_id = %self.commit_id,
            kind = self.event.kind().as_str(),
            holder,
            "event released"
        );

        if let Some(hook) = &self.release_hook {
            hook.on_release(self);
        }
    }

    /// Current retry backoff
    #[inline]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.load(Ordering::Acquire))
    }

    /// Double the retry backoff, capped at `MAX_RETRY_INTERVAL`
    ///
    /// Returns the new interval.
    pub fn increase_retry_interval(&self) -> Duration {
        let previous = self
            .retry_interval_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |ms| {
                Some(next_retry_interval(ms))
            })
            .unwrap_or_else(|ms| ms);

        Duration::from_millis(next_retry_interval(previous))
    }

    /// Reset the retry backoff, e.g. after a successful transfer
    pub fn reset_retry_interval(&self, interval: Duration) {
        self.retry_interval_ms
            .store(clamp_interval_ms(interval), Ordering::Release);
    }
}

/// Next backoff step in milliseconds
///
/// Doubles `current_ms` and caps it at 20 seconds. A doubling that would
/// overflow, or a zero interval that cannot grow, yields the ceiling.
pub fn next_retry_interval(current_ms: u64) -> u64 {
    match current_ms.checked_mul(2) {
        Some(doubled) if doubled > 0 => doubled.min(MAX_RETRY_INTERVAL_MS),
        _ => MAX_RETRY_INTERVAL_MS,
    }
}

fn clamp_interval_ms(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis())
        .unwrap_or(u64::MAX)
        .min(MAX_RETRY_INTERVAL_MS)
}

impl fmt::Debug for EnrichedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichedEvent")
            .field("kind", &self.event.kind())
            .field("pipe_name", &self.pipe_name)
            .field("region_id", &self.region_id)
            .field("commit_id", &self.commit_id)
            .field("reference_count", &self.reference_count())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Builder for `EnrichedEvent`
pub struct EnrichedEventBuilder {
    event: Event,
    pipe_name: String,
    region_id: i32,
    commit_id: CommitId,
    progress_index: ProgressIndex,
    retry_interval_ms: u64,
    release_hook: Option<Arc<dyn ReleaseHook>>,
}

impl EnrichedEventBuilder {
    #[must_use]
    pub fn commit_id(mut self, commit_id: CommitId) -> Self {
        self.commit_id = commit_id;
        self
    }

    #[must_use]
    pub fn progress_index(mut self, progress_index: ProgressIndex) -> Self {
        self.progress_index = progress_index;
        self
    }

    /// Initial retry backoff (capped at `MAX_RETRY_INTERVAL`)
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = clamp_interval_ms(interval);
        self
    }

    /// Hook run when the last reference is released
    #[must_use]
    pub fn on_release(mut self, hook: impl ReleaseHook + 'static) -> Self {
        self.release_hook = Some(Arc::new(hook));
        self
    }

    /// Build the event holding one reference for its creator
    pub fn build(self) -> SharedEvent {
        Arc::new(EnrichedEvent {
            event: self.event,
            pipe_name: self.pipe_name,
            region_id: self.region_id,
            commit_id: self.commit_id,
            progress_index: self.progress_index,
            reference_count: AtomicU64::new(1),
            released: AtomicBool::new(false),
            retry_interval_ms: AtomicU64::new(self.retry_interval_ms),
            release_hook: self.release_hook,
        })
    }
}
