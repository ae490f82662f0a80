//! Collected metrics snapshot
//!
//! One reporting tick's worth of snapshots from every registered provider,
//! plus the rates derived from the previous tick.

use std::time::Instant;

use crate::{BatchMetricsSnapshot, ConnectorMetricsSnapshot, QueueMetricsSnapshot};

/// Snapshots collected in one reporting tick
#[derive(Debug, Clone, Default)]
pub struct CollectedMetrics {
    /// When the snapshots were taken
    pub timestamp: Option<Instant>,
    pub queues: Vec<CollectedQueue>,
    pub batches: Vec<CollectedBatch>,
    pub connectors: Vec<CollectedConnector>,
}

#[derive(Debug, Clone)]
pub struct CollectedQueue {
    pub id: String,
    pub queued: usize,
    pub snapshot: QueueMetricsSnapshot,
}

#[derive(Debug, Clone)]
pub struct CollectedBatch {
    pub id: String,
    pub snapshot: BatchMetricsSnapshot,
}

#[derive(Debug, Clone)]
pub struct CollectedConnector {
    pub id: String,
    pub snapshot: ConnectorMetricsSnapshot,
}

/// Per-connector throughput between two ticks
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorRates {
    pub id: String,
    pub pieces_per_sec: f64,
    pub bytes_per_sec: f64,
    pub retries: u64,
}

impl CollectedMetrics {
    /// Rates relative to an earlier collection
    ///
    /// Returns `None` without timestamps or when no time has passed.
    /// Connectors are matched by id; new connectors are skipped.
    pub fn rates(&self, previous: &CollectedMetrics) -> Option<Vec<ConnectorRates>> {
        let elapsed = self
            .timestamp?
            .checked_duration_since(previous.timestamp?)?
            .as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }

        let rates = self
            .connectors
            .iter()
            .filter_map(|current| {
                let before = previous
                    .connectors
                    .iter()
                    .find(|prev| prev.id == current.id)?;
                let now = &current.snapshot.transfer;
                let then = &before.snapshot.transfer;
                Some(ConnectorRates {
                    id: current.id.clone(),
                    pieces_per_sec: now.pieces_sent.saturating_sub(then.pieces_sent) as f64
                        / elapsed,
                    bytes_per_sec: now.piece_bytes.saturating_sub(then.piece_bytes) as f64
                        / elapsed,
                    retries: now.retries.saturating_sub(then.retries),
                })
            })
            .collect();

        Some(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransferMetricsSnapshot;
    use std::time::Duration;

    fn connector(id: &str, pieces: u64, bytes: u64) -> CollectedConnector {
        CollectedConnector {
            id: id.into(),
            snapshot: ConnectorMetricsSnapshot {
                transfer: TransferMetricsSnapshot {
                    pieces_sent: pieces,
                    piece_bytes: bytes,
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_rates_between_ticks() {
        let start = Instant::now();
        let previous = CollectedMetrics {
            timestamp: Some(start),
            connectors: vec![connector("pipe_a", 10, 1000)],
            ..Default::default()
        };
        let current = CollectedMetrics {
            timestamp: Some(start + Duration::from_secs(2)),
            connectors: vec![connector("pipe_a", 30, 5000), connector("pipe_b", 5, 5)],
            ..Default::default()
        };

        let rates = current.rates(&previous).unwrap();

        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].id, "pipe_a");
        assert!((rates[0].pieces_per_sec - 10.0).abs() < f64::EPSILON);
        assert!((rates[0].bytes_per_sec - 2000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rates_without_timestamp() {
        let current = CollectedMetrics::default();
        assert!(current.rates(&CollectedMetrics::default()).is_none());
    }
}
