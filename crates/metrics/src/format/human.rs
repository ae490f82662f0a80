//! Human-readable metrics formatter
//!
//! # Example Output
//!
//! ```text
//! [metrics] queues: pipe_a (12 queued, 1.2K polled, 40 bulk, 3 hb dropped)
//! [metrics] batches: pipe_a (120 emitted, 16.0 MB, 4.1ms avg delay)
//! [metrics] connectors: pipe_a (8.0 MB/s, 240 pieces, 3 sealed, 0 retrying, 1 in flight)
//! ```

use std::fmt::Write;

use super::{MetricsFormatter, format_bytes, format_bytes_per_sec, format_count, format_millis};
use crate::{CollectedMetrics, ConnectorRates};

/// Human-readable metrics formatter
#[derive(Debug, Clone, Default)]
pub struct HumanFormatter;

impl HumanFormatter {
    pub fn new() -> Self {
        Self
    }

    fn format_queues(&self, metrics: &CollectedMetrics) -> Option<String> {
        if metrics.queues.is_empty() {
            return None;
        }

        let mut output = String::from("[metrics] queues:");
        for (i, queue) in metrics.queues.iter().enumerate() {
            if i > 0 {
                output.push_str(" |");
            }
            let snapshot = &queue.snapshot;
            let _ = write!(
                output,
                " {} ({} queued, {} polled, {} bulk, {} hb dropped)",
                queue.id,
                queue.queued,
                format_count(snapshot.polled),
                format_count(snapshot.bulk_polled),
                format_count(snapshot.heartbeats_coalesced),
            );
        }
        Some(output)
    }

    fn format_batches(&self, metrics: &CollectedMetrics) -> Option<String> {
        if metrics.batches.is_empty() {
            return None;
        }

        let mut output = String::from("[metrics] batches:");
        for (i, batch) in metrics.batches.iter().enumerate() {
            if i > 0 {
                output.push_str(" |");
            }
            let snapshot = &batch.snapshot;
            let _ = write!(
                output,
                " {} ({} emitted, {}, {} avg delay)",
                batch.id,
                format_count(snapshot.emissions),
                format_bytes(snapshot.bytes),
                format_millis(snapshot.delay.mean()),
            );
        }
        Some(output)
    }

    fn format_connectors(
        &self,
        metrics: &CollectedMetrics,
        rates: Option<&[ConnectorRates]>,
    ) -> Option<String> {
        if metrics.connectors.is_empty() {
            return None;
        }

        let mut output = String::from("[metrics] connectors:");
        for (i, connector) in metrics.connectors.iter().enumerate() {
            if i > 0 {
                output.push_str(" |");
            }
            let snapshot = &connector.snapshot;
            let _ = write!(output, " {} (", connector.id);

            if let Some(rate) = rates
                .into_iter()
                .flatten()
                .find(|rate| rate.id == connector.id)
            {
                let _ = write!(output, "{}, ", format_bytes_per_sec(rate.bytes_per_sec));
            }

            let _ = write!(
                output,
                "{} pieces, {} sealed, {} retrying, {} in flight)",
                format_count(snapshot.transfer.pieces_sent),
                format_count(snapshot.transfer.seals),
                snapshot.retrying,
                snapshot.in_flight,
            );
        }
        Some(output)
    }
}

impl MetricsFormatter for HumanFormatter {
    fn format(&self, metrics: &CollectedMetrics, rates: Option<&[ConnectorRates]>) -> String {
        [
            self.format_queues(metrics),
            self.format_batches(metrics),
            self.format_connectors(metrics, rates),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n")
    }
}
