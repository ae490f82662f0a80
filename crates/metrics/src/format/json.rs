//! JSON metrics formatter
//!
//! Formats metrics as one JSON object per report for machine parsing.
//!
//! # Example Output
//!
//! ```json
//! {"type":"pipe","queues":[...],"batches":[...],"connectors":[...]}
//! ```

use serde::Serialize;

use super::MetricsFormatter;
use crate::{
    BatchMetricsSnapshot, CollectedMetrics, ConnectorMetricsSnapshot, ConnectorRates,
    QueueMetricsSnapshot,
};

/// JSON metrics formatter
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Serialize)]
struct ReportJson<'a> {
    #[serde(rename = "type")]
    report_type: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    queues: Vec<QueueJson<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    batches: Vec<BatchJson<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    connectors: Vec<ConnectorJson<'a>>,
}

#[derive(Serialize)]
struct QueueJson<'a> {
    id: &'a str,
    queued: usize,
    #[serde(flatten)]
    snapshot: &'a QueueMetricsSnapshot,
}

#[derive(Serialize)]
struct BatchJson<'a> {
    id: &'a str,
    #[serde(flatten)]
    snapshot: &'a BatchMetricsSnapshot,
}

#[derive(Serialize)]
struct ConnectorJson<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes_per_sec: Option<u64>,
    #[serde(flatten)]
    snapshot: &'a ConnectorMetricsSnapshot,
}

impl MetricsFormatter for JsonFormatter {
    fn format(&self, metrics: &CollectedMetrics, rates: Option<&[ConnectorRates]>) -> String {
        let report = ReportJson {
            report_type: "pipe",
            queues: metrics
                .queues
                .iter()
                .map(|queue| QueueJson {
                    id: &queue.id,
                    queued: queue.queued,
                    snapshot: &queue.snapshot,
                })
                .collect(),
            batches: metrics
                .batches
                .iter()
                .map(|batch| BatchJson {
                    id: &batch.id,
                    snapshot: &batch.snapshot,
                })
                .collect(),
            connectors: metrics
                .connectors
                .iter()
                .map(|connector| ConnectorJson {
                    id: &connector.id,
                    bytes_per_sec: rates
                        .into_iter()
                        .flatten()
                        .find(|rate| rate.id == connector.id)
                        .map(|rate| rate.bytes_per_sec as u64),
                    snapshot: &connector.snapshot,
                })
                .collect(),
        };

        serde_json::to_string(&report).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}
