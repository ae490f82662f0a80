//! Periodic metrics reporter
//!
//! Collects snapshots from every registered provider at the configured
//! interval and logs them through `tracing`. Spawn `run()` as a task and
//! cancel it with the shared `CancellationToken` on shutdown.

use std::sync::Arc;
use std::time::Instant;

use pipe_config::{MetricsConfig, MetricsFormat};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::collected::{CollectedBatch, CollectedConnector, CollectedQueue};
use crate::{
    BatchMetricsProvider, CollectedMetrics, ConnectorMetricsProvider, HumanFormatter,
    JsonFormatter, MetricsFormatter, QueueMetricsProvider,
};

/// Builder for constructing a `MetricsReporter`
#[derive(Default)]
pub struct MetricsReporterBuilder {
    config: Option<MetricsConfig>,
    queues: Vec<Arc<dyn QueueMetricsProvider>>,
    batches: Vec<Arc<dyn BatchMetricsProvider>>,
    connectors: Vec<Arc<dyn ConnectorMetricsProvider>>,
}

impl MetricsReporterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: MetricsConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn queue(mut self, provider: Arc<dyn QueueMetricsProvider>) -> Self {
        self.queues.push(provider);
        self
    }

    #[must_use]
    pub fn batch(mut self, provider: Arc<dyn BatchMetricsProvider>) -> Self {
        self.batches.push(provider);
        self
    }

    #[must_use]
    pub fn connector(mut self, provider: Arc<dyn ConnectorMetricsProvider>) -> Self {
        self.connectors.push(provider);
        self
    }

    pub fn build(self) -> MetricsReporter {
        let config = self.config.unwrap_or_default();
        let formatter: Box<dyn MetricsFormatter> = match config.format {
            MetricsFormat::Human => Box::new(HumanFormatter::new()),
            MetricsFormat::Json => Box::new(JsonFormatter::new()),
        };

        MetricsReporter {
            config,
            formatter,
            queues: self.queues,
            batches: self.batches,
            connectors: self.connectors,
            previous: None,
        }
    }
}

/// Reports metrics from all registered providers at a fixed interval
pub struct MetricsReporter {
    config: MetricsConfig,
    formatter: Box<dyn MetricsFormatter>,
    queues: Vec<Arc<dyn QueueMetricsProvider>>,
    batches: Vec<Arc<dyn BatchMetricsProvider>>,
    connectors: Vec<Arc<dyn ConnectorMetricsProvider>>,
    previous: Option<CollectedMetrics>,
}

impl MetricsReporter {
    pub fn builder() -> MetricsReporterBuilder {
        MetricsReporterBuilder::new()
    }

    /// Run the reporter until cancellation
    pub async fn run(mut self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("metrics reporting disabled");
            return;
        }

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.interval.as_secs(),
            format = ?self.config.format,
            "metrics reporter started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.report();
                }
            }
        }
    }

    /// Collect and report once; returns the formatted output
    pub fn report(&mut self) -> String {
        let metrics = self.collect();
        let rates = self
            .previous
            .as_ref()
            .and_then(|previous| metrics.rates(previous));

        let output = self.formatter.format(&metrics, rates.as_deref());
        for line in output.lines() {
            info!("{}", line);
        }

        self.previous = Some(metrics);
        output
    }

    fn collect(&self) -> CollectedMetrics {
        CollectedMetrics {
            timestamp: Some(Instant::now()),
            queues: self
                .queues
                .iter()
                .map(|provider| CollectedQueue {
                    id: provider.queue_id().to_owned(),
                    queued: provider.queued(),
                    snapshot: provider.snapshot(),
                })
                .collect(),
            batches: self
                .batches
                .iter()
                .map(|provider| CollectedBatch {
                    id: provider.batch_id().to_owned(),
                    snapshot: provider.snapshot(),
                })
                .collect(),
            connectors: self
                .connectors
                .iter()
                .map(|provider| CollectedConnector {
                    id: provider.connector_id().to_owned(),
                    snapshot: provider.snapshot(),
                })
                .collect(),
        }
    }
}
