//! Pipe Configuration
//!
//! TOML-based configuration for the transport stage of a pipe: the realtime
//! queue, the tablet batch accumulator, the file transfer handler and the
//! process-wide memory budget. Every section is optional and falls back to
//! defaults, so an empty file is a valid configuration.
//!
//! The configuration is built once at startup and handed to each component
//! by reference. Nothing in this crate is a global.
//!
//! # Parsing
//!
//! ```
//! use pipe_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[batch]\nmax_delay_ms = 250").unwrap();
//! assert_eq!(config.batch.max_delay_ms, 250);
//! ```
//!
//! # Example
//!
//! ```toml
//! [queue]
//! bulk_poll_threshold = 10
//! historical_poll_threshold = 3
//! max_waiting_bulk_count = 1
//!
//! [batch]
//! max_delay_ms = 1000
//! max_batch_size_bytes = 16777216
//!
//! [transfer]
//! read_buffer_size = 8388608
//!
//! [memory]
//! total_bytes = 1073741824
//!
//! [log]
//! level = "info"
//! ```

mod batch;
mod error;
mod logging;
mod memory;
mod metrics;
mod queue;
mod transfer;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use batch::BatchConfig;
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use memory::MemoryConfig;
pub use metrics::{MetricsConfig, MetricsFormat};
pub use queue::QueueConfig;
pub use transfer::TransferConfig;

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Realtime priority queue scheduling
    pub queue: QueueConfig,

    /// Tablet batch accumulation limits
    pub batch: BatchConfig,

    /// Resumable file transfer and connector settings
    pub transfer: TransferConfig,

    /// Process-wide memory budget
    pub memory: MemoryConfig,

    /// Logging configuration
    pub log: LogConfig,

    /// Metrics reporting configuration
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, contains invalid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Rejects thresholds and sizes that would stall the queue, the batch
    /// or the transfer handler.
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::str::FromStr;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.queue.bulk_poll_threshold, 10);
        assert_eq!(config.batch.max_delay_ms, 1000);
        assert_eq!(config.transfer.read_buffer_size, 8 * 1024 * 1024);
        assert!(config.memory.total_bytes > 0);
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[queue]
bulk_poll_threshold = 3
historical_poll_threshold = 5
max_waiting_bulk_count = 2
max_blocking_time_ms = 200

[batch]
max_delay_ms = 500
max_batch_size_bytes = 1000

[transfer]
read_buffer_size = 4096
initial_retry_interval_ms = 250
max_client_number = 4
request_timeout_ms = 3000
node_id = 7

[memory]
total_bytes = 1048576
batch_budget_bytes = 65536
queue_budget_bytes = 65536

[log]
level = "debug"
format = "json"

[metrics]
enabled = false
interval = "5s"
format = "json"
"#;
        let config = Config::from_str(toml).unwrap();

        assert_eq!(config.queue.bulk_poll_threshold, 3);
        assert_eq!(config.queue.historical_poll_threshold, 5);
        assert_eq!(config.queue.max_waiting_bulk_count, 2);
        assert_eq!(config.batch.max_batch_size_bytes, 1000);
        assert_eq!(config.transfer.read_buffer_size, 4096);
        assert_eq!(config.transfer.node_id, 7);
        assert_eq!(config.memory.batch_budget_bytes, 65536);
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.metrics.format, MetricsFormat::Json);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_str("invalid { toml");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validation_runs_on_parse() {
        let result = Config::from_str("[transfer]\nread_buffer_size = 0");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[batch]\nmax_delay_ms = 42").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.batch.max_delay_ms, 42);
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file("/nonexistent/pipe.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pipe.toml"));
    }
}
