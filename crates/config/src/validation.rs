//! Configuration validation
//!
//! Catches values that would leave a component unable to make progress:
//! - Zero poll threshold or zero bulk in-flight cap in the queue
//! - Zero delay or zero capacity in the batch
//! - Zero read buffer or empty client pool in the transfer handler
//! - A memory budget too small to hold a single read buffer

use crate::Config;
use crate::error::{ConfigError, Result};

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_queue(config)?;
    validate_batch(config)?;
    validate_transfer(config)?;
    validate_memory(config)?;
    Ok(())
}

fn validate_queue(config: &Config) -> Result<()> {
    if config.queue.bulk_poll_threshold == 0 {
        return Err(ConfigError::invalid_value(
            "queue",
            "bulk_poll_threshold",
            "must be greater than 0",
        ));
    }
    if config.queue.max_waiting_bulk_count == 0 {
        return Err(ConfigError::invalid_value(
            "queue",
            "max_waiting_bulk_count",
            "must be greater than 0, otherwise file events are never delivered",
        ));
    }
    Ok(())
}

fn validate_batch(config: &Config) -> Result<()> {
    if config.batch.max_delay_ms == 0 {
        return Err(ConfigError::invalid_value(
            "batch",
            "max_delay_ms",
            "must be greater than 0",
        ));
    }
    if config.batch.max_batch_size_bytes == 0 {
        return Err(ConfigError::invalid_value(
            "batch",
            "max_batch_size_bytes",
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_transfer(config: &Config) -> Result<()> {
    if config.transfer.read_buffer_size == 0 {
        return Err(ConfigError::invalid_value(
            "transfer",
            "read_buffer_size",
            "must be greater than 0",
        ));
    }
    if config.transfer.max_client_number == 0 {
        return Err(ConfigError::invalid_value(
            "transfer",
            "max_client_number",
            "must be greater than 0",
        ));
    }
    if config.transfer.initial_retry_interval_ms == 0 {
        return Err(ConfigError::invalid_value(
            "transfer",
            "initial_retry_interval_ms",
            "must be greater than 0, a zero interval never grows",
        ));
    }
    Ok(())
}

fn validate_memory(config: &Config) -> Result<()> {
    if config.memory.total_bytes < config.transfer.read_buffer_size as u64 {
        return Err(ConfigError::invalid_value(
            "memory",
            "total_bytes",
            format!(
                "{} is smaller than transfer.read_buffer_size ({})",
                config.memory.total_bytes, config.transfer.read_buffer_size
            ),
        ));
    }
    Ok(())
}
