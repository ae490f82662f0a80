//! Pipe - Transport stage of a consensus pipe
//!
//! # Usage
//!
//! ```bash
//! # Validate a configuration and print the effective values
//! pipe check --config configs/pipe.toml
//!
//! # Transfer a sealed file (and its modification file) to a local directory
//! pipe send --data-file 1-1-0-0.tsfile --mod-file 1-1-0-0.tsfile.mods --out /tmp/received
//! ```

mod cmd;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipe_config::{Config, LogFormat};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Pipe - Transport stage of a consensus pipe
#[derive(Parser, Debug)]
#[command(name = "pipe")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then print it
    Check,

    /// Transfer a file through the connector to a local receiver
    Send(cmd::send::SendArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Check => {
            // Check only prints, no logging
            cmd::check::run(&config, cli.config.as_deref())
        }
        Command::Send(args) => {
            let log_level = resolve_log_level(cli.log_level.as_deref(), &config);
            init_logging(&log_level, config.log.format)?;
            cmd::send::run(args, config).await
        }
    }
}

/// Configuration from `path`, or defaults when no path was given
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Resolve log level: CLI flag > config file > default "info"
fn resolve_log_level(cli_level: Option<&str>, config: &Config) -> String {
    match cli_level {
        Some(level) => level.to_string(),
        None => config.log.level.as_str().to_string(),
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    match format {
        LogFormat::Console => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init(),
    }

    Ok(())
}
