//! Send command - Transfer a sealed file through a local pipe
//!
//! Wires the whole dispatch side in one process:
//!
//! ```text
//! FileInsertion -> RealtimeQueue -> SinkSubtask -> Connector -> LoopbackReceiver(--out)
//! ```
//!
//! The command returns once the event's last reference is released, which
//! happens only after the receiver has acknowledged the seal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;
use pipe_config::Config;
use pipe_memory::ResourceContext;
use pipe_metrics::{ConnectorMetricsProvider, MetricsReporter, TransferMetricsSnapshot};
use pipe_pipeline::{BulkInFlightCounter, RealtimeQueue};
use pipe_protocol::{CommitId, EnrichedEvent, Event, FileInsertion};
use pipe_sinks::{ClientPool, Connector, LoopbackReceiver, SinkSubtask, TabletBatch};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Arguments for the send command
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Sealed data file to transfer
    #[arg(long)]
    pub data_file: PathBuf,

    /// Modification file sent ahead of the data file
    #[arg(long)]
    pub mod_file: Option<PathBuf>,

    /// Directory the receiver writes into
    #[arg(long)]
    pub out: PathBuf,

    /// Pipe name stamped on the event
    #[arg(long, default_value = "pipe")]
    pub pipe: String,

    /// Region (consensus group) of the event
    #[arg(long, default_value_t = 1)]
    pub region: i32,

    /// Give up when the transfer has not completed after this many seconds
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}

/// Run the send command
pub async fn run(args: SendArgs, config: Config) -> Result<()> {
    let summary = transfer(&args, &config).await?;

    println!("Transferred {}", args.data_file.display());
    println!("  pieces:        {}", summary.metrics.pieces_sent);
    println!("  bytes:         {}", summary.metrics.piece_bytes);
    println!("  seals:         {}", summary.metrics.seals);
    println!("  offset resets: {}", summary.metrics.offset_resets);
    println!("  retries:       {}", summary.metrics.retries);
    println!("  elapsed:       {:?}", summary.elapsed);
    Ok(())
}

/// Outcome of one transfer
struct Summary {
    metrics: TransferMetricsSnapshot,
    elapsed: Duration,
}

async fn transfer(args: &SendArgs, config: &Config) -> Result<Summary> {
    for path in std::iter::once(&args.data_file).chain(args.mod_file.as_ref()) {
        if !path.is_file() {
            bail!("{} is not a file", path.display());
        }
    }
    tokio::fs::create_dir_all(&args.out)
        .await
        .with_context(|| format!("failed to create {}", args.out.display()))?;

    let context = ResourceContext::new(&config.memory);
    let in_flight = Arc::new(BulkInFlightCounter::new());
    let queue = Arc::new(RealtimeQueue::new(
        args.pipe.clone(),
        &config.queue,
        Arc::clone(&in_flight),
        context.queue_block(),
    ));
    let batch = TabletBatch::new(args.pipe.clone(), &config.batch, &context);
    let receiver = Arc::new(LoopbackReceiver::new(&args.out));
    let connector = Arc::new(Connector::new(
        args.pipe.clone(),
        &config.transfer,
        ClientPool::shared(receiver, config.transfer.max_client_number),
        in_flight,
    ));

    let cancel = CancellationToken::new();
    let reporter = MetricsReporter::builder()
        .config(config.metrics.clone())
        .queue(Arc::new(queue.metrics_handle()))
        .batch(Arc::new(batch.metrics_handle()))
        .connector(Arc::new(connector.metrics_handle()))
        .build();
    let metrics = connector.metrics_handle();
    let subtask = Arc::new(SinkSubtask::new(Arc::clone(&queue), batch, Arc::clone(&connector)));

    let reporter_task = tokio::spawn(reporter.run(cancel.clone()));
    let retry_task = tokio::spawn(Arc::clone(&connector).run_retry_worker(cancel.clone()));
    let subtask_task = {
        let subtask = Arc::clone(&subtask);
        let cancel = cancel.clone();
        tokio::spawn(async move { subtask.run(cancel).await })
    };

    let mut file = FileInsertion::new(&args.data_file);
    if let Some(mod_file) = &args.mod_file {
        file = file.with_mod_file(mod_file);
    }
    let done = Arc::new(Notify::new());
    let event = {
        let done = Arc::clone(&done);
        EnrichedEvent::builder(Event::File(file), args.pipe.clone(), args.region)
            .commit_id(CommitId::new(0, 0, 1))
            .on_release(move |_: &EnrichedEvent| done.notify_one())
            .build()
    };

    let started = Instant::now();
    info!(
        pipe = %args.pipe,
        data_file = %args.data_file.display(),
        out = %args.out.display(),
        "sending file"
    );
    queue.offer(event);

    let completed =
        tokio::time::timeout(Duration::from_secs(args.timeout_secs), done.notified()).await;
    let elapsed = started.elapsed();

    cancel.cancel();
    let _ = subtask_task.await;
    let _ = retry_task.await;
    let _ = reporter_task.await;
    subtask.close();

    if completed.is_err() {
        bail!(
            "transfer of {} did not complete within {}s",
            args.data_file.display(),
            args.timeout_secs
        );
    }

    info!(elapsed_ms = elapsed.as_millis() as u64, "file transferred");
    Ok(Summary {
        metrics: metrics.snapshot().transfer,
        elapsed,
    })
}
