//! sqlsink - pipe newline-delimited events into a SQL table
//!
//! # Usage
//!
//! ```bash
//! # Mapping mode: every line is a `key=value|key=value` event
//! tail -F access.log | sqlsink --config sink.yaml
//!
//! # Slower retry after failed batches
//! sqlsink -c sink.yaml --interval-ms 5000 < events.txt
//! ```
//!
//! The process drains stdin until EOF, then flushes the channel and exits.
//! Ctrl-C stops after the batch in flight.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sqlsink::prelude::*;

#[derive(Parser)]
#[command(name = "sqlsink")]
#[command(version, about = "Transactional batch sink from stdin events into a SQL database")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "sink.yaml")]
    config: PathBuf,

    /// Sink name used in logs
    #[arg(long, default_value = "sqlsink")]
    name: String,

    /// Pause after a backoff or an idle poll, in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Channel capacity in events
    #[arg(long, default_value_t = sqlsink::channel::DEFAULT_CAPACITY)]
    capacity: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ctx = SinkContext::from_yaml_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let batch_size = SinkConfig::from_context(&ctx)
        .context("Invalid sink configuration")?
        .batch_size;
    let channel = MemoryChannel::for_batch_size("stdin", cli.capacity, batch_size);
    let pool = Arc::new(PoolManager::with_default_drivers());
    let sink = SqlSink::new(cli.name.clone(), Arc::new(channel.clone()), Arc::clone(&pool));

    sink.configure(&ctx).await.context("Invalid sink configuration")?;
    sink.start().await?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping after the current batch");
                shutdown.store(true, Ordering::Release);
            }
        });
    }

    let reader_done = Arc::new(AtomicBool::new(false));
    let reader = tokio::spawn(read_stdin(
        channel.clone(),
        Arc::clone(&reader_done),
        Arc::clone(&shutdown),
    ));

    let interval = Duration::from_millis(cli.interval_ms);
    let outcome = run(&sink, &channel, &reader_done, &shutdown, interval).await;

    sink.stop().await;
    reader.abort();
    if let Err(e) = pool.close().await {
        warn!(error = %e, "Error closing connection pool");
    }

    let counters = sink.counters().snapshot();
    info!(
        delivered = counters.drain_success,
        failed_batches = counters.connection_failed,
        pending = channel.len(),
        "sqlsink finished"
    );

    outcome
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn run(
    sink: &SqlSink,
    channel: &MemoryChannel,
    reader_done: &AtomicBool,
    shutdown: &AtomicBool,
    interval: Duration,
) -> Result<()> {
    while !shutdown.load(Ordering::Acquire) {
        match sink.process().await {
            Ok(Status::Ready) => {
                // Read the flag first so no event offered before it is missed
                let finished = reader_done.load(Ordering::Acquire);
                if channel.is_empty() {
                    if finished {
                        break;
                    }
                    tokio::time::sleep(interval).await;
                }
            }
            Ok(Status::Backoff) => tokio::time::sleep(interval).await,
            Err(e) => {
                error!(error = %e, "Sink failed");
                return Err(e.into());
            }
        }
    }
    Ok(())
}

async fn read_stdin(channel: MemoryChannel, done: Arc<AtomicBool>, shutdown: Arc<AtomicBool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                let event = Event::with_body(line);
                // Channel full: wait for the sink to drain it
                while channel.offer(event.clone()).is_err() {
                    if shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
    done.store(true, Ordering::Release);
}
