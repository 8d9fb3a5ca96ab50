//! Interactive console for the bench instrument.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use benchlink::config::validate_capacity;
use benchlink::console::Console;
use benchlink::tracing::{self, prelude::*};
use benchlink::{BenchService, CommandLine, SupervisorConfig};

/// Connect to the bench instrument through its BLE worker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker command line; the device name is appended (overrides BENCHLINK_WORKER)
    #[arg(long)]
    worker: Option<String>,

    /// Device scan helper command line (overrides BENCHLINK_SCANNER)
    #[arg(long)]
    scanner: Option<String>,

    /// Milliseconds a worker may take to exit after QUIT (overrides BENCHLINK_GRACE_MS)
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Number of worker log lines kept (overrides BENCHLINK_LOG_CAPACITY)
    #[arg(long)]
    log_capacity: Option<usize>,
}

impl Args {
    fn apply(&self, config: &mut SupervisorConfig) -> Result<()> {
        if let Some(worker) = &self.worker {
            config.worker = worker.parse::<CommandLine>().context("--worker")?;
        }
        if let Some(scanner) = &self.scanner {
            config.scanner = scanner.parse::<CommandLine>().context("--scanner")?;
        }
        if let Some(ms) = self.grace_ms {
            config.grace_period = Duration::from_millis(ms);
        }
        if let Some(capacity) = self.log_capacity {
            config.log_capacity = validate_capacity(capacity).context("--log-capacity")?;
        }
        Ok(())
    }
}

/// How long a pending stdin read may hold up process exit.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    let args = Args::parse();
    tracing::init_journald_or_stdout();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = runtime.block_on(run(args));
    // A console stopped by a signal still has a blocking stdin read in flight.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run(args: Args) -> Result<()> {
    let mut config =
        SupervisorConfig::from_env().context("Failed to read configuration from environment")?;
    args.apply(&mut config)?;

    info!(
        worker = %config.worker,
        scanner = %config.scanner,
        grace_ms = config.grace_period.as_millis() as u64,
        log_capacity = config.log_capacity,
        "Starting benchlink"
    );

    Console::new(BenchService::new(&config)).run().await
}
