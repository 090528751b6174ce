use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use blocklog_config::{ConfigLoad, ConfigLoader, ShipperSettings};
use blocklog_core::shipper::{remote_cursor, scan_directory};
use blocklog_core::{BlockNumber, BlockShipper, FileObserver};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use tokio::time::{Instant, Interval, interval_at};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "blocklog")]
#[command(about = "Ships a block-log directory to an object store in strict block order")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct RunArgs {
    /// Settings file (TOML or JSON). Overrides $BLOCKLOG_CONFIG_PATH
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Destination (`s3://bucket`, bucket name, or `file:///path`); empty disables
    #[arg(long)]
    destination: Option<String>,

    /// Directory the producer writes block files into
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Uploader tick interval, e.g. `500ms` or `2s`
    #[arg(long, value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    /// Log a status summary this often; `0s` disables
    #[arg(
        long,
        env = "BLOCKLOG_STATUS_INTERVAL",
        value_parser = humantime::parse_duration,
        default_value = "60s"
    )]
    status_interval: Duration,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate settings, check the destination and report the backlog, then exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                // Override via RUST_LOG.
                .unwrap_or_else(|_| "info,aws_config=warn,aws_smithy_runtime=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = load_settings(&cli.run)?;

    match cli.command {
        Some(Command::Check) => run_check(&settings).await,
        None => run_shipper(&settings, cli.run.status_interval).await,
    }
}

fn load_settings(args: &RunArgs) -> anyhow::Result<ShipperSettings> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::new().config_path(path),
        None => ConfigLoader::new(),
    };
    let ConfigLoad { mut settings, .. } =
        loader.load().context("failed to load configuration")?;

    if let Some(destination) = &args.destination {
        settings.destination = destination.trim().to_string();
    }
    if let Some(dir) = &args.dir {
        settings.tx_log_directory = dir.clone();
    }
    if let Some(interval) = args.poll_interval {
        settings.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    }

    blocklog_config::validate(&settings).context("invalid command line overrides")?;
    Ok(settings)
}

/// Logs observer callbacks; the daemon has no other consumers.
#[derive(Debug)]
struct TraceObserver;

impl FileObserver for TraceObserver {
    fn on_file(&self, path: &Path) {
        debug!(target: "blocklog::observer", path = %path.display(), "block file queued");
    }

    fn on_uploaded(&self, block: BlockNumber, path: &Path) {
        debug!(target: "blocklog::observer", block = %block, path = %path.display(), "block file shipped");
    }
}

async fn run_shipper(settings: &ShipperSettings, status_interval: Duration) -> anyhow::Result<()> {
    let observer: Arc<dyn FileObserver> = Arc::new(TraceObserver);
    let config = settings
        .to_shipper_config(vec![observer])
        .context("failed to build shipper configuration")?;
    let shipper = BlockShipper::open(config, &settings.s3.to_options()).await;

    shipper
        .init()
        .await
        .context("failed to start block shipper")?;

    if !shipper.is_enabled() {
        info!("block shipping disabled; set TX_LOG_S3_BUCKET or `destination` to enable");
        return Ok(());
    }

    let mut status_ticker = (!status_interval.is_zero())
        .then(|| interval_at(Instant::now() + status_interval, status_interval));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for shutdown signal");
                }
                break;
            }
            _ = next_status_tick(status_ticker.as_mut()) => {
                let status = shipper.status().await;
                info!(
                    current_block = ?status.state.current_block.map(BlockNumber::get),
                    pending = status.state.pending,
                    stalled_ticks = status.state.stalled_ticks,
                    failed_attempts = status.state.failed_attempts,
                    uploaded_total = status.state.uploaded_total,
                    "shipper status"
                );
            }
        }
    }

    info!("shutting down block shipper");
    shipper.shutdown().await;
    Ok(())
}

async fn next_status_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[derive(Debug, Serialize)]
struct CheckReport {
    destination: Option<String>,
    directory: PathBuf,
    environment: String,
    remote_top: Option<BlockNumber>,
    local_blocks: usize,
    local_top: Option<BlockNumber>,
    backlog: usize,
}

async fn run_check(settings: &ShipperSettings) -> anyhow::Result<()> {
    let naming = settings.naming()?;
    let destination = settings.parsed_destination()?;

    let local = scan_directory(&naming, &settings.tx_log_directory, settings.recursive)
        .await
        .context("failed to scan block directory")?;

    let remote_top = match &destination {
        Some(destination) => {
            let store = destination.open(&settings.s3.to_options()).await;
            store
                .exists()
                .await
                .with_context(|| format!("destination {destination} is not reachable"))?;
            remote_cursor(store.as_ref(), &naming)
                .await
                .context("failed to list uploaded blocks")?
        }
        None => None,
    };

    let backlog = local
        .iter()
        .filter(|(number, _)| remote_top.is_none_or(|top| *number > top))
        .count();

    let report = CheckReport {
        destination: destination.as_ref().map(ToString::to_string),
        directory: settings.tx_log_directory.clone(),
        environment: settings.environment.to_string(),
        remote_top,
        local_blocks: local.len(),
        local_top: local.last().map(|(number, _)| *number),
        backlog,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
