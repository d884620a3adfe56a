//! ShelfScan - barcode and QR code product scanner
//!
//! Reads decoded symbols frame by frame, looks up every new code through a
//! chain of product databases and keeps a deduplicated JSON scan log.

mod capture;
mod config;
mod lookup;
mod overlay;
mod pipeline;
mod storage;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::capture::JsonLinesSource;
use crate::config::AppConfig;
use crate::lookup::ProviderChain;
use crate::overlay::ChannelOverlay;
use crate::pipeline::{FrameReport, ScanPipeline};
use crate::storage::RecordStore;

/// Frames buffered between the reader thread and the pipeline
const FRAME_QUEUE: usize = 8;

/// ShelfScan - resolve scanned barcodes to product records
#[derive(Parser, Debug)]
#[command(name = "shelfscan")]
#[command(about = "Resolve decoded barcodes to product metadata and keep a deduplicated scan log")]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Decoded frame stream, one JSON object per line ("-" for stdin)
    #[arg(short, long, default_value = "-")]
    input: PathBuf,

    /// Scan log path, overrides the config
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Reject QR codes and symbologies without a check digit
    #[arg(long)]
    barcode_only: bool,

    /// Write the default configuration and exit
    #[arg(long)]
    write_default_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.write_default_config {
        let path = match &args.config {
            Some(path) => path.clone(),
            None => config::default_config_path()?,
        };
        config::save_config(&AppConfig::default(), &path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    info!("ShelfScan starting...");

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => load_or_create_config(),
    };
    if let Some(log) = &args.log {
        config.storage.log_path = log.clone();
    }
    if args.barcode_only {
        config.scan.barcode_only = true;
    }

    let rt = Runtime::new().context("Failed to create tokio runtime")?;
    let totals = rt.block_on(run_scanner(config, &args.input))?;

    info!(
        symbols = totals.detected,
        recorded = totals.recorded.len(),
        duplicates = totals.duplicates,
        invalid = totals.invalid,
        unresolved = totals.unresolved,
        "ShelfScan shutdown complete"
    );

    Ok(())
}

/// Load configuration from the default location or fall back to defaults
fn load_or_create_config() -> AppConfig {
    if let Ok(config_path) = config::default_config_path() {
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => warn!("Ignoring invalid configuration: {:#}", e),
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

/// Scan frames until the stream ends or Ctrl-C
async fn run_scanner(config: AppConfig, input: &Path) -> Result<FrameReport> {
    let providers = lookup::build_providers(&config.lookup)?;
    let chain = ProviderChain::new(providers, Duration::from_secs(config.lookup.timeout_secs));
    if chain.is_empty() {
        warn!("No product providers enabled, codes will be recorded without metadata");
    }

    let store = RecordStore::open(&config.storage.log_path)
        .context("Failed to load scan log")?
        .with_persist_unresolved(config.storage.persist_unresolved);
    if store.is_empty() {
        info!("Starting a new scan log at {:?}", store.path());
    } else {
        info!(
            "Scan log {:?} holds {} records ({} known codes)",
            store.path(),
            store.len(),
            store.seen().len()
        );
    }

    let pipeline = ScanPipeline::new(chain, store, config.scan.validation_mode())
        .with_max_concurrent_lookups(config.scan.max_concurrent_lookups);

    let (mut overlay, overlay_rx) = ChannelOverlay::channel();
    let renderer = overlay::spawn_log_renderer(overlay_rx);

    let source = JsonLinesSource::open(input, config.scan.aux_regions)?;
    let (mut frames, _reader) = capture::spawn_reader(source, FRAME_QUEUE);

    let mut totals = FrameReport::default();
    let stop = tokio::signal::ctrl_c();
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => {
                info!("Stop requested");
                break;
            }
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                match pipeline.process_frame(&frame, &mut overlay).await {
                    Ok(report) => {
                        debug!(
                            frame = frame.index,
                            symbols = report.detected,
                            latency_ms = frame.timestamp.elapsed().as_millis() as u64,
                            "Frame processed"
                        );
                        totals.merge(report);
                    }
                    Err(e) => {
                        error!("Scan log write failed, no further codes will be recorded: {}", e);
                        return Err(e.into());
                    }
                }
            }
        }
    }

    drop(overlay);
    if renderer.join().is_err() {
        warn!("Overlay renderer panicked");
    }

    Ok(totals)
}
