//! Account Indexer
//!
//! Replays an account feed through the indexer with jittered arrival times,
//! waits for pending settlements and prints the highest token value seen per
//! account type.
//!
//! Usage:
//!   account-indexer --input coding-challenge-input.json --seed 7
//!
//! Environment:
//!   INDEXER_INPUT       - Feed file (default: coding-challenge-input.json)
//!   INDEXER_CONFIG_PATH - TOML config (default: indexer_config.toml, optional)
//!   RUST_LOG            - Log filter (default: account_indexer=info)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use account_indexer::driver::LoadDriver;
use account_indexer::feed::load_feed;
use account_indexer::{DriverConfig, IndexEvent, IndexerConfig, IndexingProcessor};

#[derive(Parser, Debug)]
#[command(name = "account-indexer")]
#[command(about = "Index versioned account updates and report max tokens per account type")]
struct Args {
    /// JSON feed of account records
    #[arg(long, env = "INDEXER_INPUT", default_value = "coding-challenge-input.json")]
    input: PathBuf,

    /// TOML config file; falls back to INDEXER_CONFIG_PATH, then defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for arrival jitter
    #[arg(long, env = "INDEXER_SEED")]
    seed: Option<u64>,

    /// Submit every update without arrival delay
    #[arg(long)]
    no_jitter: bool,

    /// Shutdown grace period in milliseconds
    #[arg(long, env = "INDEXER_GRACE_MS")]
    grace_ms: Option<u64>,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = build_config(&args)?;

    info!("🚀 Starting account indexer");
    info!("  Input: {}", args.input.display());
    info!("  Tracked types: {}", config.tracked_types.len());
    info!("  Shutdown grace: {}ms", config.shutdown_grace_ms);

    let batch = load_feed(&args.input)?;
    info!(
        accepted = batch.len(),
        rejected = batch.rejected.len(),
        "Loaded account feed"
    );

    let indexer = IndexingProcessor::new(config.clone());
    let event_log = spawn_event_logger(indexer.subscribe());

    let mut driver = LoadDriver::new(&indexer, config.driver.clone());
    tokio::select! {
        _ = driver.run(&batch.updates) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; no further updates will be submitted");
        }
    }

    let report = indexer.shutdown().await;

    // Dropping the indexer closes the event bus; let the logger flush.
    drop(driver);
    drop(indexer);
    if tokio::time::timeout(Duration::from_secs(1), event_log).await.is_err() {
        warn!("Event logger did not finish flushing");
    }

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to encode final report")?;
        println!("{}", json);
    } else {
        print!("{}", report);
    }

    if report.degraded {
        warn!(
            interrupted = report.interrupted.len(),
            unresponsive = report.unresponsive,
            "Statistics exclude settlements stopped at shutdown"
        );
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "account_indexer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_config(args: &Args) -> Result<IndexerConfig> {
    let mut config = match &args.config {
        Some(path) => IndexerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => IndexerConfig::from_env(),
    };

    if args.no_jitter {
        config.driver = DriverConfig {
            seed: config.driver.seed,
            ..DriverConfig::immediate()
        };
    }
    if let Some(seed) = args.seed {
        config.driver.seed = Some(seed);
    }
    if let Some(grace_ms) = args.grace_ms {
        config.shutdown_grace_ms = grace_ms;
    }
    Ok(config)
}

/// Render indexer notifications as trace lines.
fn spawn_event_logger(mut rx: broadcast::Receiver<IndexEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!(target: "account_indexer::events", "{}", event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger fell behind; notifications dropped")
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
