//! Offkit smoke harness.
//!
//! Installs and activates the offline layer against a live origin, then runs
//! each target URL through the fetch handler and prints one JSON line per
//! step. With `--store` the resource store is loaded before and saved after
//! the run, so a second run with `--offline` shows what the device would see
//! without a connection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use offkit_common::{init_logging, LogConfig, LogFormat};
use offkit_net::{HttpNetwork, LoaderConfig, Request};
use offkit_sw::{FetchOutcome, OfflineConfig, ResourceStore, ServiceWorker};
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "offkit-smoke")]
#[command(about = "Exercise the offline layer against a live origin")]
struct Args {
    /// JSON config file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Origin to use instead of the configured one
    #[arg(long)]
    origin: Option<String>,

    /// Store snapshot to load before and save after the run
    #[arg(long)]
    store: Option<PathBuf>,

    /// Treat the network as unavailable
    #[arg(long)]
    offline: bool,

    /// Send targets as page navigations
    #[arg(long)]
    navigate: bool,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,

    /// Paths or absolute URLs to fetch
    targets: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = if args.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default().with_filter("warn,offkit_sw=info")
    };
    init_logging(log_config.with_format(args.log_format))?;

    let mut config = match args.config {
        Some(ref path) => OfflineConfig::from_json_file(path)?,
        None => OfflineConfig::default(),
    };
    if let Some(ref origin) = args.origin {
        config.origin = origin.clone();
    }

    let store = ResourceStore::from_config(&config)?;
    if let Some(ref path) = args.store {
        if path.exists() {
            store
                .load_from_path(path)
                .await
                .with_context(|| format!("loading store from {}", path.display()))?;
            info!(path = %path.display(), generations = ?store.keys().await, "Store loaded");
        }
    }

    let network = Arc::new(HttpNetwork::new(LoaderConfig::default())?);
    network.set_online(!args.offline);

    let (worker, _events) = ServiceWorker::new(config, store.clone(), network)?;

    let started = Instant::now();
    let install = worker.install().await?;
    println!(
        "{}",
        json!({
            "step": "install",
            "generation": install.generation,
            "status": format!("{:?}", install.status),
            "seeded": install.seeded,
            "migrated": install.migrated,
            "seed_error": install.seed_error,
            "third_party_cached": install.third_party_cached,
            "third_party_failed": install.third_party_failed,
            "elapsed_ms": started.elapsed().as_millis() as u64,
        })
    );

    let activate = worker.activate().await?;
    println!(
        "{}",
        json!({
            "step": "activate",
            "active": activate.cleanup.active,
            "deleted": activate.cleanup.deleted,
        })
    );

    let mut failures = 0;
    for target in &args.targets {
        let url = store
            .resolve_key(target)
            .with_context(|| format!("target '{target}'"))?;
        let request = if args.navigate {
            Request::navigate(url)
        } else {
            Request::get(url)
        };

        let started = Instant::now();
        let outcome = worker.handle_fetch(&request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let line = match outcome {
            FetchOutcome::Passthrough => json!({
                "step": "fetch",
                "url": request.url.as_str(),
                "outcome": "passthrough",
                "elapsed_ms": elapsed_ms,
            }),
            FetchOutcome::Respond(response) => json!({
                "step": "fetch",
                "url": request.url.as_str(),
                "outcome": "respond",
                "status": response.status.as_u16(),
                "source": format!("{:?}", response.source),
                "bytes": response.body.len(),
                "elapsed_ms": elapsed_ms,
            }),
            FetchOutcome::Failed(error) => {
                failures += 1;
                json!({
                    "step": "fetch",
                    "url": request.url.as_str(),
                    "outcome": "failed",
                    "error": error.to_string(),
                    "elapsed_ms": elapsed_ms,
                })
            }
        };
        println!("{line}");
    }

    let stats = store.stats();
    println!(
        "{}",
        json!({
            "step": "stats",
            "reads": stats.reads,
            "hits": stats.hits,
            "misses": stats.misses,
            "writes": stats.writes,
            "write_failures": stats.write_failures,
        })
    );

    if let Some(ref path) = args.store {
        store
            .save_to_path(path)
            .await
            .with_context(|| format!("saving store to {}", path.display()))?;
        info!(path = %path.display(), "Store saved");
    }

    if failures > 0 {
        warn!(failures, "Some fetches failed");
        std::process::exit(1);
    }
    Ok(())
}
