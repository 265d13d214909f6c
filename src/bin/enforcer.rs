//! Enforcer service binary
//!
//! Standalone mode: in-memory store and cache seeded from a fleet file, a
//! local epoch counter, and real HTTP polling of the fleet.

use axum::{routing::get, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use enforcer_core::cache::MemoryCache;
use enforcer_core::collector::{ClientConfig, HttpNodeClient};
use enforcer_core::runtime::RuntimeConfig;
use enforcer_core::schema::{Node, Stat};
use enforcer_core::storage::MemoryStore;
use enforcer_core::{Enforcer, EnforcerConfig, EnforcerRuntime, EpochTracker, ShutdownSignal};

/// How long background tasks get to finish after the run loop stops
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Deserialize)]
struct FleetSeed {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    stats: Vec<Stat>,
}

fn load_fleet(path: Option<String>) -> Result<FleetSeed, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let raw = std::fs::read(&path)?;
            let seed: FleetSeed = serde_json::from_slice(&raw)?;
            info!(path = %path, nodes = seed.nodes.len(), stats = seed.stats.len(), "Loaded fleet seed");
            Ok(seed)
        }
        None => {
            warn!("ENFORCER_FLEET_FILE not set, starting with an empty fleet");
            Ok(FleetSeed::default())
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    enforcer_core::logging::init_tracing();

    let runtime = EnforcerRuntime::new(RuntimeConfig::default())?;
    info!(threads = runtime.worker_threads(), "Starting enforcer");

    let result = runtime.block_on(serve());
    runtime.shutdown(SHUTDOWN_GRACE);
    info!("Enforcer exited");
    result
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let config = EnforcerConfig::from_env();

    let metrics_addr: SocketAddr = std::env::var("ENFORCER_METRICS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9100".into())
        .parse()?;
    let epoch_length = std::env::var("ENFORCER_EPOCH_LENGTH_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(3600));

    let seed = load_fleet(std::env::var("ENFORCER_FLEET_FILE").ok())?;
    let store = Arc::new(MemoryStore::with_fleet(seed.nodes, seed.stats));
    let cache = Arc::new(MemoryCache::new());
    let epochs = Arc::new(EpochTracker::starting_at(1));
    let client = Arc::new(HttpNodeClient::new(ClientConfig {
        request_timeout: config.poll_timeout,
        ..Default::default()
    })?);

    let enforcer = Arc::new(Enforcer::new(config, store, cache, epochs.clone(), client));
    let shutdown = ShutdownSignal::new();

    // Local epochs
    let mut epoch_stop = shutdown.listener();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(epoch_length);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = epoch_stop.wait() => break,
                _ = ticker.tick() => {
                    epochs.advance_epoch().await;
                }
            }
        }
    });

    // Metrics API
    tokio::spawn(async move {
        let app = Router::new()
            .route("/metrics", get(|| async { enforcer_core::metrics::gather_system_metrics() }))
            .layer(CorsLayer::permissive());

        let listener = match tokio::net::TcpListener::bind(metrics_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(addr = %metrics_addr, error = %e, "Metrics listener bind failed");
                return;
            }
        };
        info!(addr = %metrics_addr, "Metrics API listening");

        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "Metrics server error");
        }
    });

    if let Err(e) = enforcer.init().await {
        error!(error = %e, "Enforcer initialization failed");
        return Err(e.into());
    }

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal.shutdown();
            }
            Err(e) => warn!(error = %e, "Unable to listen for Ctrl-C"),
        }
    });

    enforcer.run(shutdown).await?;
    Ok(())
}
