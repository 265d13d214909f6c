//! Worker-status collection
//!
//! Polls every node concurrently and keeps whatever answered. A node that
//! fails, times out, or sends garbage is simply absent from the result.

pub mod client;
pub mod status;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::metrics::standard;
use crate::schema::{Address, Stat};

pub use client::{ClientConfig, HttpNodeClient, NodeStatusClient};
pub use status::{
    ComponentInfo, DecentralizedWorkerInfo, FederatedInfo, RssWorkerInfo, WorkerResponse,
    WorkerStatus,
};

/// Per-node reports gathered in one cycle
pub type NodeReports = HashMap<Address, ComponentInfo>;

/// Fans status requests out to the whole fleet
#[derive(Clone)]
pub struct WorkerStatusCollector {
    client: Arc<dyn NodeStatusClient>,
    poll_timeout: Duration,
    max_in_flight: usize,
}

impl WorkerStatusCollector {
    pub fn new(client: Arc<dyn NodeStatusClient>, poll_timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            client,
            poll_timeout,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Poll every node in `stats`. Never fails; failed nodes are left out.
    ///
    /// Dropping the returned future aborts every outstanding request.
    pub async fn collect(&self, stats: &[Stat]) -> NodeReports {
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for stat in stats {
            let client = self.client.clone();
            let permits = permits.clone();
            let poll_timeout = self.poll_timeout;
            let address = stat.address.clone();
            let endpoint = stat.endpoint.clone();
            let access_token = stat.access_token.clone();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                let started = Instant::now();
                standard::NODES_POLLED.inc();

                let outcome =
                    tokio::time::timeout(poll_timeout, client.workers_status(&endpoint, &access_token)).await;
                standard::POLL_DURATION.observe_since(started);

                match outcome {
                    Ok(Ok(response)) => Some((address, response.into_component_info())),
                    Ok(Err(e)) => {
                        standard::POLL_FAILURES.inc();
                        warn!(node = %address, error = %e, "Failed to get node worker status");
                        None
                    }
                    Err(_) => {
                        standard::POLL_FAILURES.inc();
                        warn!(node = %address, timeout_ms = poll_timeout.as_millis() as u64, "Node worker status timed out");
                        None
                    }
                }
            });
        }

        let mut reports = NodeReports::with_capacity(stats.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some((address, info))) => {
                    debug!(node = %address, workers = info.decentralized.len(), "Collected worker status");
                    reports.insert(address, info);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Status poll task aborted"),
            }
        }

        info!(polled = stats.len(), reported = reports.len(), "Worker status collection finished");
        reports
    }
}
