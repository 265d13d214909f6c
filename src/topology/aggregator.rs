//! Concurrent topology merge
//!
//! One task per node report; every bucket update is an atomic
//! read-modify-write on a sharded map, so reports never wait on a
//! whole-map lock.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::renamed_worker;
use super::snapshot::{CapabilityMap, TopologySnapshot};
use crate::collector::{ComponentInfo, NodeReports};

type Buckets = DashMap<String, HashSet<String>>;

/// Mutable merge target for one aggregation
#[derive(Default)]
pub struct TopologyAccumulator {
    worker_to_networks: Buckets,
    network_to_workers: Buckets,
    platform_to_workers: Buckets,
    tag_to_workers: Buckets,
}

fn add(buckets: &Buckets, key: &str, member: &str) {
    buckets
        .entry(key.to_string())
        .or_default()
        .insert(member.to_string());
}

fn materialize(buckets: &Buckets) -> CapabilityMap {
    buckets
        .iter()
        .map(|entry| {
            let mut members: Vec<String> = entry.value().iter().cloned().collect();
            members.sort();
            (entry.key().clone(), members)
        })
        .collect()
}

impl TopologyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every ready decentralized worker of one report
    pub fn merge_report(&self, report: &ComponentInfo, renames: &HashMap<String, String>) {
        for info in report.decentralized.iter().filter(|w| w.status.is_ready()) {
            let network = info.network.as_str();
            let worker = renamed_worker(renames, network, &info.worker);

            add(&self.network_to_workers, network, worker);

            if let Some(platform) = info.known_platform() {
                add(&self.platform_to_workers, platform, worker);
            }

            for tag in &info.tags {
                add(&self.tag_to_workers, tag, worker);
            }

            add(&self.worker_to_networks, worker, network);
        }
    }

    /// Copy the sets into an immutable snapshot
    pub fn snapshot(&self, epoch: u64) -> TopologySnapshot {
        TopologySnapshot {
            version: 0,
            epoch,
            worker_to_networks: materialize(&self.worker_to_networks),
            network_to_workers: materialize(&self.network_to_workers),
            platform_to_workers: materialize(&self.platform_to_workers),
            tag_to_workers: materialize(&self.tag_to_workers),
        }
    }
}

/// Merge all reports in parallel and return the snapshot once every merge is done
pub async fn aggregate(
    reports: Arc<NodeReports>,
    renames: Arc<HashMap<String, String>>,
    epoch: u64,
) -> TopologySnapshot {
    let accumulator = Arc::new(TopologyAccumulator::new());
    let mut tasks = JoinSet::new();

    for address in reports.keys().cloned() {
        let reports = reports.clone();
        let renames = renames.clone();
        let accumulator = accumulator.clone();

        tasks.spawn(async move {
            if let Some(report) = reports.get(&address) {
                accumulator.merge_report(report, &renames);
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Topology merge task aborted");
        }
    }

    let snapshot = accumulator.snapshot(epoch);
    debug!(
        epoch,
        reports = reports.len(),
        workers = snapshot.worker_to_networks.len(),
        "Topology aggregated"
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{DecentralizedWorkerInfo, WorkerStatus};

    fn report(entries: &[(&str, &str, &str, WorkerStatus)]) -> ComponentInfo {
        ComponentInfo {
            decentralized: entries
                .iter()
                .map(|(network, worker, platform, status)| DecentralizedWorkerInfo {
                    network: network.to_string(),
                    worker: worker.to_string(),
                    platform: platform.to_string(),
                    tags: vec!["exchange".into()],
                    status: *status,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_only_ready_workers_register() {
        let acc = TopologyAccumulator::new();
        acc.merge_report(
            &report(&[
                ("ethereum", "uniswap", "Uniswap", WorkerStatus::Ready),
                ("polygon", "uniswap", "Uniswap", WorkerStatus::Indexing),
            ]),
            &HashMap::new(),
        );
        let snap = acc.snapshot(1);
        assert_eq!(snap.worker_to_networks["uniswap"], vec!["ethereum"]);
        assert!(!snap.network_to_workers.contains_key("polygon"));
    }

    #[test]
    fn test_unknown_platform_skipped() {
        let acc = TopologyAccumulator::new();
        acc.merge_report(
            &report(&[("ethereum", "core", "Unknown", WorkerStatus::Ready)]),
            &HashMap::new(),
        );
        let snap = acc.snapshot(1);
        assert!(snap.platform_to_workers.is_empty());
        assert_eq!(snap.tag_to_workers["exchange"], vec!["core"]);
    }

    #[test]
    fn test_rename_applies_to_every_dimension() {
        let renames = HashMap::from([("farcaster".to_string(), "core".to_string())]);
        let acc = TopologyAccumulator::new();
        acc.merge_report(
            &report(&[("farcaster", "momoka", "Farcaster", WorkerStatus::Ready)]),
            &renames,
        );
        let snap = acc.snapshot(1);
        assert_eq!(snap.worker_to_networks["core"], vec!["farcaster"]);
        assert_eq!(snap.platform_to_workers["Farcaster"], vec!["core"]);
    }
}
