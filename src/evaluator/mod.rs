//! Node qualification
//!
//! Classifies every node against the published topology: full node, RSS
//! node, capability counters and the invalid-request counter. Nodes that are
//! not full contribute their workers to the epoch's assignment rows.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::collector::status::RSSHUB_WORKER;
use crate::collector::{ComponentInfo, DecentralizedWorkerInfo, FederatedInfo, NodeReports, RssWorkerInfo};
use crate::schema::{Stat, WorkerAssignment};
use crate::topology::{renamed_worker, TopologySnapshot};

/// Inputs shared by every classification of one cycle
#[derive(Debug, Clone)]
pub struct EvaluationRules {
    pub epoch: u64,
    pub demotion_threshold: u32,
    pub worker_renames: HashMap<String, String>,
}

/// Output of one evaluation pass
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Updated stats, in input order
    pub stats: Vec<Stat>,
    /// Assignment rows of every non-full reporting node
    pub assignments: Vec<WorkerAssignment>,
}

impl Evaluation {
    pub fn full_nodes(&self) -> usize {
        self.stats.iter().filter(|s| s.is_full_node).count()
    }

    pub fn rss_nodes(&self) -> usize {
        self.stats.iter().filter(|s| s.is_rss_node).count()
    }
}

/// Exact-match full node check.
///
/// The node must run every worker the topology requires, on exactly the
/// networks the topology lists for it. Only ready workers count.
pub fn is_full_node(
    workers: &[DecentralizedWorkerInfo],
    topology: &TopologySnapshot,
    renames: &HashMap<String, String>,
) -> bool {
    let ready: Vec<&DecentralizedWorkerInfo> = workers.iter().filter(|w| w.status.is_ready()).collect();

    if ready.len() < topology.required_worker_count() {
        return false;
    }

    let mut node_map: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for info in &ready {
        let worker = renamed_worker(renames, &info.network, &info.worker);
        node_map.entry(worker).or_default().insert(info.network.as_str());
    }

    topology.worker_to_networks.iter().all(|(worker, required)| {
        node_map.get(worker.as_str()).is_some_and(|networks| {
            networks.len() == required.len() && required.iter().all(|n| networks.contains(n.as_str()))
        })
    })
}

pub fn is_rss_node(rss: Option<&RssWorkerInfo>) -> bool {
    rss.is_some_and(|w| w.worker == RSSHUB_WORKER && w.status.is_ready())
}

/// Always zero; federated networks are not counted yet
pub fn federated_network_count(_federated: &[FederatedInfo]) -> u32 {
    0
}

fn decentralized_network_count(workers: &[DecentralizedWorkerInfo]) -> u32 {
    workers
        .iter()
        .filter(|w| w.status.is_ready())
        .map(|w| w.network.as_str())
        .collect::<BTreeSet<_>>()
        .len() as u32
}

/// Classify one node in place and return the assignment rows it contributes
pub fn evaluate_stat(
    stat: &mut Stat,
    report: Option<&ComponentInfo>,
    topology: &TopologySnapshot,
    rules: &EvaluationRules,
) -> Vec<WorkerAssignment> {
    let Some(report) = report else {
        stat.epoch_invalid_request = rules.demotion_threshold;
        return Vec::new();
    };

    if stat.epoch != rules.epoch {
        stat.epoch = rules.epoch;
        stat.epoch_invalid_request = 0;
    }

    stat.decentralized_network = decentralized_network_count(&report.decentralized);
    stat.indexer = report.decentralized.len() as u32;
    stat.federated_network = federated_network_count(&report.federated);
    stat.is_rss_node = is_rss_node(report.rss.as_ref());
    stat.is_full_node = is_full_node(&report.decentralized, topology, &rules.worker_renames);

    if stat.is_full_node {
        return Vec::new();
    }

    report
        .decentralized
        .iter()
        .map(|w| WorkerAssignment {
            epoch: rules.epoch,
            address: stat.address.clone(),
            network: w.network.clone(),
            worker: w.worker.clone(),
            is_active: true,
        })
        .collect()
}

/// Classify every stat concurrently against one topology snapshot
pub async fn evaluate_all(
    stats: Vec<Stat>,
    reports: Arc<NodeReports>,
    topology: Arc<TopologySnapshot>,
    rules: Arc<EvaluationRules>,
) -> Evaluation {
    let assignments = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = JoinSet::new();
    let total = stats.len();

    for (index, mut stat) in stats.into_iter().enumerate() {
        let reports = reports.clone();
        let topology = topology.clone();
        let rules = rules.clone();
        let assignments = assignments.clone();

        tasks.spawn(async move {
            let report = reports.get(&stat.address);
            let rows = evaluate_stat(&mut stat, report, &topology, &rules);
            if !rows.is_empty() {
                assignments.lock().extend(rows);
            }
            (index, stat)
        });
    }

    let mut slots: Vec<Option<Stat>> = vec![None; total];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, stat)) => {
                debug!(
                    node = %stat.address,
                    full = stat.is_full_node,
                    rss = stat.is_rss_node,
                    invalid_requests = stat.epoch_invalid_request,
                    "Node classified"
                );
                slots[index] = Some(stat);
            }
            Err(e) => warn!(error = %e, "Classification task aborted"),
        }
    }

    let assignments = std::mem::take(&mut *assignments.lock());
    let evaluation = Evaluation {
        stats: slots.into_iter().flatten().collect(),
        assignments,
    };

    info!(
        epoch = rules.epoch,
        nodes = evaluation.stats.len(),
        full = evaluation.full_nodes(),
        rss = evaluation.rss_nodes(),
        assignments = evaluation.assignments.len(),
        "Node classification finished"
    );
    evaluation
}
