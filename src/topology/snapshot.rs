//! Published capability topology
//!
//! A snapshot is never mutated after publication. Readers hold an
//! `Arc<TopologySnapshot>`; writers build a new one and swap it in.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Key -> sorted member list
pub type CapabilityMap = BTreeMap<String, Vec<String>>;

/// The four fleet-wide capability dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyDimension {
    WorkerToNetworks,
    NetworkToWorkers,
    PlatformToWorkers,
    TagToWorkers,
}

impl TopologyDimension {
    pub const ALL: [TopologyDimension; 4] = [
        TopologyDimension::WorkerToNetworks,
        TopologyDimension::NetworkToWorkers,
        TopologyDimension::PlatformToWorkers,
        TopologyDimension::TagToWorkers,
    ];

    /// Base cache key of this dimension; checkpoints append a generation
    pub fn cache_key(&self) -> &'static str {
        match self {
            TopologyDimension::WorkerToNetworks => "topology:worker_to_networks",
            TopologyDimension::NetworkToWorkers => "topology:network_to_workers",
            TopologyDimension::PlatformToWorkers => "topology:platform_to_workers",
            TopologyDimension::TagToWorkers => "topology:tag_to_workers",
        }
    }
}

/// Fully merged topology of one epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    /// Assigned on publish; 0 means never published
    pub version: u64,
    pub epoch: u64,
    /// Worker -> networks a full node must run it on
    pub worker_to_networks: CapabilityMap,
    pub network_to_workers: CapabilityMap,
    pub platform_to_workers: CapabilityMap,
    pub tag_to_workers: CapabilityMap,
}

impl TopologySnapshot {
    pub fn dimension(&self, dimension: TopologyDimension) -> &CapabilityMap {
        match dimension {
            TopologyDimension::WorkerToNetworks => &self.worker_to_networks,
            TopologyDimension::NetworkToWorkers => &self.network_to_workers,
            TopologyDimension::PlatformToWorkers => &self.platform_to_workers,
            TopologyDimension::TagToWorkers => &self.tag_to_workers,
        }
    }

    pub fn dimension_mut(&mut self, dimension: TopologyDimension) -> &mut CapabilityMap {
        match dimension {
            TopologyDimension::WorkerToNetworks => &mut self.worker_to_networks,
            TopologyDimension::NetworkToWorkers => &mut self.network_to_workers,
            TopologyDimension::PlatformToWorkers => &mut self.platform_to_workers,
            TopologyDimension::TagToWorkers => &mut self.tag_to_workers,
        }
    }

    /// Number of workers a full node must run
    pub fn required_worker_count(&self) -> usize {
        self.worker_to_networks.len()
    }

    pub fn is_empty(&self) -> bool {
        TopologyDimension::ALL
            .iter()
            .all(|d| self.dimension(*d).is_empty())
    }
}

/// Process-wide holder of the current snapshot
pub struct TopologyState {
    current: ArcSwap<TopologySnapshot>,
    last_version: AtomicU64,
}

impl TopologyState {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(TopologySnapshot::default()),
            last_version: AtomicU64::new(0),
        }
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<TopologySnapshot> {
        self.current.load_full()
    }

    /// Stamp a version on `snapshot` and make it current
    pub fn publish(&self, mut snapshot: TopologySnapshot) -> Arc<TopologySnapshot> {
        snapshot.version = self.last_version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(snapshot);
        self.current.store(snapshot.clone());

        info!(
            version = snapshot.version,
            epoch = snapshot.epoch,
            workers = snapshot.worker_to_networks.len(),
            networks = snapshot.network_to_workers.len(),
            "Published topology"
        );
        crate::metrics::standard::TOPOLOGY_VERSION.set(snapshot.version as i64);
        snapshot
    }
}

impl Default for TopologyState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_bumps_version() {
        let state = TopologyState::new();
        assert_eq!(state.load().version, 0);

        let first = state.publish(TopologySnapshot::default());
        let second = state.publish(TopologySnapshot::default());
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(state.load().version, 2);
    }

    #[test]
    fn test_reader_keeps_old_version() {
        let holder = TopologyState::new();
        let old = holder.publish(TopologySnapshot {
            epoch: 3,
            ..Default::default()
        });
        holder.publish(TopologySnapshot {
            epoch: 4,
            ..Default::default()
        });
        assert_eq!(old.epoch, 3);
        assert_eq!(holder.load().epoch, 4);
    }
}
