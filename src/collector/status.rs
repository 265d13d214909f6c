//! `/workers_status` document and the normalisation applied to it

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Network whose workers do not report a platform
pub const FARCASTER_NETWORK: &str = "farcaster";
pub const FARCASTER_PLATFORM: &str = "Farcaster";
pub const SOCIAL_TAG: &str = "social";
/// Platform value that is never registered in the topology
pub const UNKNOWN_PLATFORM: &str = "Unknown";
/// The feed-hub RSS worker implementation
pub const RSSHUB_WORKER: &str = "rsshub";

/// Worker state as reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkerStatus {
    #[default]
    Unknown,
    Unhealthy,
    Indexing,
    Ready,
}

impl WorkerStatus {
    pub fn is_ready(&self) -> bool {
        *self == WorkerStatus::Ready
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Unknown => "unknown",
            WorkerStatus::Unhealthy => "unhealthy",
            WorkerStatus::Indexing => "indexing",
            WorkerStatus::Ready => "ready",
        }
    }
}

impl From<String> for WorkerStatus {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "ready" => WorkerStatus::Ready,
            "indexing" => WorkerStatus::Indexing,
            "unhealthy" => WorkerStatus::Unhealthy,
            _ => WorkerStatus::Unknown,
        }
    }
}

impl From<WorkerStatus> for String {
    fn from(status: WorkerStatus) -> Self {
        status.as_str().into()
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decentralized worker running against one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecentralizedWorkerInfo {
    pub network: String,
    pub worker: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: WorkerStatus,
}

impl DecentralizedWorkerInfo {
    /// Platform that should be registered in the topology, if any
    pub fn known_platform(&self) -> Option<&str> {
        let platform = self.platform.trim();
        if platform.is_empty() || platform.eq_ignore_ascii_case(UNKNOWN_PLATFORM) {
            None
        } else {
            Some(platform)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RssWorkerInfo {
    #[serde(default)]
    pub network: String,
    pub worker: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: WorkerStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedInfo {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: WorkerStatus,
}

/// Everything a node reports about its workers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    #[serde(default)]
    pub decentralized: Vec<DecentralizedWorkerInfo>,
    #[serde(default)]
    pub rss: Option<RssWorkerInfo>,
    #[serde(default)]
    pub federated: Vec<FederatedInfo>,
}

/// Response envelope of `GET /workers_status`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerResponse {
    #[serde(default)]
    pub data: Option<ComponentInfo>,
}

impl WorkerResponse {
    /// Normalised, de-duplicated report
    pub fn into_component_info(self) -> ComponentInfo {
        let mut info = self.data.unwrap_or_default();
        normalize_platforms(&mut info.decentralized);
        info.decentralized = dedup_workers(info.decentralized);
        info
    }
}

/// Farcaster does not self-report a platform; force it
pub fn normalize_platforms(workers: &mut [DecentralizedWorkerInfo]) {
    for w in workers.iter_mut().filter(|w| w.network == FARCASTER_NETWORK) {
        w.platform = FARCASTER_PLATFORM.into();
        w.tags = vec![SOCIAL_TAG.into()];
    }
}

/// Keep one entry per (network, worker), letting a non-ready entry win
pub fn dedup_workers(workers: Vec<DecentralizedWorkerInfo>) -> Vec<DecentralizedWorkerInfo> {
    let mut index: HashMap<(String, String), usize> = HashMap::with_capacity(workers.len());
    let mut kept: Vec<DecentralizedWorkerInfo> = Vec::with_capacity(workers.len());

    for w in workers {
        let key = (w.network.clone(), w.worker.clone());
        match index.get(&key) {
            Some(&slot) => {
                if !w.status.is_ready() {
                    kept[slot] = w;
                }
            }
            None => {
                index.insert(key, kept.len());
                kept.push(w);
            }
        }
    }

    kept
}
