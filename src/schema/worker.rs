//! Per-epoch worker assignment rows

use serde::{Deserialize, Serialize};

use super::node::Address;

/// A non-full node running one worker against one network in one epoch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub epoch: u64,
    pub address: Address,
    pub network: String,
    pub worker: String,
    pub is_active: bool,
}

impl WorkerAssignment {
    /// Upsert identity of the row
    pub fn key(&self) -> (u64, &Address, &str, &str) {
        (self.epoch, &self.address, &self.network, &self.worker)
    }
}
