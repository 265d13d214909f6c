//! Workers a node has declared it indexes

use serde::{Deserialize, Serialize};

use super::node::Address;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Indexer {
    pub address: Address,
    pub network: String,
    pub worker: String,
}

impl Indexer {
    pub fn key(&self) -> (&Address, &str, &str) {
        (&self.address, &self.network, &self.worker)
    }
}
