//! On-chain node event log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::Address;

/// One node event, keyed by its log position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub transaction_hash: String,
    pub transaction_index: u32,
    pub log_index: u32,
    pub block_number: u64,
    pub address: Address,
    pub event_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl NodeEvent {
    /// Pagination cursor pointing at this event
    pub fn cursor(&self) -> String {
        format!("{}:{}:{}", self.transaction_hash, self.transaction_index, self.log_index)
    }

    /// Sort key, newest first when reversed
    pub fn position(&self) -> (u64, u32, u32) {
        (self.block_number, self.transaction_index, self.log_index)
    }
}
