//! Per-node epoch statistics and the query used to list them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::Address;

/// Current-epoch classification of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub address: Address,
    pub endpoint: String,
    #[serde(default)]
    pub access_token: String,
    /// Epoch the counters below belong to
    pub epoch: u64,
    pub is_full_node: bool,
    pub is_rss_node: bool,
    /// Distinct networks among ready decentralized workers
    pub decentralized_network: u32,
    /// Number of decentralized worker entries
    pub indexer: u32,
    pub federated_network: u32,
    pub epoch_invalid_request: u32,
    /// Routing score, computed upstream
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

impl Stat {
    /// A fresh stat for a newly registered node
    pub fn new(address: Address, endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            address,
            endpoint: endpoint.into(),
            access_token: access_token.into(),
            epoch: 0,
            is_full_node: false,
            is_rss_node: false,
            decentralized_network: 0,
            indexer: 0,
            federated_network: 0,
            epoch_invalid_request: 0,
            score: 0.0,
            created_at: Utc::now(),
        }
    }
}

/// Sort order for stat listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatOrder {
    /// Oldest first
    #[default]
    CreatedAt,
    /// Highest score first
    ScoreDesc,
}

/// Filters for listing stats
#[derive(Debug, Clone, Default)]
pub struct StatQuery {
    pub address: Option<Address>,
    pub address_list: Vec<Address>,
    pub is_full_node: Option<bool>,
    pub is_rss_node: Option<bool>,
    /// Only rows whose invalid-request counter is strictly below this value
    pub valid_request: Option<u32>,
    /// Address of the last row of the previous page
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub order: StatOrder,
}

impl StatQuery {
    pub fn full_nodes() -> Self {
        Self {
            is_full_node: Some(true),
            ..Default::default()
        }
    }

    pub fn rss_nodes() -> Self {
        Self {
            is_rss_node: Some(true),
            ..Default::default()
        }
    }

    /// Whether a row passes every non-pagination filter
    pub fn matches(&self, stat: &Stat) -> bool {
        if let Some(address) = &self.address {
            if &stat.address != address {
                return false;
            }
        }
        if !self.address_list.is_empty() && !self.address_list.contains(&stat.address) {
            return false;
        }
        if let Some(full) = self.is_full_node {
            if stat.is_full_node != full {
                return false;
            }
        }
        if let Some(rss) = self.is_rss_node {
            if stat.is_rss_node != rss {
                return false;
            }
        }
        if let Some(limit) = self.valid_request {
            if stat.epoch_invalid_request >= limit {
                return false;
            }
        }
        true
    }
}
