//! Fleet-wide capability topology
//!
//! Built each epoch from every reporting node's ready workers, published as an
//! immutable snapshot, and checkpointed to the cache.

pub mod aggregator;
pub mod recovery;
pub mod snapshot;

use std::collections::HashMap;

pub use aggregator::{aggregate, TopologyAccumulator};
pub use snapshot::{CapabilityMap, TopologyDimension, TopologySnapshot, TopologyState};

/// Worker name after the per-network rename
pub fn renamed_worker<'a>(renames: &'a HashMap<String, String>, network: &str, worker: &'a str) -> &'a str {
    renames.get(network).map(String::as_str).unwrap_or(worker)
}
