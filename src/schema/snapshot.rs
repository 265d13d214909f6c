//! Daily fleet-size snapshots

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Number of registered nodes on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub date: NaiveDate,
    pub count: u64,
}
