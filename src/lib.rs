//! Enforcer Core - epoch enforcement for a fleet of indexing nodes
//!
//! Once per epoch this crate:
//! - polls every node's self-reported worker status
//! - builds the fleet-wide capability topology
//! - classifies nodes as full / RSS / unreachable
//! - persists worker assignments and routing selection sets
//!
//! Between epochs it moves nodes with stale heartbeats offline.

pub mod assignment;
pub mod cache;
pub mod collector;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod metrics;
pub mod runtime;
pub mod schema;
pub mod selection;
pub mod storage;
pub mod topology;

pub use config::EnforcerConfig;
pub use enforcer::{CycleReport, Enforcer, EpochSource, EpochTracker};
pub use error::{EnforcerError, Result};
pub use runtime::{EnforcerRuntime, ShutdownSignal};

/// Invalid requests after which a node is dropped from routing
pub const DEFAULT_DEMOTION_THRESHOLD: u32 = 3;

/// Default liveness timeout in seconds
pub const DEFAULT_LIVENESS_TIMEOUT_SECS: u64 = 600;

/// Rows moved offline per liveness batch
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 1000;
