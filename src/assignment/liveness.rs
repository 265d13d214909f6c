//! Online -> Offline liveness sweep
//!
//! Stale nodes are moved in bounded batches so a large backlog never turns
//! into one long write.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{EnforcerError, Result};
use crate::metrics::standard;
use crate::storage::NodeStore;

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Batches that changed at least one row
    pub batches: u64,
    pub transitioned: u64,
}

pub struct LivenessSweeper {
    store: Arc<dyn NodeStore>,
    timeout: Duration,
    batch_size: usize,
}

impl LivenessSweeper {
    pub fn new(store: Arc<dyn NodeStore>, timeout: Duration, batch_size: usize) -> Self {
        Self {
            store,
            timeout,
            batch_size: batch_size.max(1),
        }
    }

    /// Heartbeats strictly older than this are stale
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let timeout = chrono::Duration::from_std(self.timeout).map_err(|e| EnforcerError::Internal {
            message: format!("liveness timeout out of range: {}", e),
        })?;
        Ok(now - timeout)
    }

    /// Move every stale online node offline, one batch at a time
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = self.cutoff(now)?;
        let mut report = SweepReport::default();

        loop {
            let changed = self
                .store
                .mark_stale_nodes_offline(cutoff, self.batch_size)
                .await?;
            if changed == 0 {
                break;
            }

            report.batches += 1;
            report.transitioned += changed;
            debug!(batch = report.batches, changed, "Liveness batch applied");
        }

        if report.transitioned > 0 {
            standard::NODES_SWEPT_OFFLINE.inc_by(report.transitioned);
            info!(
                transitioned = report.transitioned,
                batches = report.batches,
                %cutoff,
                "Stale nodes marked offline"
            );
        }
        Ok(report)
    }
}
