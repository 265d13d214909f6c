//! Transactional write of one epoch's worker assignments

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{EnforcerError, Result};
use crate::schema::WorkerAssignment;
use crate::storage::{NodeStore, StoreTransaction};

/// Replaces the active assignment set with the rows of one epoch
#[derive(Clone)]
pub struct WorkerAssignmentWriter {
    store: Arc<dyn NodeStore>,
}

impl WorkerAssignmentWriter {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    /// Deactivate every row of another epoch, then upsert `rows` as active.
    ///
    /// Both steps commit together or not at all.
    pub async fn persist(&self, epoch: u64, rows: &[WorkerAssignment]) -> Result<()> {
        let mut tx = self.store.begin().await?;

        match apply(tx.as_mut(), epoch, rows).await {
            Ok(deactivated) => {
                tx.commit().await.map_err(as_transaction_error)?;
                info!(epoch, deactivated, saved = rows.len(), "Worker assignments committed");
                Ok(())
            }
            Err(e) => {
                warn!(epoch, error = %e, "Worker assignment write failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(epoch, error = %rollback_err, "Rollback failed");
                }
                Err(as_transaction_error(e))
            }
        }
    }
}

async fn apply(tx: &mut dyn StoreTransaction, epoch: u64, rows: &[WorkerAssignment]) -> Result<u64> {
    let deactivated = tx.deactivate_node_workers(epoch).await?;
    debug!(epoch, deactivated, "Deactivated stale assignments");

    if !rows.is_empty() {
        tx.save_node_workers(rows).await?;
    }
    Ok(deactivated)
}

fn as_transaction_error(e: EnforcerError) -> EnforcerError {
    match e {
        EnforcerError::Transaction { .. } => e,
        other => EnforcerError::Transaction {
            message: other.to_string(),
        },
    }
}
