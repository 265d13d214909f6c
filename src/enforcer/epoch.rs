//! Epoch source
//!
//! The engine only needs to know which epoch is current. `EpochTracker` is
//! the local source used standalone and in tests.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::Result;

#[async_trait]
pub trait EpochSource: Send + Sync {
    async fn current_epoch(&self) -> Result<u64>;
}

/// Locally advanced epoch counter
pub struct EpochTracker {
    current_epoch: RwLock<u64>,
}

impl EpochTracker {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(epoch: u64) -> Self {
        Self {
            current_epoch: RwLock::new(epoch),
        }
    }

    /// Initialize from restored state
    pub async fn restore(&self, epoch: u64) {
        *self.current_epoch.write().await = epoch;
        info!(epoch, "Epoch tracker restored");
    }

    pub async fn epoch(&self) -> u64 {
        *self.current_epoch.read().await
    }

    /// Advance to next epoch
    pub async fn advance_epoch(&self) -> u64 {
        let mut epoch = self.current_epoch.write().await;
        *epoch += 1;
        info!(epoch = *epoch, "Advanced epoch");
        *epoch
    }
}

impl Default for EpochTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EpochSource for EpochTracker {
    async fn current_epoch(&self) -> Result<u64> {
        Ok(self.epoch().await)
    }
}
