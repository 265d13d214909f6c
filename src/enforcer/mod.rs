//! Epoch enforcement
//!
//! Ties the stages together. One cycle per epoch:
//!
//! 1. list every stat and poll every node
//! 2. merge the reports into a topology snapshot
//! 3. classify every node against that snapshot
//! 4. stage the topology checkpoint under a new generation
//! 5. write the epoch's worker assignments in one transaction, save the
//!    stats, then make the staged checkpoint current
//! 6. publish the topology and converge the routing selection sets
//!
//! A cycle that fails before step 6 leaves the published topology, the
//! current checkpoint and the routing sets exactly as they were.

pub mod epoch;

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::assignment::{LivenessSweeper, SweepReport, WorkerAssignmentWriter};
use crate::cache::{get_json, Cache, CacheLookup};
use crate::collector::{NodeStatusClient, WorkerStatusCollector};
use crate::config::EnforcerConfig;
use crate::error::{EnforcerError, Result};
use crate::evaluator::{evaluate_all, EvaluationRules};
use crate::metrics::standard;
use crate::runtime::{ShutdownListener, ShutdownSignal};
use crate::schema::StatQuery;
use crate::selection::{SelectionSetSynchronizer, SelectionSummary, EPOCH_MARKER_KEY};
use crate::storage::{find_all_node_stats, NodeStore};
use crate::topology::{aggregate, recovery, TopologySnapshot, TopologyState};

pub use epoch::{EpochSource, EpochTracker};

/// What one cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub epoch: u64,
    pub polled: usize,
    pub reported: usize,
    pub assignments: usize,
    pub topology_version: u64,
    pub selection: SelectionSummary,
}

/// The epoch enforcement engine
pub struct Enforcer {
    store: Arc<dyn NodeStore>,
    cache: Arc<dyn Cache>,
    epochs: Arc<dyn EpochSource>,
    collector: WorkerStatusCollector,
    writer: WorkerAssignmentWriter,
    selection: SelectionSetSynchronizer,
    sweeper: LivenessSweeper,
    topology: TopologyState,
    renames: Arc<HashMap<String, String>>,
    last_epoch: Mutex<Option<u64>>,
    config: EnforcerConfig,
}

impl Enforcer {
    pub fn new(
        config: EnforcerConfig,
        store: Arc<dyn NodeStore>,
        cache: Arc<dyn Cache>,
        epochs: Arc<dyn EpochSource>,
        client: Arc<dyn NodeStatusClient>,
    ) -> Self {
        let collector = WorkerStatusCollector::new(client, config.poll_timeout, config.max_concurrent_polls);
        let writer = WorkerAssignmentWriter::new(store.clone());
        let selection = SelectionSetSynchronizer::new(
            store.clone(),
            cache.clone(),
            config.demotion_threshold,
            config.stat_page_size,
        );
        let sweeper = LivenessSweeper::new(store.clone(), config.liveness_timeout, config.sweep_batch_size);

        Self {
            store,
            cache,
            epochs,
            collector,
            writer,
            selection,
            sweeper,
            topology: TopologyState::new(),
            renames: Arc::new(config.worker_renames.clone()),
            last_epoch: Mutex::new(None),
            config,
        }
    }

    /// Currently published topology
    pub fn topology(&self) -> Arc<TopologySnapshot> {
        self.topology.load()
    }

    /// Epoch of the last completed cycle
    pub fn last_epoch(&self) -> Option<u64> {
        *self.last_epoch.lock()
    }

    pub fn config(&self) -> &EnforcerConfig {
        &self.config
    }

    /// Restore the topology from the cache, rebuilding it if any part is gone.
    ///
    /// A cache failure other than a miss is fatal.
    pub async fn init(&self) -> Result<()> {
        match recovery::load(self.cache.as_ref()).await {
            CacheLookup::Found(mut snapshot) => {
                match get_json::<u64>(self.cache.as_ref(), EPOCH_MARKER_KEY).await {
                    CacheLookup::Found(epoch) => {
                        snapshot.epoch = epoch;
                        *self.last_epoch.lock() = Some(epoch);
                    }
                    CacheLookup::Missing => {}
                    CacheLookup::Failed(e) => {
                        error!(error = %e, "Failed to read the epoch marker");
                        return Err(e);
                    }
                }
                self.topology.publish(snapshot);
                info!("Topology restored from cache");
                Ok(())
            }
            CacheLookup::Missing => {
                let epoch = self.epochs.current_epoch().await?;
                info!(epoch, "Rebuilding topology from the fleet");
                self.maintain_epoch_data(epoch).await.map(|_| ())
            }
            CacheLookup::Failed(e) => {
                error!(error = %e, "Failed to load topology from cache");
                Err(e)
            }
        }
    }

    /// Run one full enforcement cycle for `epoch`
    pub async fn maintain_epoch_data(&self, epoch: u64) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("epoch_cycle", epoch, cycle_id = %cycle_id);
        let started = Instant::now();

        let result = self.cycle(epoch).instrument(span).await;
        standard::CYCLE_DURATION.observe_since(started);

        match &result {
            Ok(report) => {
                standard::CYCLES_COMPLETED.inc();
                standard::CURRENT_EPOCH.set(epoch as i64);
                *self.last_epoch.lock() = Some(epoch);
                info!(
                    epoch,
                    %cycle_id,
                    polled = report.polled,
                    reported = report.reported,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Epoch cycle completed"
                );
            }
            Err(e) => {
                standard::CYCLES_FAILED.inc();
                error!(epoch, %cycle_id, error = %e, retryable = e.is_retryable(), "Epoch cycle failed");
            }
        }
        result
    }

    async fn cycle(&self, epoch: u64) -> Result<CycleReport> {
        let stats =
            find_all_node_stats(self.store.as_ref(), &StatQuery::default(), self.config.stat_page_size).await?;
        let polled = stats.len();

        let reports = Arc::new(self.collector.collect(&stats).await);
        let reported = reports.len();

        let snapshot = Arc::new(aggregate(reports.clone(), self.renames.clone(), epoch).await);

        let rules = Arc::new(EvaluationRules {
            epoch,
            demotion_threshold: self.config.demotion_threshold,
            worker_renames: (*self.renames).clone(),
        });
        let evaluation = evaluate_all(stats, reports, snapshot.clone(), rules).await;

        let checkpoint = recovery::stage(self.cache.as_ref(), &snapshot).await?;
        let stored = async {
            self.writer.persist(epoch, &evaluation.assignments).await?;
            self.store.save_node_stats(&evaluation.stats).await?;
            recovery::commit(self.cache.as_ref(), &checkpoint).await
        }
        .await;
        if let Err(e) = stored {
            recovery::discard(self.cache.as_ref(), &checkpoint).await;
            return Err(e);
        }

        let snapshot = Arc::try_unwrap(snapshot).unwrap_or_else(|shared| (*shared).clone());
        let published = self.topology.publish(snapshot);

        let selection = self.selection.sync_all(epoch).await?;

        Ok(CycleReport {
            epoch,
            polled,
            reported,
            assignments: evaluation.assignments.len(),
            topology_version: published.version,
            selection,
        })
    }

    /// One liveness sweep
    pub async fn maintain_node_status(&self) -> Result<SweepReport> {
        self.sweeper.sweep(Utc::now()).await
    }

    /// Run a cycle for the source's current epoch unless it was already done
    pub async fn check_epoch(&self, shutdown: &mut ShutdownListener) -> Result<Option<CycleReport>> {
        let epoch = self.epochs.current_epoch().await?;
        if self.last_epoch() == Some(epoch) {
            return Ok(None);
        }

        tokio::select! {
            result = self.maintain_epoch_data(epoch) => result.map(Some),
            _ = shutdown.wait() => {
                warn!(epoch, "Epoch cycle cancelled");
                Err(EnforcerError::Cancelled)
            }
        }
    }

    /// Drive cycles and liveness sweeps until `shutdown` fires
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<()> {
        let mut listener = shutdown.listener();

        let mut epoch_tick = tokio::time::interval(self.config.epoch_check_interval);
        epoch_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep_tick = tokio::time::interval(self.config.sweep_interval);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            epoch_check_secs = self.config.epoch_check_interval.as_secs(),
            sweep_secs = self.config.sweep_interval.as_secs(),
            "Enforcer running"
        );

        loop {
            tokio::select! {
                _ = listener.wait() => break,
                _ = epoch_tick.tick() => {
                    match self.check_epoch(&mut listener).await {
                        Ok(_) => {}
                        Err(EnforcerError::Cancelled) => break,
                        Err(e) => warn!(error = %e, "Epoch check failed, retrying next tick"),
                    }
                }
                _ = sweep_tick.tick() => {
                    if let Err(e) = self.maintain_node_status().await {
                        warn!(error = %e, "Liveness sweep failed");
                    }
                }
            }
        }

        info!("Enforcer stopped");
        Ok(())
    }
}
