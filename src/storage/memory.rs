//! In-process storage backend
//!
//! Tables live behind a `parking_lot::RwLock`; no lock is held across an
//! await point. Transactions stage a private copy of the worker table and
//! swap it in on commit.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use super::cursor::EventCursor;
use super::{NodeStore, StoreTransaction, NODE_SNAPSHOT_LIMIT};
use crate::error::{EnforcerError, Result};
use crate::schema::{
    Address, Indexer, Node, NodeEvent, NodeSnapshot, NodeStatus, Stat, StatOrder, StatQuery,
    WorkerAssignment,
};

type WorkerKey = (u64, Address, String, String);
type WorkerTable = HashMap<WorkerKey, WorkerAssignment>;
type EventKey = (String, u32, u32);
type IndexerKey = (Address, String, String);

/// Operations that can be made to fail once, for exercising error paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    DeactivateNodeWorkers,
    SaveNodeWorkers,
    Commit,
    SaveNodeStats,
    FindNodeStats,
}

#[derive(Default)]
struct Tables {
    nodes: HashMap<Address, Node>,
    stats: HashMap<Address, Stat>,
    workers: WorkerTable,
    events: HashMap<EventKey, NodeEvent>,
    snapshots: BTreeMap<NaiveDate, NodeSnapshot>,
    indexers: HashMap<IndexerKey, Indexer>,
}

#[derive(Default)]
struct Inner {
    tables: RwLock<Tables>,
    fail_points: Mutex<Vec<FailPoint>>,
}

impl Inner {
    fn check(&self, point: FailPoint) -> Result<()> {
        let mut points = self.fail_points.lock();
        if let Some(idx) = points.iter().position(|p| *p == point) {
            points.remove(idx);
            return Err(EnforcerError::Storage {
                message: format!("injected failure at {:?}", point),
            });
        }
        Ok(())
    }
}

/// Shared in-memory store; clones see the same tables
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed nodes and stats
    pub fn with_fleet(nodes: Vec<Node>, stats: Vec<Stat>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.inner.tables.write();
            for node in nodes {
                tables.nodes.insert(node.address.clone(), node);
            }
            for stat in stats {
                tables.stats.insert(stat.address.clone(), stat);
            }
        }
        store
    }

    /// Make the next call at `point` fail
    pub fn inject_failure(&self, point: FailPoint) {
        self.inner.fail_points.lock().push(point);
    }

    pub fn worker_count(&self) -> usize {
        self.inner.tables.read().workers.len()
    }
}

fn compare_stats(order: StatOrder, a: &Stat, b: &Stat) -> Ordering {
    match order {
        StatOrder::CreatedAt => a
            .created_at
            .cmp(&b.created_at)
            .then_with(|| a.address.cmp(&b.address)),
        StatOrder::ScoreDesc => b
            .score
            .total_cmp(&a.score)
            .then_with(|| a.address.cmp(&b.address)),
    }
}

fn compare_nodes_newest_first(a: &Node, b: &Node) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.address.cmp(&b.address))
}

fn upsert_workers(table: &mut WorkerTable, workers: &[WorkerAssignment]) {
    for worker in workers {
        let key = (
            worker.epoch,
            worker.address.clone(),
            worker.network.clone(),
            worker.worker.clone(),
        );
        table.insert(key, worker.clone());
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn find_node(&self, address: &Address) -> Result<Node> {
        self.inner
            .tables
            .read()
            .nodes
            .get(address)
            .cloned()
            .ok_or_else(|| EnforcerError::NodeNotFound {
                address: address.to_string(),
            })
    }

    async fn find_nodes(
        &self,
        addresses: &[Address],
        status: Option<NodeStatus>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Node>> {
        let tables = self.inner.tables.read();

        let cursor_node = match cursor {
            Some(cursor) => {
                let address = Address::parse(cursor)
                    .map_err(|_| EnforcerError::InvalidCursor { cursor: cursor.into() })?;
                let node = tables
                    .nodes
                    .get(&address)
                    .ok_or_else(|| EnforcerError::InvalidCursor { cursor: cursor.into() })?;
                Some(node.clone())
            }
            None => None,
        };

        let mut nodes: Vec<Node> = tables
            .nodes
            .values()
            .filter(|n| status.map_or(true, |s| n.status == s))
            .filter(|n| addresses.is_empty() || addresses.contains(&n.address))
            .filter(|n| {
                cursor_node
                    .as_ref()
                    .map_or(true, |c| compare_nodes_newest_first(n, c) == Ordering::Greater)
            })
            .cloned()
            .collect();

        nodes.sort_by(compare_nodes_newest_first);
        nodes.truncate(limit);
        Ok(nodes)
    }

    async fn save_node(&self, node: &Node) -> Result<()> {
        self.inner
            .tables
            .write()
            .nodes
            .insert(node.address.clone(), node.clone());
        Ok(())
    }

    async fn update_node_hide_tax_rate(&self, address: &Address, hide_tax_rate: bool) -> Result<()> {
        let mut tables = self.inner.tables.write();
        let node = tables
            .nodes
            .get_mut(address)
            .ok_or_else(|| EnforcerError::NodeNotFound {
                address: address.to_string(),
            })?;
        node.hide_tax_rate = hide_tax_rate;
        Ok(())
    }

    async fn mark_stale_nodes_offline(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<u64> {
        let mut tables = self.inner.tables.write();

        let mut stale: Vec<Address> = tables
            .nodes
            .values()
            .filter(|n| n.status == NodeStatus::Online && n.last_heartbeat < cutoff)
            .map(|n| n.address.clone())
            .collect();
        stale.sort();
        stale.truncate(limit);

        for address in &stale {
            if let Some(node) = tables.nodes.get_mut(address) {
                node.status = NodeStatus::Offline;
            }
        }

        debug!(count = stale.len(), "Marked stale nodes offline");
        Ok(stale.len() as u64)
    }

    async fn find_node_stat(&self, address: &Address) -> Result<Option<Stat>> {
        Ok(self.inner.tables.read().stats.get(address).cloned())
    }

    async fn find_node_stats(&self, query: &StatQuery) -> Result<Vec<Stat>> {
        self.inner.check(FailPoint::FindNodeStats)?;
        let tables = self.inner.tables.read();

        let cursor_stat = match &query.cursor {
            Some(cursor) => {
                let address = Address::parse(cursor)
                    .map_err(|_| EnforcerError::InvalidCursor { cursor: cursor.clone() })?;
                let stat = tables
                    .stats
                    .get(&address)
                    .ok_or_else(|| EnforcerError::InvalidCursor { cursor: cursor.clone() })?;
                Some(stat.clone())
            }
            None => None,
        };

        let mut stats: Vec<Stat> = tables
            .stats
            .values()
            .filter(|s| query.matches(s))
            .filter(|s| {
                cursor_stat
                    .as_ref()
                    .map_or(true, |c| compare_stats(query.order, s, c) == Ordering::Greater)
            })
            .cloned()
            .collect();

        stats.sort_by(|a, b| compare_stats(query.order, a, b));
        if let Some(limit) = query.limit {
            stats.truncate(limit);
        }
        Ok(stats)
    }

    async fn save_node_stats(&self, stats: &[Stat]) -> Result<()> {
        self.inner.check(FailPoint::SaveNodeStats)?;
        let mut tables = self.inner.tables.write();
        for stat in stats {
            tables.stats.insert(stat.address.clone(), stat.clone());
        }
        Ok(())
    }

    async fn find_node_workers(
        &self,
        epoch: Option<u64>,
        address: Option<&Address>,
        is_active: Option<bool>,
    ) -> Result<Vec<WorkerAssignment>> {
        let tables = self.inner.tables.read();
        let mut workers: Vec<WorkerAssignment> = tables
            .workers
            .values()
            .filter(|w| epoch.map_or(true, |e| w.epoch == e))
            .filter(|w| address.map_or(true, |a| &w.address == a))
            .filter(|w| is_active.map_or(true, |active| w.is_active == active))
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(workers)
    }

    async fn save_node_snapshot(&self, date: NaiveDate) -> Result<NodeSnapshot> {
        let mut tables = self.inner.tables.write();
        let snapshot = NodeSnapshot {
            date,
            count: tables.nodes.len() as u64,
        };
        tables.snapshots.insert(date, snapshot.clone());
        Ok(snapshot)
    }

    async fn find_node_snapshots(&self) -> Result<Vec<NodeSnapshot>> {
        Ok(self
            .inner
            .tables
            .read()
            .snapshots
            .values()
            .rev()
            .take(NODE_SNAPSHOT_LIMIT)
            .cloned()
            .collect())
    }

    async fn save_node_indexers(&self, indexers: &[Indexer]) -> Result<()> {
        let mut tables = self.inner.tables.write();
        for indexer in indexers {
            let key = (
                indexer.address.clone(),
                indexer.network.clone(),
                indexer.worker.clone(),
            );
            tables.indexers.insert(key, indexer.clone());
        }
        Ok(())
    }

    async fn find_node_indexers(
        &self,
        addresses: &[Address],
        networks: &[String],
        workers: &[String],
    ) -> Result<Vec<Indexer>> {
        let tables = self.inner.tables.read();
        let mut indexers: Vec<Indexer> = tables
            .indexers
            .values()
            .filter(|i| addresses.is_empty() || addresses.contains(&i.address))
            .filter(|i| networks.is_empty() || networks.contains(&i.network))
            .filter(|i| workers.is_empty() || workers.contains(&i.worker))
            .cloned()
            .collect();
        indexers.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(indexers)
    }

    async fn delete_node_indexers(&self, address: &Address) -> Result<u64> {
        let mut tables = self.inner.tables.write();
        let before = tables.indexers.len();
        tables.indexers.retain(|(owner, _, _), _| owner != address);
        Ok((before - tables.indexers.len()) as u64)
    }

    async fn save_node_event(&self, event: &NodeEvent) -> Result<()> {
        let key = (
            event.transaction_hash.clone(),
            event.transaction_index,
            event.log_index,
        );
        self.inner.tables.write().events.insert(key, event.clone());
        Ok(())
    }

    async fn find_node_events(
        &self,
        address: &Address,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<NodeEvent>> {
        let cursor = cursor.map(EventCursor::parse).transpose()?;
        let tables = self.inner.tables.read();

        let before = match &cursor {
            Some(c) => {
                let key = (c.transaction_hash.clone(), c.transaction_index, c.log_index);
                let event = tables.events.get(&key).ok_or_else(|| EnforcerError::InvalidCursor {
                    cursor: format!("{}:{}:{}", c.transaction_hash, c.transaction_index, c.log_index),
                })?;
                Some(event.position())
            }
            None => None,
        };

        let mut events: Vec<NodeEvent> = tables
            .events
            .values()
            .filter(|e| &e.address == address)
            .filter(|e| before.map_or(true, |p| e.position() < p))
            .cloned()
            .collect();

        events.sort_by(|a, b| b.position().cmp(&a.position()));
        events.truncate(limit);
        Ok(events)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let staged = self.inner.tables.read().workers.clone();
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            staged,
        }))
    }
}

/// Staged worker-table changes
struct MemoryTransaction {
    inner: Arc<Inner>,
    staged: WorkerTable,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn deactivate_node_workers(&mut self, current_epoch: u64) -> Result<u64> {
        self.inner.check(FailPoint::DeactivateNodeWorkers)?;

        let mut changed = 0;
        for worker in self.staged.values_mut() {
            if worker.epoch != current_epoch && worker.is_active {
                worker.is_active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn save_node_workers(&mut self, workers: &[WorkerAssignment]) -> Result<()> {
        self.inner.check(FailPoint::SaveNodeWorkers)?;
        upsert_workers(&mut self.staged, workers);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.check(FailPoint::Commit)?;
        let MemoryTransaction { inner, staged } = *self;
        inner.tables.write().workers = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
