//! Relational storage collaborator
//!
//! The engine only talks to storage through [`NodeStore`]. [`MemoryStore`]
//! is the in-process implementation used standalone and in tests.

pub mod cursor;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::schema::{
    Address, Indexer, Node, NodeEvent, NodeSnapshot, NodeStatus, Stat, StatQuery, WorkerAssignment,
};

pub use cursor::EventCursor;
pub use memory::{FailPoint, MemoryStore};

/// Most snapshots returned by [`NodeStore::find_node_snapshots`]
pub const NODE_SNAPSHOT_LIMIT: usize = 100;

/// Node, stat, event, snapshot, indexer and worker-assignment persistence
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn find_node(&self, address: &Address) -> Result<Node>;

    /// Newest first; `cursor` is the address of the last node of the previous page
    async fn find_nodes(
        &self,
        addresses: &[Address],
        status: Option<NodeStatus>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Node>>;

    async fn save_node(&self, node: &Node) -> Result<()>;

    async fn update_node_hide_tax_rate(&self, address: &Address, hide_tax_rate: bool) -> Result<()>;

    /// Move at most `limit` online nodes with a heartbeat before `cutoff` to offline.
    /// Returns the number of rows changed.
    async fn mark_stale_nodes_offline(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<u64>;

    async fn find_node_stat(&self, address: &Address) -> Result<Option<Stat>>;

    async fn find_node_stats(&self, query: &StatQuery) -> Result<Vec<Stat>>;

    /// Upsert by address
    async fn save_node_stats(&self, stats: &[Stat]) -> Result<()>;

    async fn find_node_workers(
        &self,
        epoch: Option<u64>,
        address: Option<&Address>,
        is_active: Option<bool>,
    ) -> Result<Vec<WorkerAssignment>>;

    /// Record the current node count for `date`, replacing any earlier count that day
    async fn save_node_snapshot(&self, date: NaiveDate) -> Result<NodeSnapshot>;

    /// Newest first, at most [`NODE_SNAPSHOT_LIMIT`]
    async fn find_node_snapshots(&self) -> Result<Vec<NodeSnapshot>>;

    /// Upsert by (address, network, worker)
    async fn save_node_indexers(&self, indexers: &[Indexer]) -> Result<()>;

    /// Empty filters match everything
    async fn find_node_indexers(
        &self,
        addresses: &[Address],
        networks: &[String],
        workers: &[String],
    ) -> Result<Vec<Indexer>>;

    /// Remove every indexer of one node; returns the number removed
    async fn delete_node_indexers(&self, address: &Address) -> Result<u64>;

    async fn save_node_event(&self, event: &NodeEvent) -> Result<()>;

    /// Newest first; `cursor` is `"{hash}:{tx_index}:{log_index}"`
    async fn find_node_events(
        &self,
        address: &Address,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<NodeEvent>>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// Multi-statement unit of work. Dropping without commit discards it.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Mark every assignment row of an epoch other than `current_epoch` inactive
    async fn deactivate_node_workers(&mut self, current_epoch: u64) -> Result<u64>;

    /// Upsert rows by (epoch, address, network, worker)
    async fn save_node_workers(&mut self, workers: &[WorkerAssignment]) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Walk every page of a stat query
pub async fn find_all_node_stats(
    store: &dyn NodeStore,
    base: &StatQuery,
    page_size: usize,
) -> Result<Vec<Stat>> {
    let page_size = page_size.max(1);
    let mut query = base.clone();
    query.limit = Some(page_size);
    query.cursor = None;

    let mut stats = Vec::new();
    loop {
        let page = store.find_node_stats(&query).await?;
        let fetched = page.len();

        query.cursor = page.last().map(|stat| stat.address.to_string());
        stats.extend(page);

        if fetched < page_size {
            return Ok(stats);
        }
    }
}
