//! Persistent record types shared by storage and the engine

pub mod event;
pub mod indexer;
pub mod node;
pub mod snapshot;
pub mod stat;
pub mod worker;

pub use event::NodeEvent;
pub use indexer::Indexer;
pub use node::{Address, Node, NodeStatus};
pub use snapshot::NodeSnapshot;
pub use stat::{Stat, StatOrder, StatQuery};
pub use worker::WorkerAssignment;
