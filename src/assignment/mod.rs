//! Worker assignment persistence and liveness maintenance

pub mod liveness;
pub mod writer;

pub use liveness::{LivenessSweeper, SweepReport};
pub use writer::WorkerAssignmentWriter;
