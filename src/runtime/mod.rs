//! Async runtime and shutdown signalling

pub mod executor;
pub mod shutdown;

pub use executor::{EnforcerRuntime, RuntimeConfig};
pub use shutdown::{ShutdownListener, ShutdownSignal};
