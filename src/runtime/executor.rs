//! Tokio runtime the enforcer binary runs on

use tokio::runtime::{Builder, Runtime};

use crate::error::{EnforcerError, Result};

/// Configuration for the enforcer runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Worker threads; status polling is I/O bound so this leans high
    pub worker_threads: usize,
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().max(4),
            thread_name: "enforcer-worker".to_string(),
        }
    }
}

pub struct EnforcerRuntime {
    runtime: Runtime,
    config: RuntimeConfig,
}

impl EnforcerRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| EnforcerError::Internal {
                message: format!("Failed to create runtime: {}", e),
            })?;

        Ok(Self { runtime, config })
    }

    pub fn worker_threads(&self) -> usize {
        self.config.worker_threads
    }

    /// Run a future to completion on this runtime
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Give in-flight tasks a bounded grace period
    pub fn shutdown(self, grace: std::time::Duration) {
        self.runtime.shutdown_timeout(grace);
    }
}
