//! Engine configuration
//!
//! Defaults are usable as-is; `from_env` overrides individual fields.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Configuration for the enforcement engine
#[derive(Debug, Clone)]
pub struct EnforcerConfig {
    /// Per-node status request timeout
    pub poll_timeout: Duration,
    /// Upper bound on in-flight status requests
    pub max_concurrent_polls: usize,
    /// Invalid-request count that removes a node from routing
    pub demotion_threshold: u32,
    /// Page size used when listing stats
    pub stat_page_size: usize,
    /// Heartbeat age after which an online node goes offline
    pub liveness_timeout: Duration,
    /// Rows per liveness batch
    pub sweep_batch_size: usize,
    /// How often the run loop checks for a new epoch
    pub epoch_check_interval: Duration,
    /// How often the liveness sweep runs
    pub sweep_interval: Duration,
    /// Network name -> worker name applied to every reported worker on that network
    pub worker_renames: HashMap<String, String>,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(5),
            max_concurrent_polls: 256,
            demotion_threshold: crate::DEFAULT_DEMOTION_THRESHOLD,
            stat_page_size: 50,
            liveness_timeout: Duration::from_secs(crate::DEFAULT_LIVENESS_TIMEOUT_SECS),
            sweep_batch_size: crate::DEFAULT_SWEEP_BATCH_SIZE,
            epoch_check_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            worker_renames: HashMap::from([("farcaster".to_string(), "core".to_string())]),
        }
    }
}

impl EnforcerConfig {
    /// Defaults overridden by `ENFORCER_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("ENFORCER_POLL_TIMEOUT_MS") {
            config.poll_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse("ENFORCER_MAX_CONCURRENT_POLLS") {
            config.max_concurrent_polls = n;
        }
        if let Some(n) = env_parse("ENFORCER_DEMOTION_THRESHOLD") {
            config.demotion_threshold = n;
        }
        if let Some(n) = env_parse("ENFORCER_STAT_PAGE_SIZE") {
            config.stat_page_size = n;
        }
        if let Some(secs) = env_parse::<u64>("ENFORCER_LIVENESS_TIMEOUT_SECS") {
            config.liveness_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse("ENFORCER_SWEEP_BATCH_SIZE") {
            config.sweep_batch_size = n;
        }
        if let Some(secs) = env_parse::<u64>("ENFORCER_EPOCH_CHECK_INTERVAL_SECS") {
            config.epoch_check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("ENFORCER_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(secs);
        }

        config
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}
