use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `ENFORCER_LOG` first, then `RUST_LOG`, then `info`.
///
/// Field contract: `epoch` on every cycle event, `node` on every per-node event,
/// `key` on every cache event.
pub fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("ENFORCER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
