//! Prometheus metrics for monitoring
//!
//! Provides counters, gauges, and histograms for observability.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: String,
    help: String,
}

impl Counter {
    /// Create a new counter
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by delta
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: String,
    help: String,
}

impl Gauge {
    /// Create a new gauge
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Set value
    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Histogram for latency measurements
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum: AtomicU64,
    count: AtomicU64,
    name: String,
    help: String,
}

impl Histogram {
    /// Create with default buckets (seconds)
    pub fn new(name: &str, help: &str) -> Self {
        Self::with_buckets(
            name,
            help,
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
        )
    }

    /// Create with custom buckets
    pub fn with_buckets(name: &str, help: &str, bounds: Vec<f64>) -> Self {
        let buckets = bounds
            .into_iter()
            .map(|b| (b, AtomicU64::new(0)))
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Observe a value
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);

        // Sum kept as u64 micros
        let micros = (value * 1_000_000.0) as u64;
        self.sum.fetch_add(micros, Ordering::Relaxed);

        for (bound, count) in &self.buckets {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record the time elapsed since `start`
    pub fn observe_since(&self, start: Instant) {
        self.observe(start.elapsed().as_secs_f64());
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );

        for (bound, count) in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name, bound, count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            self.name,
            self.count.load(Ordering::Relaxed)
        ));

        let sum_secs = self.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!("{}_sum {}\n", self.name, sum_secs));
        output.push_str(&format!(
            "{}_count {}\n",
            self.name,
            self.count.load(Ordering::Relaxed)
        ));

        output
    }
}

/// Standard enforcer metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static NODES_POLLED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("enforcer_nodes_polled_total", "Node status requests issued")
    });

    pub static POLL_FAILURES: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("enforcer_poll_failures_total", "Node status requests that failed")
    });

    pub static CYCLES_COMPLETED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("enforcer_cycles_completed_total", "Enforcement cycles completed")
    });

    pub static CYCLES_FAILED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("enforcer_cycles_failed_total", "Enforcement cycles that failed")
    });

    pub static NODES_SWEPT_OFFLINE: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("enforcer_nodes_swept_offline_total", "Nodes moved offline by the liveness sweep")
    });

    pub static FULL_NODES: LazyLock<Gauge> = LazyLock::new(|| {
        Gauge::new("enforcer_full_nodes", "Full nodes in the routing set after the last sync")
    });

    pub static RSS_NODES: LazyLock<Gauge> = LazyLock::new(|| {
        Gauge::new("enforcer_rss_nodes", "RSS nodes in the routing set after the last sync")
    });

    pub static CURRENT_EPOCH: LazyLock<Gauge> = LazyLock::new(|| {
        Gauge::new("enforcer_current_epoch", "Last fully processed epoch")
    });

    pub static TOPOLOGY_VERSION: LazyLock<Gauge> = LazyLock::new(|| {
        Gauge::new("enforcer_topology_version", "Version of the published topology")
    });

    pub static CYCLE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("enforcer_cycle_duration_seconds", "Enforcement cycle latency")
    });

    pub static POLL_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("enforcer_poll_duration_seconds", "Node status request latency")
    });
}

/// Helper to gather all standard metrics
pub fn gather_system_metrics() -> String {
    let mut output = String::new();

    // Counters
    output.push_str(&standard::NODES_POLLED.to_prometheus());
    output.push_str(&standard::POLL_FAILURES.to_prometheus());
    output.push_str(&standard::CYCLES_COMPLETED.to_prometheus());
    output.push_str(&standard::CYCLES_FAILED.to_prometheus());
    output.push_str(&standard::NODES_SWEPT_OFFLINE.to_prometheus());

    // Gauges
    output.push_str(&standard::FULL_NODES.to_prometheus());
    output.push_str(&standard::RSS_NODES.to_prometheus());
    output.push_str(&standard::CURRENT_EPOCH.to_prometheus());
    output.push_str(&standard::TOPOLOGY_VERSION.to_prometheus());

    // Histograms
    output.push_str(&standard::CYCLE_DURATION.to_prometheus());
    output.push_str(&standard::POLL_DURATION.to_prometheus());

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter", "Test counter");
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new("test_gauge", "Test gauge");
        gauge.set(10);
        assert_eq!(gauge.get(), 10);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new("test_histogram", "Test histogram");

        histogram.observe(0.001);
        histogram.observe(0.2);
        histogram.observe(100.0);

        let prometheus = histogram.to_prometheus();
        assert!(prometheus.contains("test_histogram_count 3"));
        assert!(prometheus.contains("test_histogram_bucket{le=\"+Inf\"} 3"));
    }

    #[test]
    fn test_gather_lists_standard_metrics() {
        let text = gather_system_metrics();
        assert!(text.contains("enforcer_cycles_completed_total"));
        assert!(text.contains("enforcer_topology_version"));
        assert!(text.contains("# HELP enforcer_full_nodes Full nodes in the routing set after the last sync"));
        assert!(text.contains("# HELP enforcer_rss_nodes RSS nodes in the routing set after the last sync"));
    }
}
