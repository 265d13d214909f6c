//! Unit tests for the epoch enforcement cycle
//!
//! Runs whole cycles against in-memory collaborators and a scripted fleet.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use enforcer_core::cache::{get_json, Cache, CacheLookup, MemoryCache, ScoredMember};
use enforcer_core::collector::{NodeStatusClient, WorkerResponse};
use enforcer_core::schema::{Address, Stat};
use enforcer_core::selection::{endpoint_cache_key, EndpointCache, SelectionCategory, EPOCH_MARKER_KEY};
use enforcer_core::storage::{FailPoint, MemoryStore, NodeStore};
use enforcer_core::topology::{recovery, TopologyDimension};
use enforcer_core::{Enforcer, EnforcerConfig, EnforcerError, EpochTracker, ShutdownSignal};

#[derive(Clone)]
enum Reply {
    Workers(WorkerResponse),
    Hang,
}

/// Scripted fleet keyed by endpoint; unscripted endpoints are unreachable
#[derive(Default)]
struct FakeFleet {
    replies: Mutex<HashMap<String, Reply>>,
    calls: AtomicUsize,
}

impl FakeFleet {
    fn reply(&self, n: u8, reply: Reply) {
        self.replies.lock().insert(endpoint(n), reply);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeStatusClient for FakeFleet {
    async fn workers_status(&self, endpoint: &str, _access_token: &str) -> enforcer_core::Result<WorkerResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().get(endpoint).cloned();
        match reply {
            Some(Reply::Workers(response)) => Ok(response),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(EnforcerError::Internal { message: "unreachable".into() })
            }
            None => Err(EnforcerError::PeerUnreachable {
                endpoint: endpoint.into(),
                reason: "connection refused".into(),
            }),
        }
    }
}

fn addr(n: u8) -> Address {
    Address::parse(&format!("0x{:040x}", n)).unwrap()
}

fn endpoint(n: u8) -> String {
    format!("http://node-{}", n)
}

fn stat(n: u8, score: f64) -> Stat {
    let mut s = Stat::new(addr(n), endpoint(n), format!("token-{}", n));
    s.score = score;
    s
}

/// `workers`: (network, worker, status)
fn response(workers: &[(&str, &str, &str)], rss: bool) -> Reply {
    let decentralized: Vec<_> = workers
        .iter()
        .map(|(network, worker, status)| {
            json!({
                "network": network,
                "worker": worker,
                "platform": "Uniswap",
                "tags": ["exchange"],
                "status": status,
            })
        })
        .collect();

    let mut data = json!({ "decentralized": decentralized });
    if rss {
        data["rss"] = json!({ "network": "rss", "worker": "rsshub", "tags": ["rss"], "status": "Ready" });
    }
    Reply::Workers(serde_json::from_value(json!({ "data": data })).unwrap())
}

struct Harness {
    store: MemoryStore,
    cache: MemoryCache,
    fleet: Arc<FakeFleet>,
    epochs: Arc<EpochTracker>,
    enforcer: Arc<Enforcer>,
}

fn config() -> EnforcerConfig {
    EnforcerConfig {
        poll_timeout: Duration::from_millis(500),
        stat_page_size: 2,
        ..Default::default()
    }
}

fn harness_with(store: MemoryStore, cache: MemoryCache, config: EnforcerConfig) -> Harness {
    let fleet = Arc::new(FakeFleet::default());
    let epochs = Arc::new(EpochTracker::starting_at(1));
    let enforcer = Arc::new(Enforcer::new(
        config,
        Arc::new(store.clone()),
        Arc::new(cache.clone()),
        epochs.clone(),
        fleet.clone(),
    ));
    Harness {
        store,
        cache,
        fleet,
        epochs,
        enforcer,
    }
}

fn harness(stats: Vec<Stat>) -> Harness {
    harness_with(MemoryStore::with_fleet(Vec::new(), stats), MemoryCache::new(), config())
}

/// A: full + rss, B: partial, C: unreachable
fn standard_fleet() -> Harness {
    let mut c = stat(3, 30.0);
    c.epoch_invalid_request = 7;
    let h = harness(vec![stat(1, 10.0), stat(2, 20.0), c]);

    h.fleet.reply(
        1,
        response(&[("ethereum", "core", "Ready"), ("polygon", "core", "Ready")], true),
    );
    h.fleet.reply(
        2,
        response(&[("ethereum", "core", "Ready"), ("ethereum", "uniswap", "Indexing")], false),
    );
    h
}

/// MemoryCache that fails reads or writes of keys with a given prefix
#[derive(Default)]
struct FlakyCache {
    inner: MemoryCache,
    fail_get: Mutex<Option<String>>,
    fail_set: Mutex<Option<String>>,
}

impl FlakyCache {
    fn over(inner: MemoryCache) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    fn fail_get(&self, prefix: &str) {
        *self.fail_get.lock() = Some(prefix.into());
    }

    fn fail_set(&self, prefix: &str) {
        *self.fail_set.lock() = Some(prefix.into());
    }

    fn check(armed: &Mutex<Option<String>>, key: &str) -> enforcer_core::Result<()> {
        match armed.lock().as_deref() {
            Some(prefix) if key.starts_with(prefix) => Err(EnforcerError::CacheUnavailable {
                message: format!("write refused for {}", key),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Cache for FlakyCache {
    async fn get(&self, key: &str) -> enforcer_core::Result<Option<Bytes>> {
        Self::check(&self.fail_get, key)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> enforcer_core::Result<()> {
        Self::check(&self.fail_set, key)?;
        self.inner.set(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> enforcer_core::Result<()> {
        self.inner.remove(key).await
    }

    async fn zrevrange_with_scores(&self, key: &str) -> enforcer_core::Result<Vec<ScoredMember>> {
        self.inner.zrevrange_with_scores(key).await
    }

    async fn zadd(&self, key: &str, members: &[ScoredMember]) -> enforcer_core::Result<()> {
        self.inner.zadd(key, members).await
    }

    async fn zrem(&self, key: &str, members: &[String]) -> enforcer_core::Result<()> {
        self.inner.zrem(key, members).await
    }
}

fn flaky_enforcer(h: &Harness, cache: Arc<FlakyCache>) -> Enforcer {
    Enforcer::new(
        config(),
        Arc::new(h.store.clone()),
        cache,
        h.epochs.clone(),
        h.fleet.clone(),
    )
}

async fn members(cache: &MemoryCache, category: SelectionCategory) -> Vec<ScoredMember> {
    cache.zrevrange_with_scores(category.cache_key()).await.unwrap()
}

#[tokio::test]
async fn test_full_cycle_classifies_fleet() {
    let h = standard_fleet();

    let report = h.enforcer.maintain_epoch_data(1).await.unwrap();
    assert_eq!(report.polled, 3);
    assert_eq!(report.reported, 2);
    assert_eq!(report.assignments, 2);
    assert_eq!(report.topology_version, 1);

    let topology = h.enforcer.topology();
    assert_eq!(topology.epoch, 1);
    assert_eq!(topology.worker_to_networks["core"], vec!["ethereum", "polygon"]);
    assert!(!topology.worker_to_networks.contains_key("uniswap"));

    let a = h.store.find_node_stat(&addr(1)).await.unwrap().unwrap();
    assert!(a.is_full_node);
    assert!(a.is_rss_node);
    assert_eq!(a.epoch, 1);
    assert_eq!(a.decentralized_network, 2);

    let b = h.store.find_node_stat(&addr(2)).await.unwrap().unwrap();
    assert!(!b.is_full_node);
    assert_eq!(b.indexer, 2);

    // Unreachable node is demoted to exactly the threshold
    let c = h.store.find_node_stat(&addr(3)).await.unwrap().unwrap();
    assert_eq!(c.epoch_invalid_request, 3);

    let active = h.store.find_node_workers(Some(1), None, Some(true)).await.unwrap();
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|w| w.address == addr(2)));
}

#[tokio::test]
async fn test_cycle_populates_routing_sets() {
    let h = standard_fleet();
    h.enforcer.maintain_epoch_data(1).await.unwrap();

    let full = members(&h.cache, SelectionCategory::Full).await;
    assert_eq!(full, vec![ScoredMember::new(addr(1).to_string(), 10.0)]);
    let rss = members(&h.cache, SelectionCategory::Rss).await;
    assert_eq!(rss, vec![ScoredMember::new(addr(1).to_string(), 10.0)]);

    let entry = get_json::<EndpointCache>(&h.cache, &endpoint_cache_key(addr(1).as_str()))
        .await
        .into_result("endpoint")
        .unwrap();
    assert_eq!(entry.endpoint, endpoint(1));
    assert_eq!(entry.access_token, "token-1");

    let marker = get_json::<u64>(&h.cache, EPOCH_MARKER_KEY).await.into_result(EPOCH_MARKER_KEY);
    assert_eq!(marker.unwrap(), 1);
}

#[tokio::test]
async fn test_unreachable_node_leaves_routing() {
    let mut c = stat(3, 30.0);
    c.is_full_node = true;
    let h = harness(vec![stat(1, 10.0), c]);
    h.fleet.reply(1, response(&[("ethereum", "core", "Ready")], false));

    let c_member = addr(3).to_string();
    h.cache
        .zadd(SelectionCategory::Full.cache_key(), &[ScoredMember::new(c_member.clone(), 30.0)])
        .await
        .unwrap();
    h.cache
        .set(&endpoint_cache_key(&c_member), "{}".into(), None)
        .await
        .unwrap();

    h.enforcer.maintain_epoch_data(1).await.unwrap();

    let full = members(&h.cache, SelectionCategory::Full).await;
    assert_eq!(full, vec![ScoredMember::new(addr(1).to_string(), 10.0)]);
    assert!(h.cache.get(&endpoint_cache_key(&c_member)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_cycle_keeps_previous_state() {
    let h = standard_fleet();
    h.enforcer.maintain_epoch_data(1).await.unwrap();
    let routed = members(&h.cache, SelectionCategory::Full).await;

    // Epoch 2 introduces a new worker, but the assignment write fails
    h.fleet.reply(
        1,
        response(
            &[
                ("ethereum", "core", "Ready"),
                ("polygon", "core", "Ready"),
                ("polygon", "aave", "Ready"),
            ],
            true,
        ),
    );
    h.store.inject_failure(FailPoint::SaveNodeWorkers);

    let err = h.enforcer.maintain_epoch_data(2).await.unwrap_err();
    assert!(matches!(err, EnforcerError::Transaction { .. }));
    assert!(err.is_retryable());

    let topology = h.enforcer.topology();
    assert_eq!(topology.version, 1);
    assert_eq!(topology.epoch, 1);
    assert!(!topology.worker_to_networks.contains_key("aave"));
    assert_eq!(h.enforcer.last_epoch(), Some(1));
    assert_eq!(members(&h.cache, SelectionCategory::Full).await, routed);
    assert!(h.store.find_node_workers(Some(2), None, None).await.unwrap().is_empty());

    let a = h.store.find_node_stat(&addr(1)).await.unwrap().unwrap();
    assert_eq!(a.epoch, 1);

    // The retry goes through
    let report = h.enforcer.maintain_epoch_data(2).await.unwrap();
    assert_eq!(report.topology_version, 2);
    assert_eq!(h.enforcer.topology().worker_to_networks["aave"], vec!["polygon"]);
}

#[tokio::test]
async fn test_failed_checkpoint_write_keeps_previous_checkpoint() {
    let h = harness(vec![stat(1, 10.0)]);
    h.fleet.reply(1, response(&[("ethereum", "core", "Ready")], false));
    let cache = Arc::new(FlakyCache::over(h.cache.clone()));
    let enforcer = flaky_enforcer(&h, cache.clone());

    enforcer.maintain_epoch_data(1).await.unwrap();

    h.fleet.reply(1, response(&[("polygon", "aave", "Ready")], false));
    cache.fail_set(TopologyDimension::TagToWorkers.cache_key());

    let err = enforcer.maintain_epoch_data(2).await.unwrap_err();
    assert!(matches!(err, EnforcerError::CacheUnavailable { .. }));
    assert_eq!(enforcer.topology().version, 1);
    assert!(h.store.find_node_workers(Some(2), None, None).await.unwrap().is_empty());

    match recovery::load(&h.cache).await {
        CacheLookup::Found(checkpoint) => {
            assert_eq!(checkpoint.epoch, 1);
            assert_eq!(checkpoint.worker_to_networks["core"], vec!["ethereum"]);
            assert!(!checkpoint.worker_to_networks.contains_key("aave"));
            assert_eq!(checkpoint.tag_to_workers["exchange"], vec!["core"]);
        }
        other => panic!("expected the epoch 1 checkpoint, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_pointer_flip_keeps_previous_checkpoint() {
    let h = harness(vec![stat(1, 10.0)]);
    h.fleet.reply(1, response(&[("ethereum", "core", "Ready")], false));
    let cache = Arc::new(FlakyCache::over(h.cache.clone()));
    let enforcer = flaky_enforcer(&h, cache.clone());

    enforcer.maintain_epoch_data(1).await.unwrap();

    h.fleet.reply(1, response(&[("polygon", "aave", "Ready")], false));
    cache.fail_set(recovery::GENERATION_KEY);

    assert!(enforcer.maintain_epoch_data(2).await.is_err());
    match recovery::load(&h.cache).await {
        CacheLookup::Found(checkpoint) => {
            assert_eq!(checkpoint.epoch, 1);
            assert!(!checkpoint.worker_to_networks.contains_key("aave"));
        }
        other => panic!("expected the epoch 1 checkpoint, got {:?}", other),
    }
}

#[tokio::test]
async fn test_init_rebuilds_empty_cache() {
    let h = standard_fleet();
    h.epochs.restore(5).await;

    h.enforcer.init().await.unwrap();

    assert_eq!(h.enforcer.last_epoch(), Some(5));
    assert_eq!(h.enforcer.topology().epoch, 5);
    assert_eq!(h.fleet.calls(), 3);
    assert!(matches!(
        enforcer_core::topology::recovery::load(&h.cache).await,
        CacheLookup::Found(_)
    ));
}

#[tokio::test]
async fn test_init_restores_without_polling() {
    let first = standard_fleet();
    first.epochs.restore(5).await;
    first.enforcer.init().await.unwrap();
    let built = first.enforcer.topology();

    let second = harness_with(first.store.clone(), first.cache.clone(), config());
    second.enforcer.init().await.unwrap();

    assert_eq!(second.fleet.calls(), 0);
    assert_eq!(second.enforcer.last_epoch(), Some(5));
    let restored = second.enforcer.topology();
    assert_eq!(restored.worker_to_networks, built.worker_to_networks);
    assert_eq!(restored.tag_to_workers, built.tag_to_workers);
}

#[tokio::test]
async fn test_init_fails_on_cache_error() {
    let h = standard_fleet();
    h.cache.set_unavailable(true);

    let err = h.enforcer.init().await.unwrap_err();
    assert!(matches!(err, EnforcerError::CacheUnavailable { .. }));
    assert_eq!(h.fleet.calls(), 0);
}

#[tokio::test]
async fn test_init_fails_on_epoch_marker_error() {
    let h = standard_fleet();
    h.enforcer.init().await.unwrap();
    let polled = h.fleet.calls();

    let cache = Arc::new(FlakyCache::over(h.cache.clone()));
    cache.fail_get(EPOCH_MARKER_KEY);
    let enforcer = flaky_enforcer(&h, cache);

    let err = enforcer.init().await.unwrap_err();
    assert!(matches!(err, EnforcerError::CacheUnavailable { .. }));
    assert_eq!(enforcer.last_epoch(), None);
    assert_eq!(enforcer.topology().version, 0);
    assert_eq!(h.fleet.calls(), polled);
}

#[tokio::test]
async fn test_shutdown_cancels_cycle() {
    let mut cfg = config();
    cfg.poll_timeout = Duration::from_secs(600);
    let h = harness_with(
        MemoryStore::with_fleet(Vec::new(), vec![stat(1, 1.0), stat(2, 2.0)]),
        MemoryCache::new(),
        cfg,
    );
    h.fleet.reply(1, response(&[("ethereum", "core", "Ready")], false));
    h.fleet.reply(2, Reply::Hang);

    let signal = ShutdownSignal::new();
    let mut listener = signal.listener();
    let trigger = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.shutdown();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), h.enforcer.check_epoch(&mut listener))
        .await
        .expect("cycle should be cancelled promptly");
    assert!(matches!(result, Err(EnforcerError::Cancelled)));
    assert_eq!(h.enforcer.last_epoch(), None);
    assert_eq!(h.enforcer.topology().version, 0);
}

#[tokio::test]
async fn test_run_follows_epochs_until_shutdown() {
    let mut cfg = config();
    cfg.epoch_check_interval = Duration::from_millis(20);
    cfg.sweep_interval = Duration::from_millis(20);
    let h = harness_with(
        MemoryStore::with_fleet(Vec::new(), vec![stat(1, 1.0)]),
        MemoryCache::new(),
        cfg,
    );
    h.fleet.reply(1, response(&[("ethereum", "core", "Ready")], false));

    let signal = ShutdownSignal::new();
    let enforcer = h.enforcer.clone();
    let stop = signal.clone();
    let handle = tokio::spawn(async move { enforcer.run(stop).await });

    wait_for_epoch(&h.enforcer, 1).await;
    h.epochs.advance_epoch().await;
    wait_for_epoch(&h.enforcer, 2).await;

    signal.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run loop should stop")
        .unwrap();
    assert!(result.is_ok());
}

async fn wait_for_epoch(enforcer: &Enforcer, epoch: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while enforcer.last_epoch() != Some(epoch) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("epoch was never processed");
}
