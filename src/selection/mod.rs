//! Routing selection sets
//!
//! Each category has a cache sorted set that request dispatch reads. After
//! a sync the set holds exactly the nodes flagged for that category whose
//! invalid-request counter is under the demotion threshold, scored by their
//! routing score.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{set_json, Cache, ScoredMember};
use crate::error::Result;
use crate::metrics::standard;
use crate::schema::{Stat, StatQuery};
use crate::storage::{find_all_node_stats, NodeStore};

/// Cache key of the epoch the routing sets were last built for
pub const EPOCH_MARKER_KEY: &str = "nodes:epoch";

/// Cache key of a node's endpoint side entry
pub fn endpoint_cache_key(address: &str) -> String {
    format!("node:endpoint:{}", address)
}

/// Routing categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionCategory {
    Full,
    Rss,
}

impl SelectionCategory {
    pub const ALL: [SelectionCategory; 2] = [SelectionCategory::Full, SelectionCategory::Rss];

    pub fn cache_key(&self) -> &'static str {
        match self {
            SelectionCategory::Full => "nodes:full",
            SelectionCategory::Rss => "nodes:rss",
        }
    }

    /// Authoritative listing for the category
    pub fn query(&self) -> StatQuery {
        match self {
            SelectionCategory::Full => StatQuery::full_nodes(),
            SelectionCategory::Rss => StatQuery::rss_nodes(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionCategory::Full => "full",
            SelectionCategory::Rss => "rss",
        }
    }
}

/// How dispatch reaches a routable node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCache {
    pub endpoint: String,
    pub access_token: String,
}

impl From<&Stat> for EndpointCache {
    fn from(stat: &Stat) -> Self {
        Self {
            endpoint: stat.endpoint.clone(),
            access_token: stat.access_token.clone(),
        }
    }
}

/// Changes that bring a cached set in line with the listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberChanges {
    pub to_remove: Vec<String>,
    /// Every routable node, so scores are refreshed too
    pub to_add: Vec<ScoredMember>,
}

/// Diff the cached set against the authoritative listing
pub fn prepare_members(cached: &[ScoredMember], listed: &[Stat], threshold: u32) -> MemberChanges {
    let counters: HashMap<String, u32> = listed
        .iter()
        .map(|s| (s.address.to_string(), s.epoch_invalid_request))
        .collect();

    let to_remove = cached
        .iter()
        .filter(|m| counters.get(&m.member).map_or(true, |c| *c >= threshold))
        .map(|m| m.member.clone())
        .collect();

    let to_add = listed
        .iter()
        .filter(|s| s.epoch_invalid_request < threshold)
        .map(|s| ScoredMember::new(s.address.to_string(), s.score))
        .collect();

    MemberChanges { to_remove, to_add }
}

/// Outcome of syncing one category
#[derive(Debug, Clone, Default)]
pub struct CategorySync {
    pub removed: Vec<String>,
    /// Stats now in the set
    pub routable: Vec<Stat>,
}

/// Outcome of a full sync
#[derive(Debug, Clone, Default)]
pub struct SelectionSummary {
    pub full: usize,
    pub rss: usize,
    pub removed: usize,
}

pub struct SelectionSetSynchronizer {
    store: Arc<dyn NodeStore>,
    cache: Arc<dyn Cache>,
    threshold: u32,
    page_size: usize,
}

impl SelectionSetSynchronizer {
    pub fn new(store: Arc<dyn NodeStore>, cache: Arc<dyn Cache>, threshold: u32, page_size: usize) -> Self {
        Self {
            store,
            cache,
            threshold,
            page_size,
        }
    }

    /// Converge one category's set: removals first, then additions
    pub async fn sync_category(&self, category: SelectionCategory) -> Result<CategorySync> {
        let key = category.cache_key();
        let listed = find_all_node_stats(self.store.as_ref(), &category.query(), self.page_size).await?;
        let cached = self.cache.zrevrange_with_scores(key).await?;

        let changes = prepare_members(&cached, &listed, self.threshold);

        if !changes.to_remove.is_empty() {
            self.cache.zrem(key, &changes.to_remove).await?;
        }
        if !changes.to_add.is_empty() {
            self.cache.zadd(key, &changes.to_add).await?;
        }

        debug!(
            category = category.as_str(),
            listed = listed.len(),
            cached = cached.len(),
            removed = changes.to_remove.len(),
            added = changes.to_add.len(),
            "Selection set converged"
        );

        let routable = listed
            .into_iter()
            .filter(|s| s.epoch_invalid_request < self.threshold)
            .collect();
        Ok(CategorySync {
            removed: changes.to_remove,
            routable,
        })
    }

    /// Sync every category, refresh endpoint entries, then stamp the epoch
    pub async fn sync_all(&self, epoch: u64) -> Result<SelectionSummary> {
        let full = self.sync_category(SelectionCategory::Full).await?;
        let rss = self.sync_category(SelectionCategory::Rss).await?;

        standard::FULL_NODES.set(full.routable.len() as i64);
        standard::RSS_NODES.set(rss.routable.len() as i64);

        let mut routable: HashSet<String> = HashSet::new();
        for stat in full.routable.iter().chain(rss.routable.iter()) {
            if routable.insert(stat.address.to_string()) {
                set_json(
                    self.cache.as_ref(),
                    &endpoint_cache_key(stat.address.as_str()),
                    &EndpointCache::from(stat),
                    None,
                )
                .await?;
            }
        }

        let removed: BTreeSet<&String> = full
            .removed
            .iter()
            .chain(rss.removed.iter())
            .filter(|member| !routable.contains(*member))
            .collect();
        for member in &removed {
            if let Err(e) = self.cache.remove(&endpoint_cache_key(member)).await {
                warn!(node = %member, error = %e, "Failed to drop endpoint entry");
            }
        }

        set_json(self.cache.as_ref(), EPOCH_MARKER_KEY, &epoch, None).await?;

        let summary = SelectionSummary {
            full: full.routable.len(),
            rss: rss.routable.len(),
            removed: removed.len(),
        };
        info!(
            epoch,
            full = summary.full,
            rss = summary.rss,
            removed = summary.removed,
            "Selection sets synchronized"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Address;

    fn stat(n: u8, score: f64, counter: u32) -> Stat {
        let mut s = Stat::new(Address::parse(&format!("0x{:040x}", n)).unwrap(), "http://n", "");
        s.score = score;
        s.epoch_invalid_request = counter;
        s
    }

    #[test]
    fn test_prepare_removes_absent_and_demoted() {
        let a = stat(1, 15.0, 0);
        let b = stat(2, 20.0, 3);
        let cached = vec![
            ScoredMember::new(a.address.to_string(), 10.0),
            ScoredMember::new(b.address.to_string(), 20.0),
            ScoredMember::new(format!("0x{:040x}", 9), 5.0),
        ];

        let changes = prepare_members(&cached, &[a.clone(), b.clone()], 3);
        assert_eq!(changes.to_add, vec![ScoredMember::new(a.address.to_string(), 15.0)]);
        assert_eq!(changes.to_remove.len(), 2);
        assert!(changes.to_remove.contains(&b.address.to_string()));
    }

    #[test]
    fn test_prepare_empty_listing_clears() {
        let cached = vec![ScoredMember::new("0xabc", 1.0)];
        let changes = prepare_members(&cached, &[], 3);
        assert_eq!(changes.to_remove, vec!["0xabc".to_string()]);
        assert!(changes.to_add.is_empty());
    }
}
