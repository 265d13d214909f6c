//! In-process cache backend

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Cache, ScoredMember};
use crate::error::{EnforcerError, Result};

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
struct Inner {
    values: RwLock<HashMap<String, Entry>>,
    sorted_sets: RwLock<HashMap<String, HashMap<String, f64>>>,
    unavailable: Mutex<bool>,
}

/// Shared in-memory cache; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<Inner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.inner.unavailable.lock() = unavailable;
    }

    fn check(&self) -> Result<()> {
        if *self.inner.unavailable.lock() {
            return Err(EnforcerError::CacheUnavailable {
                message: "connection refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check()?;
        let now = Instant::now();
        let values = self.inner.values.read();
        Ok(values
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.inner.values.write().insert(key.into(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.values.write().remove(key);
        Ok(())
    }

    async fn zrevrange_with_scores(&self, key: &str) -> Result<Vec<ScoredMember>> {
        self.check()?;
        let sets = self.inner.sorted_sets.read();
        let mut members: Vec<ScoredMember> = sets
            .get(key)
            .map(|set| {
                set.iter()
                    .map(|(member, score)| ScoredMember::new(member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();

        members.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| b.member.cmp(&a.member)));
        Ok(members)
    }

    async fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<()> {
        self.check()?;
        let mut sets = self.inner.sorted_sets.write();
        let set = sets.entry(key.into()).or_default();
        for m in members {
            set.insert(m.member.clone(), m.score);
        }
        Ok(())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<()> {
        self.check()?;
        let mut sets = self.inner.sorted_sets.write();
        if let Some(set) = sets.get_mut(key) {
            for m in members {
                set.remove(m);
            }
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }
}
