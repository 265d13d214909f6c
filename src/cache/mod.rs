//! Key-value and sorted-set cache collaborator
//!
//! Values are raw bytes; the JSON helpers below are what the engine uses.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EnforcerError, Result};

pub use memory::MemoryCache;

/// Sorted-set member with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// Outcome of a typed cache read
#[derive(Debug)]
pub enum CacheLookup<T> {
    Found(T),
    /// Key absent or expired
    Missing,
    /// Any other failure, including an undecodable value
    Failed(EnforcerError),
}

impl<T> CacheLookup<T> {
    pub fn is_missing(&self) -> bool {
        matches!(self, CacheLookup::Missing)
    }

    /// Collapse into a result, turning a miss into [`EnforcerError::CacheMiss`]
    pub fn into_result(self, key: &str) -> Result<T> {
        match self {
            CacheLookup::Found(value) => Ok(value),
            CacheLookup::Missing => Err(EnforcerError::CacheMiss { key: key.into() }),
            CacheLookup::Failed(e) => Err(e),
        }
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// `Ok(None)` on a miss
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// `ttl = None` keeps the value until overwritten
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// All members, highest score first
    async fn zrevrange_with_scores(&self, key: &str) -> Result<Vec<ScoredMember>>;

    /// Insert or update scores
    async fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<()>;

    async fn zrem(&self, key: &str, members: &[String]) -> Result<()>;
}

/// Read and decode a JSON value
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> CacheLookup<T> {
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_slice(&raw) {
            Ok(value) => CacheLookup::Found(value),
            Err(e) => CacheLookup::Failed(EnforcerError::CacheUnavailable {
                message: format!("decode {}: {}", key, e),
            }),
        },
        Ok(None) => CacheLookup::Missing,
        Err(e) => CacheLookup::Failed(e),
    }
}

/// Encode and store a JSON value
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let raw = serde_json::to_vec(value)?;
    cache.set(key, Bytes::from(raw), ttl).await
}
