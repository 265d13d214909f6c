//! Topology checkpoint in the cache
//!
//! Each dimension is stored under a generation-suffixed key with no
//! expiration, so a restart can classify without re-polling the fleet. The
//! `topology:generation` pointer is written last; until it flips, readers
//! keep seeing the previous generation in full.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::snapshot::{CapabilityMap, TopologyDimension, TopologySnapshot};
use crate::cache::{get_json, set_json, Cache, CacheLookup};
use crate::error::Result;

/// Cache key of the current checkpoint pointer
pub const GENERATION_KEY: &str = "topology:generation";

/// Which generation of dimension keys is current
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyCheckpoint {
    pub generation: String,
    pub epoch: u64,
}

impl TopologyCheckpoint {
    /// Key holding `dimension` for this generation
    pub fn dimension_key(&self, dimension: TopologyDimension) -> String {
        format!("{}:{}", dimension.cache_key(), self.generation)
    }
}

/// Write all four dimensions under a fresh generation, then flip the pointer
pub async fn persist(cache: &dyn Cache, snapshot: &TopologySnapshot) -> Result<()> {
    let checkpoint = stage(cache, snapshot).await?;
    if let Err(e) = commit(cache, &checkpoint).await {
        discard(cache, &checkpoint).await;
        return Err(e);
    }
    Ok(())
}

/// Write the four dimension keys of a new generation without making it current.
///
/// On failure the partially written generation is discarded.
pub async fn stage(cache: &dyn Cache, snapshot: &TopologySnapshot) -> Result<TopologyCheckpoint> {
    let checkpoint = TopologyCheckpoint {
        generation: Uuid::new_v4().simple().to_string(),
        epoch: snapshot.epoch,
    };
    let [a, b, c, d] = TopologyDimension::ALL;
    let (ka, kb, kc, kd) = (
        checkpoint.dimension_key(a),
        checkpoint.dimension_key(b),
        checkpoint.dimension_key(c),
        checkpoint.dimension_key(d),
    );

    let written = tokio::try_join!(
        set_json(cache, &ka, snapshot.dimension(a), None),
        set_json(cache, &kb, snapshot.dimension(b), None),
        set_json(cache, &kc, snapshot.dimension(c), None),
        set_json(cache, &kd, snapshot.dimension(d), None),
    );
    if let Err(e) = written {
        discard(cache, &checkpoint).await;
        return Err(e);
    }

    debug!(epoch = snapshot.epoch, generation = %checkpoint.generation, "Staged topology");
    Ok(checkpoint)
}

/// Make a staged generation current and drop the one it replaces
pub async fn commit(cache: &dyn Cache, checkpoint: &TopologyCheckpoint) -> Result<()> {
    let previous = match get_json::<TopologyCheckpoint>(cache, GENERATION_KEY).await {
        CacheLookup::Found(previous) => Some(previous),
        CacheLookup::Missing => None,
        CacheLookup::Failed(e) => return Err(e),
    };

    set_json(cache, GENERATION_KEY, checkpoint, None).await?;

    if let Some(previous) = previous.filter(|p| p.generation != checkpoint.generation) {
        discard(cache, &previous).await;
    }

    debug!(epoch = checkpoint.epoch, generation = %checkpoint.generation, "Persisted topology");
    Ok(())
}

/// Best-effort removal of a generation's dimension keys
pub async fn discard(cache: &dyn Cache, checkpoint: &TopologyCheckpoint) {
    for dimension in TopologyDimension::ALL {
        let key = checkpoint.dimension_key(dimension);
        if let Err(e) = cache.remove(&key).await {
            warn!(key = %key, error = %e, "Failed to drop topology key");
        }
    }
}

/// Read the current generation's four dimensions.
///
/// Any failure wins over a miss; a missing pointer or a miss on any key is a
/// miss for the whole topology.
pub async fn load(cache: &dyn Cache) -> CacheLookup<TopologySnapshot> {
    let checkpoint = match get_json::<TopologyCheckpoint>(cache, GENERATION_KEY).await {
        CacheLookup::Found(checkpoint) => checkpoint,
        CacheLookup::Missing => {
            info!("Topology not found in cache");
            return CacheLookup::Missing;
        }
        CacheLookup::Failed(e) => return CacheLookup::Failed(e),
    };

    let [a, b, c, d] = TopologyDimension::ALL;
    let (ka, kb, kc, kd) = (
        checkpoint.dimension_key(a),
        checkpoint.dimension_key(b),
        checkpoint.dimension_key(c),
        checkpoint.dimension_key(d),
    );

    let (ra, rb, rc, rd) = tokio::join!(
        get_json::<CapabilityMap>(cache, &ka),
        get_json::<CapabilityMap>(cache, &kb),
        get_json::<CapabilityMap>(cache, &kc),
        get_json::<CapabilityMap>(cache, &kd),
    );

    let mut snapshot = TopologySnapshot {
        epoch: checkpoint.epoch,
        ..Default::default()
    };
    let mut missing = Vec::new();

    for (dimension, lookup) in [(a, ra), (b, rb), (c, rc), (d, rd)] {
        match lookup {
            CacheLookup::Found(map) => *snapshot.dimension_mut(dimension) = map,
            CacheLookup::Missing => missing.push(dimension.cache_key()),
            CacheLookup::Failed(e) => return CacheLookup::Failed(e),
        }
    }

    if !missing.is_empty() {
        info!(keys = ?missing, generation = %checkpoint.generation, "Topology checkpoint incomplete");
        return CacheLookup::Missing;
    }

    CacheLookup::Found(snapshot)
}
