use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::entity::AnimationEntity;
use crate::foundation::config::EntityCacheOpts;
use crate::foundation::sync::lock;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub entries: usize,
    pub weight_bytes: usize,
}

struct Entry {
    entity: Arc<AnimationEntity>,
    weight: usize,
}

struct Inner {
    // Unbounded by count; eviction is driven by weight.
    lru: LruCache<String, Entry>,
    weight: usize,
    stats: EntityCacheStats,
}

/// Size-weighted LRU of prepared entities.
///
/// Evicted entities are only dropped from the cache; players still holding them keep them
/// alive and decide when to clear them.
pub struct EntityCache {
    opts: EntityCacheOpts,
    inner: Mutex<Inner>,
}

impl EntityCache {
    pub fn new(opts: EntityCacheOpts) -> Self {
        Self {
            opts,
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                weight: 0,
                stats: EntityCacheStats::default(),
            }),
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.opts.capacity_bytes
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<AnimationEntity>> {
        let mut inner = lock(&self.inner);
        let hit = inner.lru.get(key).map(|e| e.entity.clone());
        if hit.is_some() {
            inner.stats.hits += 1;
            tracing::debug!(%key, "entity cache hit");
        } else {
            inner.stats.misses += 1;
        }
        hit
    }

    /// Return `true` if `key` is cached, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.inner).lru.contains(key)
    }

    /// Insert or replace `key`, then evict least-recently-used entries until the total weight
    /// fits the budget. An entry heavier than the whole budget is evicted immediately.
    ///
    /// Returns the evicted entities.
    pub fn put(
        &self,
        key: impl Into<String>,
        entity: Arc<AnimationEntity>,
    ) -> Vec<(String, Arc<AnimationEntity>)> {
        let key = key.into();
        let weight = entity.weight_bytes(self.opts.floor_weight_bytes);

        let mut inner = lock(&self.inner);
        inner.stats.puts += 1;
        if let Some(old) = inner.lru.put(key.clone(), Entry { entity, weight }) {
            inner.weight = inner.weight.saturating_sub(old.weight);
        }
        inner.weight = inner.weight.saturating_add(weight);

        let mut evicted = Vec::new();
        while inner.weight > self.opts.capacity_bytes {
            let Some((k, e)) = inner.lru.pop_lru() else {
                break;
            };
            inner.weight = inner.weight.saturating_sub(e.weight);
            inner.stats.evictions += 1;
            tracing::debug!(key = %k, weight = e.weight, "entity evicted");
            evicted.push((k, e.entity));
        }
        evicted
    }

    pub fn remove(&self, key: &str) -> Option<Arc<AnimationEntity>> {
        let mut inner = lock(&self.inner);
        let e = inner.lru.pop(key)?;
        inner.weight = inner.weight.saturating_sub(e.weight);
        Some(e.entity)
    }

    pub fn clear_all(&self) {
        let mut inner = lock(&self.inner);
        inner.lru.clear();
        inner.weight = 0;
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn weight_bytes(&self) -> usize {
        lock(&self.inner).weight
    }

    pub fn stats(&self) -> EntityCacheStats {
        let inner = lock(&self.inner);
        EntityCacheStats {
            entries: inner.lru.len(),
            weight_bytes: inner.weight,
            ..inner.stats.clone()
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/entity.rs"]
mod tests;
