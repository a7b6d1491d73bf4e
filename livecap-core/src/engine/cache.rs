//! In-memory engine instance cache.
//!
//! Keeps recently used engines reachable so switching back does not pay
//! the model-load cost again. Two tiers: weak references that vanish once
//! the last user drops the engine, and a small strong tier (capacity 2)
//! that pins engines in memory. Frequently accessed weak entries are
//! promoted to the strong tier; when the strong tier is full, the least
//! accessed entry is demoted back to weak.
//!
//! `LIVECAP_ENGINE_STRONG_CACHE=1/true/yes` pins every inserted engine
//! strong from the start.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{EngineHandle, Transcriber};

/// Strong-tier capacity.
const STRONG_LIMIT: usize = 2;

/// Accesses after which a weak entry is promoted to the strong tier.
const PROMOTE_AFTER: u64 = 3;

type SharedEngine = Arc<Mutex<dyn Transcriber>>;

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub weak_refs: usize,
    pub strong_refs: usize,
}

/// Weak/strong tiered engine cache. Keys are typically
/// `"<engine_id>_<device>"`.
pub struct EngineCache {
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    weak: HashMap<String, Weak<Mutex<dyn Transcriber>>>,
    strong: HashMap<String, SharedEngine>,
    access_count: HashMap<String, u64>,
    strong_limit: usize,
    pin_strong: bool,
    hits: u64,
    misses: u64,
}

impl Default for EngineCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCache {
    pub fn new() -> Self {
        Self::with_limit(STRONG_LIMIT)
    }

    pub fn with_limit(strong_limit: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                weak: HashMap::new(),
                strong: HashMap::new(),
                access_count: HashMap::new(),
                strong_limit: strong_limit.max(1),
                pin_strong: strong_cache_pinned(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Fetch a cached engine, promoting hot weak entries to the strong
    /// tier.
    pub fn get(&self, key: &str) -> Option<EngineHandle> {
        let mut inner = self.inner.lock();
        *inner.access_count.entry(key.to_string()).or_insert(0) += 1;

        if let Some(engine) = inner.strong.get(key).cloned() {
            debug!(key, "engine cache hit (strong)");
            inner.hits += 1;
            return Some(EngineHandle(engine));
        }

        if let Some(weak) = inner.weak.get(key).cloned() {
            if let Some(engine) = weak.upgrade() {
                debug!(key, "engine cache hit (weak)");
                inner.hits += 1;
                if inner.access_count.get(key).copied().unwrap_or(0) > PROMOTE_AFTER {
                    inner.promote(key, Arc::clone(&engine));
                }
                return Some(EngineHandle(engine));
            }
            // Engine was dropped while only weakly held.
            debug!(key, "engine cache entry expired");
            inner.weak.remove(key);
            inner.access_count.remove(key);
        }

        inner.misses += 1;
        None
    }

    /// Insert an engine. `strong` pins it regardless of access counts; the
    /// `LIVECAP_ENGINE_STRONG_CACHE` override has the same effect.
    pub fn insert(&self, key: &str, handle: &EngineHandle, strong: bool) {
        let mut inner = self.inner.lock();
        if strong || inner.pin_strong {
            inner.promote(key, Arc::clone(&handle.0));
        } else {
            debug!(key, "engine cached (weak)");
            inner.weak.insert(key.to_string(), Arc::downgrade(&handle.0));
        }
        inner.access_count.insert(key.to_string(), 1);
    }

    /// Drop one entry, or everything when `key` is `None`.
    pub fn clear(&self, key: Option<&str>) {
        let mut inner = self.inner.lock();
        match key {
            Some(key) => {
                inner.weak.remove(key);
                inner.strong.remove(key);
                inner.access_count.remove(key);
                info!(key, "engine cache entry cleared");
            }
            None => {
                inner.weak.clear();
                inner.strong.clear();
                inner.access_count.clear();
                info!("engine cache cleared");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            weak_refs: inner.weak.len(),
            strong_refs: inner.strong.len(),
        }
    }
}

impl CacheInner {
    /// Pin `engine` strong, demoting the least-accessed entry if the tier
    /// is full.
    fn promote(&mut self, key: &str, engine: SharedEngine) {
        if self.strong.contains_key(key) {
            self.strong.insert(key.to_string(), engine);
            return;
        }

        if self.strong.len() >= self.strong_limit {
            let lru = self
                .strong
                .keys()
                .min_by_key(|k| self.access_count.get(*k).copied().unwrap_or(0))
                .cloned();
            if let Some(lru_key) = lru {
                if let Some(demoted) = self.strong.remove(&lru_key) {
                    debug!(key = lru_key.as_str(), "engine demoted to weak tier");
                    self.weak.insert(lru_key, Arc::downgrade(&demoted));
                }
            }
        }

        debug!(key, "engine cached (strong)");
        self.strong.insert(key.to_string(), engine);
    }
}

/// `LIVECAP_ENGINE_STRONG_CACHE` truthiness: `1`, `true`, or `yes`.
fn strong_cache_pinned() -> bool {
    std::env::var("LIVECAP_ENGINE_STRONG_CACHE")
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            v == "1" || v == "true" || v == "yes"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EchoEngine;

    fn handle() -> EngineHandle {
        EngineHandle::new(EchoEngine::new())
    }

    #[test]
    fn weak_entry_expires_when_dropped() {
        let cache = EngineCache::new();
        {
            let engine = handle();
            cache.insert("echo_cpu", &engine, false);
            assert!(cache.get("echo_cpu").is_some());
        }
        // Last Arc dropped; the weak ref cannot upgrade.
        assert!(cache.get("echo_cpu").is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn strong_entry_survives_drop() {
        let cache = EngineCache::new();
        {
            let engine = handle();
            cache.insert("echo_cpu", &engine, true);
        }
        assert!(cache.get("echo_cpu").is_some());
    }

    #[test]
    fn hot_weak_entry_is_promoted() {
        let cache = EngineCache::new();
        let engine = handle();
        cache.insert("echo_cpu", &engine, false);

        for _ in 0..4 {
            assert!(cache.get("echo_cpu").is_some());
        }
        assert_eq!(cache.stats().strong_refs, 1);

        // Still cached after the caller's handle goes away.
        drop(engine);
        assert!(cache.get("echo_cpu").is_some());
    }

    #[test]
    fn strong_tier_demotes_least_accessed_at_capacity() {
        let cache = EngineCache::with_limit(2);
        let a = handle();
        let b = handle();
        let c = handle();
        cache.insert("a", &a, true);
        cache.insert("b", &b, true);

        // Heat up "b" so "a" is the LRU candidate.
        for _ in 0..5 {
            cache.get("b");
        }

        cache.insert("c", &c, true);
        let stats = cache.stats();
        assert_eq!(stats.strong_refs, 2);
        // "a" was demoted but its Arc is still alive here, so it upgrades.
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn clear_removes_entries() {
        let cache = EngineCache::new();
        let engine = handle();
        cache.insert("echo_cpu", &engine, true);
        cache.clear(Some("echo_cpu"));
        assert!(cache.get("echo_cpu").is_none());
    }
}
