use chrono::{DateTime, Utc};
use dashmap::DashMap;
use matrag_core::RetrievalResult;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Canonicalizes `query` + `options` into a stable cache key, excluding
/// user-scoped fields (`user_id`) by contract.
pub fn cache_key<T: Serialize>(query: &str, options: &T) -> String {
    let mut value = serde_json::to_value(options).unwrap_or(serde_json::Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.remove("user_id");
    }
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(value.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

struct Entry {
    value: RetrievalResult,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub size: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
}

/// Process-local, task-safe TTL cache of `RetrievalResult`s. A read that
/// hits never triggers a backend call; writes happen strictly after a
/// successful retrieval.
pub struct RetrievalCache {
    entries: DashMap<String, Entry>,
    counters: Counters,
}

impl RetrievalCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<RetrievalResult> {
        let now = Utc::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                // Expired: drop it lazily and count as a miss.
                drop(self.entries.remove(key));
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: String, value: RetrievalResult, ttl_seconds: u64) {
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl_seconds.max(1) as i64);
        self.entries.insert(key, Entry { value, expires_at });
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Clears everything when `pattern` is `None`; otherwise clears keys
    /// containing the given substring. Returns the number of entries
    /// removed.
    pub fn invalidate(&self, pattern: Option<&str>) -> u64 {
        let before = self.entries.len();
        match pattern {
            None => self.entries.clear(),
            Some(p) => {
                self.entries.retain(|k, _| !k.contains(p));
            }
        }
        let removed = (before - self.entries.len()) as u64;
        self.counters
            .invalidations
            .fetch_add(removed, Ordering::Relaxed);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            size: self.entries.len() as u64,
        }
    }
}

impl Default for RetrievalCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrag_core::Material;

    fn sample() -> RetrievalResult {
        RetrievalResult {
            materials: vec![Material {
                id: "m1".into(),
                score: 0.5,
                ..Default::default()
            }],
            metadata: Default::default(),
        }
    }

    #[test]
    fn cache_key_excludes_user_id() {
        let with_user = serde_json::json!({"user_id": "u1", "strategy": "parallel"});
        let without_user = serde_json::json!({"strategy": "parallel"});
        assert_eq!(
            cache_key("q", &with_user),
            cache_key("q", &without_user)
        );
    }

    #[test]
    fn miss_then_hit_then_expiry() {
        let cache = RetrievalCache::new();
        assert!(cache.get("k").is_none());
        cache.set("k".to_string(), sample(), 60);
        assert!(cache.get("k").is_some());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn expired_entry_returns_none_and_does_not_underflow_size() {
        let cache = RetrievalCache::new();
        cache.set("k".to_string(), sample(), 0);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn invalidate_with_pattern_only_clears_matching_keys() {
        let cache = RetrievalCache::new();
        cache.set("oak_flooring".to_string(), sample(), 60);
        cache.set("tile_wall".to_string(), sample(), 60);
        let removed = cache.invalidate(Some("oak"));
        assert_eq!(removed, 1);
        assert_eq!(cache.stats().size, 1);
    }

    #[test]
    fn invalidate_all_reports_prior_size() {
        let cache = RetrievalCache::new();
        cache.set("a".to_string(), sample(), 60);
        cache.set("b".to_string(), sample(), 60);
        let removed = cache.invalidate(None);
        assert_eq!(removed, 2);
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.stats().invalidations, 2);
    }
}
