use matrag_cache::{cache_key, CacheStats, RetrievalCache};
use matrag_core::{Material, RagConfig, Retriever, RetrievalOptions, RetrievalResult, StoreStats, VectorStore};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub stores: HashMap<String, StoreStats>,
    pub cache: CacheStatsView,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStatsView {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub size: u64,
    pub hit_rate: f64,
}

impl From<CacheStats> for CacheStatsView {
    fn from(s: CacheStats) -> Self {
        Self {
            hits: s.hits,
            misses: s.misses,
            sets: s.sets,
            invalidations: s.invalidations,
            size: s.size,
            hit_rate: s.hit_rate(),
        }
    }
}

/// Executes a retrieval query against a pool of vector stores with
/// caching, bounded concurrency and deterministic result assembly.
pub struct DistributedRetriever {
    stores: Vec<Arc<dyn VectorStore>>,
    cache: RetrievalCache,
    semaphore: Arc<Semaphore>,
    stats: Mutex<HashMap<String, StoreStats>>,
    config: RagConfig,
}

impl DistributedRetriever {
    pub fn new(stores: Vec<Arc<dyn VectorStore>>, config: RagConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        let stats = stores
            .iter()
            .map(|s| (s.store_id().to_string(), StoreStats::default()))
            .collect();
        Self {
            stores,
            cache: RetrievalCache::new(),
            semaphore,
            stats: Mutex::new(stats),
            config,
        }
    }

    pub async fn retrieve(&self, query: &str, options: &RetrievalOptions) -> matrag_core::Result<RetrievalResult> {
        let key = cache_key(query, options);
        if self.config.cache_enabled {
            if let Some(hit) = self.cache.get(&key) {
                debug!(query, "distributed retriever cache hit");
                return Ok(hit);
            }
        }

        let strategy = options.strategy.as_deref().unwrap_or("load_balanced");
        let started = Instant::now();
        let mut result = match strategy {
            "parallel" => self.retrieve_parallel(query, options).await?,
            _ => self.retrieve_load_balanced(query, options).await?,
        };

        let retrieval_time_ms = started.elapsed().as_millis() as u64;
        result
            .metadata
            .insert("retrieval_time".to_string(), json!(retrieval_time_ms));
        result
            .metadata
            .insert("stores_used".to_string(), json!(self.stores.len()));

        if self.config.cache_enabled {
            self.cache.set(key, result.clone(), self.config.cache_ttl_seconds);
        }
        Ok(result)
    }

    async fn call_store(
        &self,
        store: &Arc<dyn VectorStore>,
        query: &str,
        options: &RetrievalOptions,
    ) -> (RetrievalResult, Option<String>, u64) {
        let _permit = self.semaphore.acquire().await.expect("semaphore closed");
        let deadline = Duration::from_secs(self.config.timeout_seconds.max(1));
        let started = Instant::now();
        let outcome = tokio::time::timeout(deadline, store.retrieve(query, options)).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(result)) => (result, None, latency_ms),
            Ok(Err(e)) => {
                warn!(store = store.store_id(), error = %e, "store retrieval failed");
                (RetrievalResult::default(), Some(e.to_string()), latency_ms)
            }
            Err(_) => {
                warn!(store = store.store_id(), "store retrieval timed out");
                (
                    RetrievalResult::default(),
                    Some("Timeout".to_string()),
                    self.config.timeout_seconds * 1000,
                )
            }
        }
    }

    async fn record_stats(&self, store_id: &str, latency_ms: u64) {
        let mut stats = self.stats.lock().await;
        stats.entry(store_id.to_string()).or_default().record(latency_ms);
    }

    /// Issues to every store concurrently; combines, dedups by material id
    /// (keeping the higher score), sorts descending. `metadata.stores`
    /// preserves input `vector_stores` order regardless of completion order.
    async fn retrieve_parallel(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> matrag_core::Result<RetrievalResult> {
        let calls = self
            .stores
            .iter()
            .map(|store| self.call_store(store, query, options));
        let outcomes = futures::future::join_all(calls).await;

        let mut by_id: HashMap<String, Material> = HashMap::new();
        let mut store_meta = Vec::with_capacity(self.stores.len());

        for (store, (result, error, latency_ms)) in self.stores.iter().zip(outcomes.into_iter()) {
            self.record_stats(store.store_id(), latency_ms).await;
            store_meta.push(json!({
                "store_id": store.store_id(),
                "latency": latency_ms,
                "error": error,
                "results": result.materials.len(),
            }));
            for mut material in result.materials {
                material.store_id = Some(store.store_id().to_string());
                match by_id.get(&material.id) {
                    Some(existing) if existing.score >= material.score => {}
                    _ => {
                        by_id.insert(material.id.clone(), material);
                    }
                }
            }
        }

        let mut materials: Vec<Material> = by_id.into_values().collect();
        materials.sort_by(|a, b| b.final_score().partial_cmp(&a.final_score()).unwrap());

        let mut metadata = serde_json::Map::new();
        metadata.insert("strategy".to_string(), json!("parallel"));
        metadata.insert("stores".to_string(), json!(store_meta));
        Ok(RetrievalResult { materials, metadata })
    }

    /// Picks a single store minimizing `avg_latency * (queries + 1)`; all
    /// stores tied at zero (cold start) fall back to the stable lowest
    /// index, i.e. round-robin-equivalent determinism on first call.
    async fn retrieve_load_balanced(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> matrag_core::Result<RetrievalResult> {
        if self.stores.is_empty() {
            return Ok(RetrievalResult::default());
        }
        let stats = self.stats.lock().await;
        let mut best_idx = 0usize;
        let mut best_score = f64::INFINITY;
        for (idx, store) in self.stores.iter().enumerate() {
            let score = stats
                .get(store.store_id())
                .map(|s| s.load_score())
                .unwrap_or(0.0);
            if score < best_score {
                best_score = score;
                best_idx = idx;
            }
        }
        drop(stats);

        let store = &self.stores[best_idx];
        let (mut result, error, latency_ms) = self.call_store(store, query, options).await;
        self.record_stats(store.store_id(), latency_ms).await;

        for material in &mut result.materials {
            material.store_id = Some(store.store_id().to_string());
        }
        result
            .materials
            .sort_by(|a, b| b.final_score().partial_cmp(&a.final_score()).unwrap());

        result.metadata.insert("strategy".to_string(), json!("load_balanced"));
        result
            .metadata
            .insert("store_id".to_string(), json!(store.store_id()));
        result.metadata.insert("latency".to_string(), json!(latency_ms));
        if let Some(err) = error {
            result.metadata.insert("error".to_string(), json!(err));
        }
        Ok(result)
    }

    pub fn invalidate_cache(&self, pattern: Option<&str>) -> u64 {
        self.cache.invalidate(pattern)
    }

    pub async fn get_stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            stores: self.stats.lock().await.clone(),
            cache: self.cache.stats().into(),
        }
    }
}

#[async_trait::async_trait]
impl Retriever for DistributedRetriever {
    async fn retrieve(&self, query: &str, options: &RetrievalOptions) -> matrag_core::Result<RetrievalResult> {
        DistributedRetriever::retrieve(self, query, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeStore {
        id: String,
        delay_ms: u64,
        materials: Vec<Material>,
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl VectorStore for FakeStore {
        fn store_id(&self) -> &str {
            &self.id
        }
        async fn retrieve(&self, _query: &str, _options: &RetrievalOptions) -> matrag_core::Result<RetrievalResult> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            Ok(RetrievalResult {
                materials: self.materials.clone(),
                metadata: Default::default(),
            })
        }
    }

    fn material(id: &str, score: f64) -> Material {
        Material {
            id: id.to_string(),
            score,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn cache_hit_on_second_call_is_faster_and_equal() {
        let store1 = Arc::new(FakeStore {
            id: "s1".into(),
            delay_ms: 5,
            materials: vec![material("oak1", 0.9)],
            calls: Arc::new(AtomicU64::new(0)),
        });
        let store2 = Arc::new(FakeStore {
            id: "s2".into(),
            delay_ms: 5,
            materials: vec![material("oak2", 0.8)],
            calls: Arc::new(AtomicU64::new(0)),
        });
        let mut config = RagConfig::default();
        config.cache_ttl_seconds = 60;
        let retriever = DistributedRetriever::new(vec![store1, store2], config);
        let options = RetrievalOptions {
            strategy: Some("parallel".into()),
            ..Default::default()
        };
        let first = retriever.retrieve("oak flooring", &options).await.unwrap();
        assert_eq!(retriever.get_stats().await.stores.len(), 2);
        let second = retriever.retrieve("oak flooring", &options).await.unwrap();
        assert_eq!(first.materials.len(), second.materials.len());
        let stats = retriever.get_stats().await;
        assert_eq!(stats.cache.hits, 1);
    }

    #[tokio::test]
    async fn parallel_dedups_keeping_higher_score_and_sorts_descending() {
        let store1 = Arc::new(FakeStore {
            id: "s1".into(),
            delay_ms: 0,
            materials: vec![material("x", 0.4), material("y", 0.2)],
            calls: Arc::new(AtomicU64::new(0)),
        });
        let store2 = Arc::new(FakeStore {
            id: "s2".into(),
            delay_ms: 0,
            materials: vec![material("x", 0.9)],
            calls: Arc::new(AtomicU64::new(0)),
        });
        let config = RagConfig::default();
        let retriever = DistributedRetriever::new(vec![store1, store2], config);
        let options = RetrievalOptions {
            strategy: Some("parallel".into()),
            ..Default::default()
        };
        let result = retriever.retrieve("q", &options).await.unwrap();
        assert!(result.is_well_formed());
        assert_eq!(result.materials[0].id, "x");
        assert_eq!(result.materials[0].score, 0.9);
    }

    #[tokio::test]
    async fn store_timeout_is_absorbed_and_reported_per_store() {
        let fast = Arc::new(FakeStore {
            id: "s1".into(),
            delay_ms: 10,
            materials: vec![material("a", 0.5)],
            calls: Arc::new(AtomicU64::new(0)),
        });
        let slow = Arc::new(FakeStore {
            id: "s2".into(),
            delay_ms: 2000,
            materials: vec![material("b", 0.9)],
            calls: Arc::new(AtomicU64::new(0)),
        });
        let mut config = RagConfig::default();
        config.timeout_seconds = 1;
        let retriever = DistributedRetriever::new(vec![fast, slow], config);
        let options = RetrievalOptions {
            strategy: Some("parallel".into()),
            ..Default::default()
        };
        let result = retriever.retrieve("q", &options).await.unwrap();
        assert_eq!(result.materials.len(), 1);
        assert_eq!(result.materials[0].id, "a");
        let stores = result.metadata.get("stores").unwrap().as_array().unwrap();
        assert_eq!(stores[1]["error"], json!("Timeout"));
    }

    #[tokio::test]
    async fn invalidate_then_stats_reports_zero_size() {
        let store = Arc::new(FakeStore {
            id: "s1".into(),
            delay_ms: 0,
            materials: vec![material("a", 0.5)],
            calls: Arc::new(AtomicU64::new(0)),
        });
        let config = RagConfig::default();
        let retriever = DistributedRetriever::new(vec![store], config);
        let options = RetrievalOptions::default();
        retriever.retrieve("q", &options).await.unwrap();
        let removed = retriever.invalidate_cache(None);
        assert_eq!(removed, 1);
        assert_eq!(retriever.get_stats().await.cache.size, 0);
    }
}
