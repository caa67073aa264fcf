//! Two-tier cache for memory operations.
//!
//! A bounded in-process tier (moka, TTL + capacity) fronts embeddings so
//! the executor's inner loop never leaves the process for repeat text; a
//! shared KV tier behind the `SharedCache` port carries recall results
//! and circle context. The shared tier is optional: without it every
//! operation degrades to a miss and callers fall through to the source.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::models::config::CacheConfig;
use crate::domain::models::{Event, EventType, ScoredMemory};
use crate::domain::ports::SharedCache;
use crate::services::event_bus::{EventBus, EventHandler};

/// Combined stats over both tiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierStats {
    pub embedding_hits: u64,
    pub embedding_misses: u64,
    pub shared_hits: u64,
    pub shared_misses: u64,
}

/// Two-tier cache facade.
pub struct Cache {
    embeddings: moka::future::Cache<u64, Arc<Vec<f32>>>,
    shared: Option<Arc<dyn SharedCache>>,
    config: CacheConfig,
    embedding_hits: AtomicU64,
    embedding_misses: AtomicU64,
    shared_hits: AtomicU64,
    shared_misses: AtomicU64,
}

impl Cache {
    pub fn new(config: CacheConfig, shared: Option<Arc<dyn SharedCache>>) -> Self {
        let embeddings = moka::future::Cache::builder()
            .max_capacity(config.embedding_lru_capacity)
            .time_to_live(Duration::from_secs(config.embedding_ttl_seconds))
            .build();
        Self {
            embeddings,
            shared,
            config,
            embedding_hits: AtomicU64::new(0),
            embedding_misses: AtomicU64::new(0),
            shared_hits: AtomicU64::new(0),
            shared_misses: AtomicU64::new(0),
        }
    }

    /// Subscribe the invalidation wiring: new or shared memories clear
    /// the owning agent's cached recalls.
    pub async fn subscribe_invalidation(self: &Arc<Self>, bus: &EventBus) {
        let handler = Arc::new(InvalidationHandler { cache: self.clone() });
        bus.subscribe(EventType::MemoryCreated, handler.clone(), None).await;
        bus.subscribe(EventType::MemoryShared, handler, None).await;
    }

    // -- Embeddings (in-process tier, shared tier as L2) --

    pub async fn get_embedding(&self, text: &str) -> Option<Vec<f32>> {
        let key = text_key(text);
        if let Some(hit) = self.embeddings.get(&key).await {
            self.embedding_hits.fetch_add(1, Ordering::Relaxed);
            return Some(hit.as_ref().clone());
        }
        self.embedding_misses.fetch_add(1, Ordering::Relaxed);

        // L2 lookup; promote on hit.
        let shared_key = format!("embedding:{key:016x}");
        if let Some(value) = self.shared_get(&shared_key).await {
            if let Ok(vec) = serde_json::from_value::<Vec<f32>>(value) {
                self.embeddings.insert(key, Arc::new(vec.clone())).await;
                return Some(vec);
            }
        }
        None
    }

    pub async fn set_embedding(&self, text: &str, embedding: Vec<f32>) {
        let key = text_key(text);
        self.embeddings.insert(key, Arc::new(embedding.clone())).await;
        let shared_key = format!("embedding:{key:016x}");
        self.shared_set(
            &shared_key,
            serde_json::json!(embedding),
            Duration::from_secs(self.config.embedding_ttl_seconds),
        )
        .await;
    }

    // -- Recall results (shared tier only) --

    /// Deterministic key for an unfiltered recall.
    pub fn recall_key(agent_id: Uuid, query: &str, limit: usize, threshold: f32) -> String {
        format!(
            "recall:{agent_id}:{:016x}:{limit}:{}",
            text_key(query),
            (threshold * 1000.0) as u32
        )
    }

    pub async fn get_recall(&self, key: &str) -> Option<Vec<ScoredMemory>> {
        let value = self.shared_get(key).await?;
        serde_json::from_value(value).ok()
    }

    pub async fn set_recall(&self, key: &str, results: &[ScoredMemory]) {
        let Ok(value) = serde_json::to_value(results) else {
            return;
        };
        self.shared_set(key, value, Duration::from_secs(self.config.recall_ttl_seconds))
            .await;
    }

    /// Drop every cached recall for an agent.
    pub async fn invalidate_agent(&self, agent_id: Uuid) {
        if let Some(ref shared) = self.shared {
            shared.delete_prefix(&format!("recall:{agent_id}:")).await;
        }
    }

    // -- Circle context (shared tier only) --

    pub async fn get_circle_context(&self, circle_id: Uuid) -> Option<serde_json::Value> {
        self.shared_get(&format!("circle_ctx:{circle_id}")).await
    }

    pub async fn set_circle_context(&self, circle_id: Uuid, context: serde_json::Value) {
        self.shared_set(
            &format!("circle_ctx:{circle_id}"),
            context,
            Duration::from_secs(self.config.circle_context_ttl_seconds),
        )
        .await;
    }

    pub async fn invalidate_circle_context(&self, circle_id: Uuid) {
        if let Some(ref shared) = self.shared {
            shared.delete(&format!("circle_ctx:{circle_id}")).await;
        }
    }

    // -- Generic passthrough --

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.shared_get(key).await
    }

    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        self.shared_set(key, value, ttl).await;
    }

    pub async fn delete(&self, key: &str) {
        if let Some(ref shared) = self.shared {
            shared.delete(key).await;
        }
    }

    pub async fn delete_prefix(&self, prefix: &str) {
        if let Some(ref shared) = self.shared {
            shared.delete_prefix(prefix).await;
        }
    }

    pub async fn clear_all(&self) {
        self.embeddings.invalidate_all();
        if let Some(ref shared) = self.shared {
            shared.clear_all().await;
        }
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            embedding_hits: self.embedding_hits.load(Ordering::Relaxed),
            embedding_misses: self.embedding_misses.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            shared_misses: self.shared_misses.load(Ordering::Relaxed),
        }
    }

    async fn shared_get(&self, key: &str) -> Option<serde_json::Value> {
        let Some(ref shared) = self.shared else {
            self.shared_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        match shared.get(key).await {
            Some(value) => {
                self.shared_hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.shared_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn shared_set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        if let Some(ref shared) = self.shared {
            shared.set(key, value, ttl).await;
        }
    }
}

fn text_key(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

struct InvalidationHandler {
    cache: Arc<Cache>,
}

#[async_trait]
impl EventHandler for InvalidationHandler {
    async fn handle(&self, event: &Event) -> Result<(), String> {
        if let Some(agent_id) = event.source_agent_id {
            self.cache.invalidate_agent(agent_id).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::shared_cache::InMemorySharedCache;

    fn cache_with_shared() -> Arc<Cache> {
        Arc::new(Cache::new(
            CacheConfig::default(),
            Some(Arc::new(InMemorySharedCache::new())),
        ))
    }

    #[tokio::test]
    async fn test_embedding_round_trip() {
        let cache = cache_with_shared();
        assert!(cache.get_embedding("hello").await.is_none());

        cache.set_embedding("hello", vec![0.1, 0.2]).await;
        assert_eq!(cache.get_embedding("hello").await, Some(vec![0.1, 0.2]));

        let stats = cache.stats();
        assert_eq!(stats.embedding_hits, 1);
        assert_eq!(stats.embedding_misses, 1);
    }

    #[tokio::test]
    async fn test_degrades_to_miss_without_shared_tier() {
        let cache = Cache::new(CacheConfig::default(), None);
        assert!(cache.get("anything").await.is_none());
        cache
            .set("anything", serde_json::json!(1), Duration::from_secs(60))
            .await;
        assert!(cache.get("anything").await.is_none());

        // The in-process embedding tier still works.
        cache.set_embedding("text", vec![1.0]).await;
        assert_eq!(cache.get_embedding("text").await, Some(vec![1.0]));
    }

    #[tokio::test]
    async fn test_invalidate_agent_clears_only_their_recalls() {
        let cache = cache_with_shared();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let alice_key = Cache::recall_key(alice, "query", 5, 0.7);
        let bob_key = Cache::recall_key(bob, "query", 5, 0.7);
        cache.set_recall(&alice_key, &[]).await;
        cache.set_recall(&bob_key, &[]).await;

        cache.invalidate_agent(alice).await;
        assert!(cache.get_recall(&alice_key).await.is_none());
        assert!(cache.get_recall(&bob_key).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidation_wired_to_bus() {
        let cache = cache_with_shared();
        let bus = EventBus::new(100);
        cache.subscribe_invalidation(&bus).await;

        let agent = Uuid::new_v4();
        let key = Cache::recall_key(agent, "q", 5, 0.7);
        cache.set_recall(&key, &[]).await;

        bus.publish(Event::new(EventType::MemoryCreated, serde_json::json!({})).with_agent(agent))
            .await;
        assert!(cache.get_recall(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_circle_context_round_trip() {
        let cache = cache_with_shared();
        let circle = Uuid::new_v4();
        cache
            .set_circle_context(circle, serde_json::json!({"members": 3}))
            .await;
        assert_eq!(
            cache.get_circle_context(circle).await.unwrap()["members"],
            3
        );
        cache.invalidate_circle_context(circle).await;
        assert!(cache.get_circle_context(circle).await.is_none());
    }

    #[test]
    fn test_recall_key_stability() {
        let agent = Uuid::new_v4();
        assert_eq!(
            Cache::recall_key(agent, "same query", 5, 0.7),
            Cache::recall_key(agent, "same query", 5, 0.7)
        );
        assert_ne!(
            Cache::recall_key(agent, "same query", 5, 0.7),
            Cache::recall_key(agent, "other query", 5, 0.7)
        );
    }
}
