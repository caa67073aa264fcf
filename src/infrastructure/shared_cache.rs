//! In-memory implementation of the shared cache port.
//!
//! Stands in for a process-external KV in single-node deployments and in
//! tests. Expiry is lazy: entries past their deadline are dropped on
//! read and swept opportunistically on write.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::ports::shared_cache::{CacheStats, SharedCache};

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// HashMap-backed shared cache with TTL semantics.
#[derive(Default)]
pub struct InMemorySharedCache {
    entries: Mutex<HashMap<String, Entry>>,
    stats: Mutex<CacheStats>,
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().await;
        let mut stats = self.stats.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                stats.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                stats.evictions += 1;
                stats.misses += 1;
                None
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        // Opportunistic sweep keeps the map from accumulating corpses.
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        self.stats.lock().await.sets += 1;
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    async fn delete_prefix(&self, prefix: &str) {
        self.entries
            .lock()
            .await
            .retain(|k, _| !k.starts_with(prefix));
    }

    async fn clear_all(&self) {
        self.entries.lock().await.clear();
    }

    async fn stats(&self) -> CacheStats {
        *self.stats.lock().await
    }
}
