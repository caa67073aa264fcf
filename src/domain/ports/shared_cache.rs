//! Shared cache port.
//!
//! The second tier of the cache layer: a process-external KV with TTLs.
//! Absence is normal; callers treat every miss (including degradation to
//! "no cache at all") as a cache miss and fall through to the source.

use async_trait::async_trait;
use std::time::Duration;

/// Hit/miss counters for a cache tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
}

/// Generic async KV with TTL semantics. Values are JSON so callers stay
/// schema-free at this boundary.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// None on miss, expiry, or backend unavailability.
    async fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Best effort; failures are swallowed and surface as later misses.
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration);

    async fn delete(&self, key: &str);

    /// Delete every key with the given prefix.
    async fn delete_prefix(&self, prefix: &str);

    async fn clear_all(&self);

    async fn stats(&self) -> CacheStats;
}
