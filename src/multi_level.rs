use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Result;
use crate::memory_cache::MemoryCache;
use crate::shared::{NoSharedTier, SharedTier};
use crate::sync::{CacheSync, InvalidationHandler, NoSync};

/// Running hit/miss counters of a [`MultiLevelCache`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
}

impl CacheMetrics {
    /// Fraction of lookups served from a cache tier.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Memory tier in front of an optional shared tier, kept coherent through an
/// optional invalidation channel.
///
/// Reads check memory first and fall back to the shared tier, promoting hits
/// into memory. Shared-tier and channel failures are logged and degrade to
/// memory-only behavior; they never fail a read or a write.
pub struct MultiLevelCache<V> {
    memory: MemoryCache<String, V>,
    shared: Arc<dyn SharedTier<V>>,
    sync: Arc<dyn CacheSync>,
    channel: String,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> std::fmt::Debug for MultiLevelCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiLevelCache")
            .field("channel", &self.channel)
            .field("ttl", &self.ttl)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<V> MultiLevelCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a memory-only cache. `ttl` applies when `set` gets none.
    pub fn new(memory: MemoryCache<String, V>, ttl: Duration) -> Self {
        Self {
            memory,
            shared: Arc::new(NoSharedTier),
            sync: Arc::new(NoSync),
            channel: String::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Adds a shared tier.
    pub fn with_shared(mut self, shared: Arc<dyn SharedTier<V>>) -> Self {
        self.shared = shared;
        self
    }

    /// Attaches an invalidation channel and subscribes this cache's memory
    /// tier to it.
    ///
    /// A failed subscription is logged and the cache continues with TTL-only
    /// freshness for foreign writes.
    pub fn with_sync(mut self, sync: Arc<dyn CacheSync>, channel: impl Into<String>) -> Self {
        let channel = channel.into();
        let memory = self.memory.clone();
        let handler: InvalidationHandler = Arc::new(move |key: &str| {
            if memory.delete(&key.to_string()) {
                tracing::debug!(key = %key, "evicted on peer invalidation");
            }
        });
        if let Err(e) = sync.subscribe_invalidation(&channel, handler) {
            tracing::warn!(
                channel = %channel,
                error = %e,
                "invalidation subscribe failed; relying on TTL"
            );
        }
        self.sync = sync;
        self.channel = channel;
        self
    }

    /// Default TTL of this cache.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Snapshot of hit/miss counters.
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Looks a key up in memory, then in the shared tier.
    pub async fn get(&self, key: &str) -> Option<V> {
        let owned = key.to_string();
        if let Some(value) = self.memory.get(&owned) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "cache hit (memory)");
            return Some(value);
        }

        match self.shared.get(key).await {
            Ok(Some(value)) => {
                self.memory.set(owned, value.clone(), Some(self.ttl));
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "cache hit (shared)");
                Some(value)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "cache miss");
                None
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "shared cache read failed");
                None
            }
        }
    }

    /// Reads the memory tier only, without counting a hit or miss.
    pub fn peek_local(&self, key: &str) -> Option<V> {
        self.memory.get(&key.to_string())
    }

    /// Reads memory, then the shared tier, without counting a hit or miss
    /// and without promoting shared values into memory.
    pub async fn peek(&self, key: &str) -> Option<V> {
        if let Some(value) = self.peek_local(key) {
            return Some(value);
        }
        match self.shared.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "shared cache peek failed");
                None
            }
        }
    }

    /// Writes all tiers and tells peers to drop their copy.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.ttl);
        self.memory.set(key.to_string(), value.clone(), Some(ttl));
        if let Err(e) = self.shared.set(key, &value, ttl).await {
            tracing::warn!(key = %key, error = %e, "shared cache write failed");
        }
        self.broadcast(key).await;
    }

    /// Removes a key from all tiers and tells peers to drop their copy.
    pub async fn delete(&self, key: &str) {
        self.memory.delete(&key.to_string());
        if let Err(e) = self.shared.delete(key).await {
            tracing::warn!(key = %key, error = %e, "shared cache delete failed");
        }
        self.broadcast(key).await;
    }

    /// Deletes every key resident in this process's memory tier that matches
    /// `predicate`. Keys only present in the shared tier are left to peer
    /// invalidation or their TTL. Returns the number of deleted keys.
    pub async fn delete_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&str) -> bool,
    {
        let matching: Vec<String> = self
            .memory
            .keys()
            .into_iter()
            .filter(|key| predicate(key))
            .collect();
        for key in &matching {
            self.delete(key).await;
        }
        matching.len()
    }

    /// Returns the cached value or computes, stores and returns it.
    ///
    /// Concurrent misses on one key may each run `fetcher`; fetchers must be
    /// idempotent. Fetch errors are returned and nothing is stored.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<Duration>,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = fetcher().await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    async fn broadcast(&self, key: &str) {
        if let Err(e) = self.sync.broadcast_invalidation(&self.channel, key).await {
            tracing::warn!(key = %key, error = %e, "invalidation broadcast failed");
        }
    }
}
