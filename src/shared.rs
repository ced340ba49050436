//! Shared (cross-process) cache tier.
//!
//! [`KeyValueStore`] is the raw client seam (Redis in production, see the
//! `redis` feature). [`RedisCache`] is a typed, namespaced view over it and
//! the present implementation of [`SharedTier`]; [`NoSharedTier`] is the
//! absent one. The choice is made once when a cache is built.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec;
use crate::error::{Error, Result};

/// Raw string key/value store shared between processes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value that expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Removes a value.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Typed shared tier used by [`crate::MultiLevelCache`].
#[async_trait]
pub trait SharedTier<V>: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str) -> Result<Option<V>>;

    /// Writes a value with a TTL.
    async fn set(&self, key: &str, value: &V, ttl: Duration) -> Result<()>;

    /// Removes a value.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Absent shared tier: every read misses, every write is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSharedTier;

#[async_trait]
impl<V> SharedTier<V> for NoSharedTier
where
    V: Send + Sync + 'static,
{
    async fn get(&self, _key: &str) -> Result<Option<V>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &V, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Namespaced, typed view over a [`KeyValueStore`].
///
/// Every key is stored as `{prefix}{key}` so separate cache domains never
/// collide in the shared store.
pub struct RedisCache<V> {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    _value: PhantomData<fn() -> V>,
}

impl<V> RedisCache<V> {
    /// Creates a view whose keys are prefixed with `prefix`.
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            _value: PhantomData,
        }
    }

    /// Key prefix of this domain.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

impl<V> std::fmt::Debug for RedisCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<V> SharedTier<V> for RedisCache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        match self.store.get(&self.namespaced(key)).await? {
            Some(raw) => codec::decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &V, ttl: Duration) -> Result<()> {
        let raw = codec::encode(value)?;
        self.store.set(&self.namespaced(key), raw, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(&self.namespaced(key)).await
    }
}

/// In-process [`KeyValueStore`] with TTL.
///
/// Clones share storage, so several caches built over clones of one instance
/// behave like processes sharing one Redis.
#[derive(Debug, Default, Clone)]
pub struct MemoryKeyValueStore {
    inner: Arc<MemoryKeyValueInner>,
}

#[derive(Debug, Default)]
struct MemoryKeyValueInner {
    // `None` expiry: the TTL overflowed `Instant` and the entry never expires.
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    unavailable: AtomicBool,
}

impl MemoryKeyValueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the store going down (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Raw stored string for a fully namespaced key, if live.
    pub fn raw(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let guard = self.inner.entries.lock().expect("poisoned lock");
        guard
            .get(key)
            .filter(|(_, expires_at)| expires_at.is_none_or(|at| at > now))
            .map(|(value, _)| value.clone())
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.unavailable.load(Ordering::Relaxed) {
            return Err(Error::CacheBackend(
                "memory key/value store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let now = Instant::now();
        let mut guard = self.inner.entries.lock().expect("poisoned lock");
        match guard.get(key) {
            Some((_, Some(expires_at))) if *expires_at <= now => {
                guard.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let mut guard = self.inner.entries.lock().expect("poisoned lock");
        guard.insert(key.to_string(), (value, Instant::now().checked_add(ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        let mut guard = self.inner.entries.lock().expect("poisoned lock");
        guard.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn redis_cache_should_namespace_keys() {
        let store = MemoryKeyValueStore::new();
        let roles: RedisCache<bool> = RedisCache::new(Arc::new(store.clone()), "app:roles:");
        let perms: RedisCache<bool> = RedisCache::new(Arc::new(store.clone()), "app:perms:");

        block_on(roles.set("u1", &true, Duration::from_secs(30))).unwrap();
        block_on(perms.set("u1", &false, Duration::from_secs(30))).unwrap();

        assert_eq!(store.raw("app:roles:u1").as_deref(), Some("true"));
        assert_eq!(store.raw("app:perms:u1").as_deref(), Some("false"));
        assert_eq!(block_on(roles.get("u1")).unwrap(), Some(true));
        assert_eq!(block_on(perms.get("u1")).unwrap(), Some(false));
    }

    #[test]
    fn redis_cache_should_surface_foreign_values_as_codec_errors() {
        let store = MemoryKeyValueStore::new();
        block_on(store.set("ns:k", "not json".to_string(), Duration::from_secs(30))).unwrap();
        let cache: RedisCache<bool> = RedisCache::new(Arc::new(store), "ns:");

        assert!(matches!(block_on(cache.get("k")), Err(Error::Codec(_))));
    }

    #[test]
    fn memory_store_should_expire_entries() {
        let store = MemoryKeyValueStore::new();
        block_on(store.set("k", "1".to_string(), Duration::from_millis(10))).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(block_on(store.get("k")).unwrap(), None);
    }

    #[test]
    fn oversized_ttl_should_not_panic() {
        let store = MemoryKeyValueStore::new();
        block_on(store.set("k", "1".to_string(), Duration::MAX)).unwrap();

        assert_eq!(block_on(store.get("k")).unwrap().as_deref(), Some("1"));
        assert_eq!(store.raw("k").as_deref(), Some("1"));
    }

    #[test]
    fn unavailable_store_should_report_backend_errors() {
        let store = MemoryKeyValueStore::new();
        store.set_unavailable(true);

        assert!(matches!(
            block_on(store.get("k")),
            Err(Error::CacheBackend(_))
        ));
    }

    #[test]
    fn no_shared_tier_should_always_miss() {
        let tier = NoSharedTier;
        block_on(SharedTier::<bool>::set(&tier, "k", &true, Duration::from_secs(1))).unwrap();
        assert_eq!(block_on(SharedTier::<bool>::get(&tier, "k")).unwrap(), None);
    }
}
