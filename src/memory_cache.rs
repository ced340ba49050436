use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Process-local key/value cache with TTL and an LRU capacity bound.
///
/// Expired entries are treated as absent on read and dropped lazily; there is
/// no background sweep. Clones share the same storage.
#[derive(Debug)]
pub struct MemoryCache<K, V> {
    inner: Arc<Mutex<CacheState<K, V>>>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl<K, V> Clone for MemoryCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
            ttl: self.ttl,
        }
    }
}

#[derive(Debug)]
struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    order: VecDeque<K>,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a new cache with the given capacity.
    ///
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            })),
            capacity,
            ttl: None,
        }
    }

    /// Configures the default time-to-live used when `set` gets no TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Default time-to-live, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Returns a live entry, dropping it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        if self.capacity == 0 {
            return None;
        }

        let now = Instant::now();
        let mut guard = self.inner.lock().expect("poisoned lock");

        let expired = guard.entries.get(key)?.is_expired(now);
        if expired {
            Self::remove_key(&mut guard, key);
            return None;
        }

        let value = guard.entries.get(key).map(|entry| entry.value.clone());
        Self::touch(&mut guard, key);
        value
    }

    /// Stores a value. `ttl` overrides the default TTL for this entry.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        if self.capacity == 0 {
            return;
        }

        let now = Instant::now();
        let expires_at = self.expiry(now, ttl);
        let mut guard = self.inner.lock().expect("poisoned lock");

        Self::prune_expired(&mut guard, now);
        guard
            .entries
            .insert(key.clone(), CacheEntry { value, expires_at });
        Self::touch(&mut guard, &key);
        Self::evict_if_needed(&mut guard, self.capacity);
    }

    /// Replaces an entry with `update(current)` under one lock and restarts
    /// its TTL. Expired entries are passed as `None`.
    pub fn upsert<F>(&self, key: K, ttl: Option<Duration>, update: F)
    where
        F: FnOnce(Option<V>) -> V,
    {
        if self.capacity == 0 {
            return;
        }

        let now = Instant::now();
        let expires_at = self.expiry(now, ttl);
        let mut guard = self.inner.lock().expect("poisoned lock");

        Self::prune_expired(&mut guard, now);
        let current = guard.entries.remove(&key).map(|entry| entry.value);
        let value = update(current);
        guard
            .entries
            .insert(key.clone(), CacheEntry { value, expires_at });
        Self::touch(&mut guard, &key);
        Self::evict_if_needed(&mut guard, self.capacity);
    }

    /// Removes an entry and returns it if it was still live.
    pub fn take(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.inner.lock().expect("poisoned lock");
        let entry = guard.entries.remove(key)?;
        guard.order.retain(|existing| existing != key);
        (!entry.is_expired(now)).then_some(entry.value)
    }

    /// Removes an entry. Returns whether it was present.
    pub fn delete(&self, key: &K) -> bool {
        let mut guard = self.inner.lock().expect("poisoned lock");
        Self::remove_key(&mut guard, key)
    }

    /// Snapshot of the keys currently held, expired ones included.
    pub fn keys(&self) -> Vec<K> {
        let guard = self.inner.lock().expect("poisoned lock");
        guard.entries.keys().cloned().collect()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("poisoned lock").entries.len()
    }

    /// Returns whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A TTL too large to represent as an instant never expires.
    fn expiry(&self, now: Instant, ttl: Option<Duration>) -> Option<Instant> {
        ttl.or(self.ttl).and_then(|ttl| now.checked_add(ttl))
    }

    fn remove_key(state: &mut CacheState<K, V>, key: &K) -> bool {
        if state.entries.remove(key).is_some() {
            state.order.retain(|existing| existing != key);
            return true;
        }
        false
    }

    fn touch(state: &mut CacheState<K, V>, key: &K) {
        state.order.retain(|existing| existing != key);
        state.order.push_back(key.clone());
    }

    fn prune_expired(state: &mut CacheState<K, V>, now: Instant) {
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let entries = &state.entries;
        state.order.retain(|key| entries.contains_key(key));
    }

    fn evict_if_needed(state: &mut CacheState<K, V>, capacity: usize) {
        while state.entries.len() > capacity {
            if let Some(key) = state.order.pop_front() {
                state.entries.remove(&key);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_should_evict_least_recently_used() {
        let cache: MemoryCache<String, u32> = MemoryCache::new(2);

        cache.set("a".to_string(), 1, None);
        cache.set("b".to_string(), 2, None);
        let _ = cache.get(&"a".to_string());
        cache.set("c".to_string(), 3, None);

        assert!(cache.get(&"b".to_string()).is_none());
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"c".to_string()), Some(3));
    }

    #[test]
    fn ttl_should_expire_entries() {
        let cache: MemoryCache<String, bool> =
            MemoryCache::new(4).with_ttl(Duration::from_millis(10));

        cache.set("k".to_string(), true, None);
        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get(&"k".to_string()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn per_entry_ttl_should_override_default() {
        let cache: MemoryCache<String, bool> =
            MemoryCache::new(4).with_ttl(Duration::from_secs(60));

        cache.set("short".to_string(), true, Some(Duration::from_millis(10)));
        cache.set("long".to_string(), true, None);
        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get(&"short".to_string()).is_none());
        assert_eq!(cache.get(&"long".to_string()), Some(true));
    }

    #[test]
    fn delete_should_remove_entry_and_clones_should_share_state() {
        let cache: MemoryCache<String, u32> = MemoryCache::new(4);
        let view = cache.clone();

        cache.set("k".to_string(), 7, None);
        assert_eq!(view.get(&"k".to_string()), Some(7));

        assert!(view.delete(&"k".to_string()));
        assert!(cache.get(&"k".to_string()).is_none());
        assert!(!cache.delete(&"k".to_string()));
    }

    #[test]
    fn oversized_ttl_should_mean_no_expiry() {
        let cache: MemoryCache<String, u32> = MemoryCache::new(4).with_ttl(Duration::MAX);

        cache.set("k".to_string(), 1, None);
        cache.set("j".to_string(), 2, Some(Duration::from_millis(u64::MAX)));

        assert_eq!(cache.get(&"k".to_string()), Some(1));
        assert_eq!(cache.get(&"j".to_string()), Some(2));
    }

    #[test]
    fn upsert_should_merge_into_live_entry_only() {
        let cache: MemoryCache<String, Vec<u32>> = MemoryCache::new(4);

        cache.upsert("k".to_string(), None, |current| {
            let mut items = current.unwrap_or_default();
            items.push(1);
            items
        });
        cache.upsert("k".to_string(), None, |current| {
            let mut items = current.unwrap_or_default();
            items.push(2);
            items
        });
        assert_eq!(cache.get(&"k".to_string()), Some(vec![1, 2]));

        cache.set("short".to_string(), vec![9], Some(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(20));
        cache.upsert("short".to_string(), None, |current| {
            assert!(current.is_none());
            vec![3]
        });
        assert_eq!(cache.get(&"short".to_string()), Some(vec![3]));
    }

    #[test]
    fn take_should_remove_and_skip_expired_values() {
        let cache: MemoryCache<String, u32> = MemoryCache::new(4);
        cache.set("k".to_string(), 1, None);
        cache.set("old".to_string(), 2, Some(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.take(&"k".to_string()), Some(1));
        assert_eq!(cache.take(&"k".to_string()), None);
        assert_eq!(cache.take(&"old".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_should_disable_caching() {
        let cache: MemoryCache<String, u32> = MemoryCache::new(0);
        cache.set("k".to_string(), 1, None);
        assert!(cache.get(&"k".to_string()).is_none());
        assert!(cache.keys().is_empty());
    }
}
