//! Redis-backed shared store and invalidation channel.
//!
//! [`connect`] builds both from a [`RedisConfig`] and degrades to the absent
//! implementations when Redis is disabled or unreachable, so permission
//! checks keep working on memory-only caches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::config::RedisConfig;
use crate::error::{Error, Result};
use crate::shared::KeyValueStore;
use crate::sync::{CacheSync, InvalidationHandler, InvalidationMessage, NoSync};

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Shared backends chosen at startup.
pub struct Backends {
    /// Shared key/value store, if Redis is reachable.
    pub store: Option<Arc<dyn KeyValueStore>>,
    /// Invalidation channel; [`NoSync`] without Redis.
    pub sync: Arc<dyn CacheSync>,
}

/// Connects to Redis, falling back to memory-only caching on any failure.
pub async fn connect(config: &RedisConfig) -> Backends {
    let memory_only = || Backends {
        store: None,
        sync: Arc::new(NoSync),
    };

    if !config.enabled {
        tracing::info!("Redis disabled, using memory-only permission caches");
        return memory_only();
    }

    tracing::info!(url = %config.url, "connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
    pool_config.max_size = config.pool_size;
    let timeout = Some(Duration::from_millis(config.timeout_ms));
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;
    pool_config.timeouts.recycle = timeout;

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "failed to create Redis pool; falling back to memory-only caches"
            );
            return memory_only();
        }
    };

    if let Err(e) = pool.get().await {
        tracing::warn!(error = %e, "Redis unreachable; falling back to memory-only caches");
        return memory_only();
    }

    tracing::info!("connected to Redis");
    Backends {
        store: Some(Arc::new(RedisStore::new(pool.clone()))),
        sync: Arc::new(RedisSync::new(pool, config.url.clone())),
    }
}

/// [`KeyValueStore`] over a Redis connection pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Wraps an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::CacheBackend(format!("failed to get Redis connection: {e}")))
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| Error::CacheBackend(format!("Redis GET failed: {e}")))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        conn.pset_ex::<_, _, ()>(key, value, ttl_ms)
            .await
            .map_err(|e| Error::CacheBackend(format!("Redis SET failed: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| Error::CacheBackend(format!("Redis DEL failed: {e}")))
    }
}

/// [`CacheSync`] over Redis pub/sub.
///
/// Each channel gets one listener task with its own pub/sub connection that
/// reconnects with exponential backoff. Messages published while a listener
/// is reconnecting are lost; entry TTLs cover that gap.
pub struct RedisSync {
    pool: Pool,
    url: String,
    origin: String,
    handlers: Arc<Mutex<HashMap<String, Vec<InvalidationHandler>>>>,
}

impl RedisSync {
    /// Creates an endpoint with a fresh origin id.
    pub fn new(pool: Pool, url: String) -> Self {
        Self {
            pool,
            url,
            origin: uuid::Uuid::new_v4().to_string(),
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn spawn_listener(&self, channel: String) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::CacheBackend(format!("no tokio runtime for invalidation listener: {e}"))
        })?;
        let url = self.url.clone();
        let origin = self.origin.clone();
        let handlers = Arc::clone(&self.handlers);
        runtime.spawn(async move {
            let mut backoff = Duration::from_secs(1);
            loop {
                match listen(&url, &channel, &origin, &handlers).await {
                    Ok(()) => backoff = Duration::from_secs(1),
                    Err(e) => {
                        tracing::error!(
                            channel = %channel,
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "invalidation listener failed, reconnecting"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        });
        Ok(())
    }
}

async fn listen(
    url: &str,
    channel: &str,
    origin: &str,
    handlers: &Mutex<HashMap<String, Vec<InvalidationHandler>>>,
) -> Result<()> {
    use futures_util::StreamExt;

    let client = redis::Client::open(url)
        .map_err(|e| Error::CacheBackend(format!("failed to create Redis client: {e}")))?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| Error::CacheBackend(format!("failed to open pub/sub connection: {e}")))?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| Error::CacheBackend(format!("failed to subscribe: {e}")))?;
    tracing::info!(channel = %channel, "subscribed to invalidation channel");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let Ok(payload) = msg.get_payload::<String>() else {
            tracing::warn!(channel = %channel, "unreadable invalidation payload");
            continue;
        };
        let message = match InvalidationMessage::decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "malformed invalidation message");
                continue;
            }
        };
        if message.origin == origin {
            continue;
        }
        let subscribers = {
            let guard = handlers.lock().expect("poisoned lock");
            guard.get(channel).cloned().unwrap_or_default()
        };
        for handler in subscribers {
            handler(&message.key);
        }
    }
    Err(Error::CacheBackend("pub/sub connection closed".to_string()))
}

#[async_trait]
impl CacheSync for RedisSync {
    fn origin(&self) -> &str {
        &self.origin
    }

    async fn broadcast_invalidation(&self, channel: &str, key: &str) -> Result<()> {
        let payload = InvalidationMessage {
            origin: self.origin.clone(),
            key: key.to_string(),
        }
        .encode()?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| Error::CacheBackend(format!("failed to get Redis connection: {e}")))?;
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| Error::CacheBackend(format!("Redis PUBLISH failed: {e}")))?;
        tracing::debug!(channel = %channel, key = %key, "published invalidation");
        Ok(())
    }

    fn subscribe_invalidation(&self, channel: &str, handler: InvalidationHandler) -> Result<()> {
        let first = {
            let mut guard = self.handlers.lock().expect("poisoned lock");
            let entry = guard.entry(channel.to_string()).or_default();
            entry.push(handler);
            entry.len() == 1
        };
        if first {
            self.spawn_listener(channel.to_string())?;
        }
        Ok(())
    }
}
