use serde::Deserialize;
use std::time::Duration;

/// Cache tuning shared by the three permission cache domains.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime in every tier, in milliseconds. Bounds worst-case
    /// staleness when an invalidation is lost.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Maximum number of entries per memory tier.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// Prefix for shared-store keys and pub/sub channels.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Maximum resource ancestry walked before giving up.
    #[serde(default = "default_max_depth")]
    pub max_resource_depth: usize,

    /// Maximum role parent chain length.
    #[serde(default = "default_max_depth")]
    pub max_role_depth: usize,
}

fn default_ttl_ms() -> u64 {
    30_000
}

fn default_memory_capacity() -> usize {
    10_000
}

fn default_namespace() -> String {
    "rs_permit".to_string()
}

fn default_max_depth() -> usize {
    16
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            memory_capacity: default_memory_capacity(),
            namespace: default_namespace(),
            max_resource_depth: default_max_depth(),
            max_role_depth: default_max_depth(),
        }
    }
}

impl CacheConfig {
    /// Entry lifetime as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Sets the entry lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Shared-store key prefix for one cache domain.
    pub fn key_prefix(&self, domain: &str) -> String {
        format!("{}:{domain}:", self.namespace)
    }

    /// Pub/sub channel for one cache domain.
    pub fn channel(&self, domain: &str) -> String {
        format!("{}:invalidate:{domain}", self.namespace)
    }
}

/// Redis connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis. Without it caching is process-local.
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g. "redis://localhost:6379").
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    16
}

fn default_redis_timeout_ms() -> u64 {
    2_000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}
