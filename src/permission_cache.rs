//! The three permission cache domains and their bulk invalidation hooks.
//!
//! Key shapes (identifiers never contain `:`):
//!
//! | domain                 | key                                  |
//! |------------------------|--------------------------------------|
//! | `user_roles`           | `{user}`                             |
//! | `user_permissions`     | `{user}:{permission}:{type}:{id}`    |
//! | `resource_permissions` | `{user}:{type}:{id}`                 |
//!
//! Global checks use empty resource segments (`u1:VIEW::`), so every key of
//! a user starts with `{user}:` and every resource-scoped key ends with
//! `:{type}:{id}`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::CacheConfig;
use crate::memory_cache::MemoryCache;
use crate::model::Role;
use crate::multi_level::MultiLevelCache;
use crate::permission::Permission;
use crate::resolver::Resolution;
use crate::shared::{KeyValueStore, RedisCache};
use crate::sync::{CacheSync, NoSync};
use crate::types::{ResourceRef, UserId};

pub(crate) const USER_ROLES: &str = "user_roles";
pub(crate) const USER_PERMISSIONS: &str = "user_permissions";
pub(crate) const RESOURCE_PERMISSIONS: &str = "resource_permissions";

/// Builds the `user_permissions` key. Absent resources become empty segments.
pub fn permission_key(
    user: &UserId,
    permission: &Permission,
    resource: Option<&ResourceRef>,
) -> String {
    match resource {
        Some(resource) => format!(
            "{user}:{permission}:{}:{}",
            resource.resource_type, resource.resource_id
        ),
        None => format!("{user}:{permission}::"),
    }
}

/// Builds the `resource_permissions` key.
pub fn resource_key(user: &UserId, resource: &ResourceRef) -> String {
    format!("{user}:{}:{}", resource.resource_type, resource.resource_id)
}

fn user_prefix(user: &UserId) -> String {
    format!("{user}:")
}

fn resource_suffix(resource: &ResourceRef) -> String {
    format!(":{}:{}", resource.resource_type, resource.resource_id)
}

/// Cached roles, permission decisions and effective resource permissions.
pub struct PermissionCacheService {
    user_roles: MultiLevelCache<Vec<Role>>,
    user_permissions: MultiLevelCache<bool>,
    resource_permissions: MultiLevelCache<Resolution>,
    // ancestor -> resources whose cached results were derived through it.
    // Records live as long as the entries they point at.
    dependents: MemoryCache<ResourceRef, HashSet<ResourceRef>>,
    ttl: Duration,
}

impl std::fmt::Debug for PermissionCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCacheService")
            .field("ttl", &self.ttl)
            .field("user_roles", &self.user_roles)
            .field("user_permissions", &self.user_permissions)
            .field("resource_permissions", &self.resource_permissions)
            .finish_non_exhaustive()
    }
}

impl PermissionCacheService {
    /// Creates memory-only caches.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_backends(config, None, Arc::new(NoSync))
    }

    /// Creates caches backed by an optional shared store and a sync channel.
    pub fn with_backends(
        config: &CacheConfig,
        store: Option<Arc<dyn KeyValueStore>>,
        sync: Arc<dyn CacheSync>,
    ) -> Self {
        Self {
            user_roles: build_domain(config, USER_ROLES, store.as_ref(), &sync),
            user_permissions: build_domain(config, USER_PERMISSIONS, store.as_ref(), &sync),
            resource_permissions: build_domain(config, RESOURCE_PERMISSIONS, store.as_ref(), &sync),
            dependents: MemoryCache::new(config.memory_capacity).with_ttl(config.ttl()),
            ttl: config.ttl(),
        }
    }

    /// Entry lifetime shared by the three domains.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Effective roles per user, keyed by user id.
    pub fn user_roles(&self) -> &MultiLevelCache<Vec<Role>> {
        &self.user_roles
    }

    /// Permission decisions, keyed by [`permission_key`].
    pub fn user_permissions(&self) -> &MultiLevelCache<bool> {
        &self.user_permissions
    }

    /// Effective permissions and ancestor chains, keyed by [`resource_key`].
    pub fn resource_permissions(&self) -> &MultiLevelCache<Resolution> {
        &self.resource_permissions
    }

    /// Records that results cached for `resource` were derived through
    /// `ancestors`, so clearing any ancestor also clears `resource`.
    pub fn record_ancestry(&self, resource: &ResourceRef, ancestors: &[ResourceRef]) {
        if ancestors.is_empty() {
            return;
        }
        for ancestor in ancestors {
            self.dependents.upsert(ancestor.clone(), None, |current| {
                let mut dependents = current.unwrap_or_default();
                dependents.insert(resource.clone());
                dependents
            });
        }
    }

    /// Number of ancestors currently tracked for descendant invalidation,
    /// expired records included until the next write prunes them.
    pub fn tracked_ancestors(&self) -> usize {
        self.dependents.len()
    }

    /// Drops every cached entry of a user. Returns the number of keys removed
    /// from this process's memory tiers.
    pub async fn clear_user(&self, user: &UserId) -> usize {
        self.user_roles.delete(user.as_str()).await;
        let prefix = user_prefix(user);
        let mut removed = self
            .user_permissions
            .delete_where(|key| key.starts_with(&prefix))
            .await;
        removed += self
            .resource_permissions
            .delete_where(|key| key.starts_with(&prefix))
            .await;
        tracing::debug!(user = %user, removed, "cleared user permission cache");
        removed
    }

    /// Drops every cached entry scoped to a resource and to every resource
    /// whose cached results were inherited through it. Returns the number of
    /// keys removed from this process's memory tiers.
    pub async fn clear_resource(&self, resource: &ResourceRef) -> usize {
        let mut targets = self.dependents.take(resource).unwrap_or_default();
        targets.insert(resource.clone());

        let suffixes: Vec<String> = targets.iter().map(resource_suffix).collect();
        let matches = |key: &str| suffixes.iter().any(|suffix| key.ends_with(suffix.as_str()));
        let mut removed = self.resource_permissions.delete_where(matches).await;
        removed += self.user_permissions.delete_where(matches).await;
        tracing::debug!(resource = %resource, removed, "cleared resource permission cache");
        removed
    }
}

fn build_domain<V>(
    config: &CacheConfig,
    domain: &str,
    store: Option<&Arc<dyn KeyValueStore>>,
    sync: &Arc<dyn CacheSync>,
) -> MultiLevelCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let memory = MemoryCache::new(config.memory_capacity).with_ttl(config.ttl());
    let mut cache = MultiLevelCache::new(memory, config.ttl());
    if let Some(store) = store {
        cache = cache.with_shared(Arc::new(RedisCache::new(
            Arc::clone(store),
            config.key_prefix(domain),
        )));
    }
    cache.with_sync(Arc::clone(sync), config.channel(domain))
}
