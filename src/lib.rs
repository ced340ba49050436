//! Cached RBAC and resource-hierarchy permission checks.
//!
//! Permission decisions are computed from pluggable async providers (roles,
//! resource parents, resource grants) and cached in a two-tier cache: a
//! bounded process-local memory tier and an optional shared tier (Redis).
//! Writes broadcast invalidations over pub/sub so peers drop stale copies;
//! entry TTLs bound staleness when a broadcast is lost.
//!
//! Global checks resolve through the user's roles and their parent chains.
//! Resource-scoped checks resolve through grants on the resource and all of
//! its ancestors. Use [`PermissionChecker`] for checks and
//! [`PermissionAdmin`] for changes that must invalidate cached answers.
//!
//! # Examples
//!
//! In-memory providers (enable `memory-store`, on by default):
//! ```no_run
//! use rs_permit::{Permission, PermissionChecker, ResourceRef, UserId};
//! # #[cfg(feature = "memory-store")]
//! # futures::executor::block_on(async {
//! use rs_permit::MemoryStore;
//! use std::sync::Arc;
//!
//! let store = MemoryStore::new();
//! let user = UserId::try_from("u1").unwrap();
//! let project = ResourceRef::parse("project", "p1").unwrap();
//! let doc = ResourceRef::parse("doc", "d1").unwrap();
//! store.add_relationship(doc.clone(), project.clone());
//! store.add_grant(user.clone(), project, Permission::try_from("VIEW").unwrap());
//!
//! let checker = PermissionChecker::builder(Arc::new(store)).build();
//! let view = Permission::try_from("VIEW").unwrap();
//! assert!(checker.check_permission(&user, &view, Some(&doc)).await.unwrap());
//! # });
//! ```
//!
//! Sharing entries between processes through Redis (enable `redis`):
//! ```no_run
//! # #[cfg(feature = "redis")]
//! # async fn wire() {
//! use rs_permit::{CacheConfig, PermissionCacheService, RedisConfig};
//! let backends = rs_permit::connect(&RedisConfig { enabled: true, ..Default::default() }).await;
//! let config = CacheConfig::default();
//! let cache = PermissionCacheService::with_backends(&config, backends.store, backends.sync);
//! # let _ = cache;
//! # }
//! ```
#![forbid(unsafe_code)]

mod admin;
mod checker;
pub mod codec;
mod config;
mod error;
mod global;
mod hierarchy;
mod memory_cache;
mod model;
mod multi_level;
mod permission;
mod permission_cache;
mod resolver;
mod shared;
mod store;
mod sync;
mod types;

#[cfg(feature = "memory-store")]
mod memory_store;

#[cfg(feature = "redis")]
mod redis_backend;

pub use crate::admin::PermissionAdmin;
pub use crate::checker::{PermissionChecker, PermissionCheckerBuilder};
pub use crate::config::{CacheConfig, RedisConfig};
pub use crate::error::{Error, InvalidParentReason, Result, StoreError};
pub use crate::global::{global, install};
pub use crate::hierarchy::{
    check_parent_selection, descendants_of, role_chain, validate_parent_selection,
};
pub use crate::memory_cache::MemoryCache;
pub use crate::model::{Decision, ResourcePermission, ResourceRelationship, Role, UserRole};
pub use crate::multi_level::{CacheMetrics, MultiLevelCache};
pub use crate::permission::{DefaultPermissionValidator, Permission, PermissionValidator};
pub use crate::permission_cache::{PermissionCacheService, permission_key, resource_key};
pub use crate::resolver::{Resolution, ResourcePermissionResolver};
pub use crate::shared::{KeyValueStore, MemoryKeyValueStore, NoSharedTier, RedisCache, SharedTier};
pub use crate::store::{ResourcePermissionStore, ResourceStore, RoleStore, Store};
pub use crate::sync::{
    CacheSync, InvalidationHandler, InvalidationMessage, LocalBus, LocalSync, NoSync,
};
pub use crate::types::{ResourceId, ResourceRef, ResourceType, RoleId, UserId};

#[cfg(feature = "memory-store")]
pub use crate::memory_store::MemoryStore;

#[cfg(feature = "redis")]
pub use crate::redis_backend::{Backends, RedisStore, RedisSync, connect};
