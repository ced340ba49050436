//! Domain records read from the persistence providers.

use crate::permission::Permission;
use crate::types::{ResourceRef, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::SystemTime;

/// Authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Permission is granted.
    Allow,
    /// Permission is denied.
    Deny,
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed { Self::Allow } else { Self::Deny }
    }
}

/// Named permission bundle with at most one parent role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub parent_role_id: Option<RoleId>,
    pub permissions: BTreeSet<Permission>,
}

impl Role {
    /// Creates a role without parent or permissions.
    pub fn new(id: RoleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parent_role_id: None,
            permissions: BTreeSet::new(),
        }
    }

    /// Sets the parent role.
    pub fn with_parent(mut self, parent: RoleId) -> Self {
        self.parent_role_id = Some(parent);
        self
    }

    /// Adds a permission to the bundle.
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }
}

/// Assignment of a role to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub granted_by: UserId,
    pub expires_at: Option<SystemTime>,
}

impl UserRole {
    /// Returns whether the assignment is still in force at `now`.
    pub fn is_active_at(&self, now: SystemTime) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Child → parent edge in the resource hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRelationship {
    pub child: ResourceRef,
    pub parent: ResourceRef,
}

/// Explicit grant of a permission to a user on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourcePermission {
    pub user_id: UserId,
    pub resource: ResourceRef,
    pub permission: Permission,
}
