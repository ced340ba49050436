use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{ResourcePermission, ResourceRelationship, Role, UserRole};
use crate::permission::Permission;
use crate::store::{ResourcePermissionStore, ResourceStore, RoleStore};
use crate::types::{ResourceRef, RoleId, UserId};

/// In-memory provider implementation for tests and demos.
///
/// Cloning shares the underlying data. Every read bumps a lookup counter so
/// callers can observe how often the cache fell through to the provider.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    roles: RwLock<BTreeMap<RoleId, Role>>,
    assignments: RwLock<HashMap<UserId, Vec<UserRole>>>,
    parents: RwLock<HashMap<ResourceRef, ResourceRef>>,
    grants: RwLock<HashSet<ResourcePermission>>,
    lookups: AtomicUsize,
    unavailable: AtomicBool,
}

#[derive(Debug, thiserror::Error)]
#[error("memory store unavailable")]
struct Unavailable;

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of provider reads served so far.
    pub fn lookups(&self) -> usize {
        self.inner.lookups.load(Ordering::Relaxed)
    }

    /// Makes every read fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn read_guard(&self) -> std::result::Result<(), StoreError> {
        self.inner.lookups.fetch_add(1, Ordering::Relaxed);
        if self.inner.unavailable.load(Ordering::Relaxed) {
            return Err(Box::new(Unavailable));
        }
        Ok(())
    }

    /// Inserts or replaces a role.
    pub fn put_role(&self, role: Role) {
        let mut guard = self.inner.roles.write().expect("poisoned lock");
        guard.insert(role.id.clone(), role);
    }

    /// Assigns a role to a user without expiry.
    pub fn add_user_role(&self, user: UserId, role: RoleId) {
        self.push_assignment(UserRole {
            granted_by: user.clone(),
            user_id: user,
            role_id: role,
            expires_at: None,
        });
    }

    /// Adds a child → parent edge.
    pub fn add_relationship(&self, child: ResourceRef, parent: ResourceRef) {
        let mut guard = self.inner.parents.write().expect("poisoned lock");
        guard.insert(child, parent);
    }

    /// Grants a permission on a resource.
    pub fn add_grant(&self, user: UserId, resource: ResourceRef, permission: Permission) {
        let mut guard = self.inner.grants.write().expect("poisoned lock");
        guard.insert(ResourcePermission {
            user_id: user,
            resource,
            permission,
        });
    }

    /// Removes a grant on a resource.
    pub fn remove_grant(&self, user: UserId, resource: ResourceRef, permission: Permission) {
        let mut guard = self.inner.grants.write().expect("poisoned lock");
        guard.remove(&ResourcePermission {
            user_id: user,
            resource,
            permission,
        });
    }

    fn push_assignment(&self, assignment: UserRole) {
        let mut guard = self.inner.assignments.write().expect("poisoned lock");
        let entries = guard.entry(assignment.user_id.clone()).or_default();
        entries.retain(|existing| existing.role_id != assignment.role_id);
        entries.push(assignment);
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn user_roles(&self, user: &UserId) -> std::result::Result<Vec<UserRole>, StoreError> {
        self.read_guard()?;
        let guard = self.inner.assignments.read().expect("poisoned lock");
        Ok(guard.get(user).cloned().unwrap_or_default())
    }

    async fn role(&self, role: &RoleId) -> std::result::Result<Option<Role>, StoreError> {
        self.read_guard()?;
        let guard = self.inner.roles.read().expect("poisoned lock");
        Ok(guard.get(role).cloned())
    }

    async fn roles(&self) -> std::result::Result<Vec<Role>, StoreError> {
        self.read_guard()?;
        let guard = self.inner.roles.read().expect("poisoned lock");
        Ok(guard.values().cloned().collect())
    }

    async fn users_with_role(
        &self,
        role: &RoleId,
    ) -> std::result::Result<Vec<UserId>, StoreError> {
        self.read_guard()?;
        let guard = self.inner.assignments.read().expect("poisoned lock");
        let users: BTreeSet<UserId> = guard
            .values()
            .flatten()
            .filter(|assignment| &assignment.role_id == role)
            .map(|assignment| assignment.user_id.clone())
            .collect();
        Ok(users.into_iter().collect())
    }

    async fn create_role(&self, role: Role) -> std::result::Result<(), StoreError> {
        self.put_role(role);
        Ok(())
    }

    async fn update_role(&self, role: Role) -> std::result::Result<(), StoreError> {
        self.put_role(role);
        Ok(())
    }

    async fn delete_role(&self, role: &RoleId) -> std::result::Result<(), StoreError> {
        self.inner
            .roles
            .write()
            .expect("poisoned lock")
            .remove(role);
        let mut assignments = self.inner.assignments.write().expect("poisoned lock");
        for entries in assignments.values_mut() {
            entries.retain(|assignment| &assignment.role_id != role);
        }
        Ok(())
    }

    async fn set_role_parent(
        &self,
        role: &RoleId,
        parent: Option<RoleId>,
    ) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.roles.write().expect("poisoned lock");
        if let Some(existing) = guard.get_mut(role) {
            existing.parent_role_id = parent;
        }
        Ok(())
    }

    async fn add_role_permission(
        &self,
        role: &RoleId,
        permission: Permission,
    ) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.roles.write().expect("poisoned lock");
        if let Some(existing) = guard.get_mut(role) {
            existing.permissions.insert(permission);
        }
        Ok(())
    }

    async fn remove_role_permission(
        &self,
        role: &RoleId,
        permission: &Permission,
    ) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.roles.write().expect("poisoned lock");
        if let Some(existing) = guard.get_mut(role) {
            existing.permissions.remove(permission);
        }
        Ok(())
    }

    async fn assign_role(&self, assignment: UserRole) -> std::result::Result<(), StoreError> {
        self.push_assignment(assignment);
        Ok(())
    }

    async fn revoke_role(
        &self,
        user: &UserId,
        role: &RoleId,
    ) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.assignments.write().expect("poisoned lock");
        if let Some(entries) = guard.get_mut(user) {
            entries.retain(|assignment| &assignment.role_id != role);
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn parent(
        &self,
        child: &ResourceRef,
    ) -> std::result::Result<Option<ResourceRef>, StoreError> {
        self.read_guard()?;
        let guard = self.inner.parents.read().expect("poisoned lock");
        Ok(guard.get(child).cloned())
    }

    async fn link(
        &self,
        relationship: ResourceRelationship,
    ) -> std::result::Result<(), StoreError> {
        self.add_relationship(relationship.child, relationship.parent);
        Ok(())
    }

    async fn unlink(&self, child: &ResourceRef) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.parents.write().expect("poisoned lock");
        guard.remove(child);
        Ok(())
    }
}

#[async_trait]
impl ResourcePermissionStore for MemoryStore {
    async fn permissions_on(
        &self,
        user: &UserId,
        resource: &ResourceRef,
    ) -> std::result::Result<Vec<Permission>, StoreError> {
        self.read_guard()?;
        let guard = self.inner.grants.read().expect("poisoned lock");
        let permissions: BTreeSet<Permission> = guard
            .iter()
            .filter(|grant| &grant.user_id == user && &grant.resource == resource)
            .map(|grant| grant.permission.clone())
            .collect();
        Ok(permissions.into_iter().collect())
    }

    async fn grant(&self, grant: ResourcePermission) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.grants.write().expect("poisoned lock");
        guard.insert(grant);
        Ok(())
    }

    async fn revoke(&self, grant: &ResourcePermission) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.grants.write().expect("poisoned lock");
        guard.remove(grant);
        Ok(())
    }
}
