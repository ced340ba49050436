use crate::error::StoreError;
use crate::model::{ResourcePermission, ResourceRelationship, Role, UserRole};
use crate::permission::Permission;
use crate::types::{ResourceRef, RoleId, UserId};
use async_trait::async_trait;

/// Provider interface for roles and role assignments.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Returns role assignments for a user, including expired ones.
    async fn user_roles(&self, user: &UserId) -> std::result::Result<Vec<UserRole>, StoreError>;

    /// Returns a single role.
    async fn role(&self, role: &RoleId) -> std::result::Result<Option<Role>, StoreError>;

    /// Returns every role. Used for hierarchy validation.
    async fn roles(&self) -> std::result::Result<Vec<Role>, StoreError>;

    /// Returns users holding a role directly.
    async fn users_with_role(&self, role: &RoleId)
    -> std::result::Result<Vec<UserId>, StoreError>;

    /// Creates a role.
    async fn create_role(&self, role: Role) -> std::result::Result<(), StoreError>;

    /// Replaces a role's name, parent and permissions.
    async fn update_role(&self, role: Role) -> std::result::Result<(), StoreError>;

    /// Deletes a role and its assignments.
    async fn delete_role(&self, role: &RoleId) -> std::result::Result<(), StoreError>;

    /// Sets or clears a role's parent.
    async fn set_role_parent(
        &self,
        role: &RoleId,
        parent: Option<RoleId>,
    ) -> std::result::Result<(), StoreError>;

    /// Links a permission to a role.
    async fn add_role_permission(
        &self,
        role: &RoleId,
        permission: Permission,
    ) -> std::result::Result<(), StoreError>;

    /// Unlinks a permission from a role.
    async fn remove_role_permission(
        &self,
        role: &RoleId,
        permission: &Permission,
    ) -> std::result::Result<(), StoreError>;

    /// Assigns a role to a user.
    async fn assign_role(&self, assignment: UserRole) -> std::result::Result<(), StoreError>;

    /// Removes a role assignment.
    async fn revoke_role(
        &self,
        user: &UserId,
        role: &RoleId,
    ) -> std::result::Result<(), StoreError>;
}

/// Provider interface for the resource hierarchy.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Returns the direct parent of a resource, if any.
    async fn parent(
        &self,
        child: &ResourceRef,
    ) -> std::result::Result<Option<ResourceRef>, StoreError>;

    /// Creates or replaces the parent edge of `relationship.child`.
    async fn link(&self, relationship: ResourceRelationship)
    -> std::result::Result<(), StoreError>;

    /// Removes the parent edge of a resource.
    async fn unlink(&self, child: &ResourceRef) -> std::result::Result<(), StoreError>;
}

/// Provider interface for explicit resource-scoped grants.
#[async_trait]
pub trait ResourcePermissionStore: Send + Sync {
    /// Returns permissions granted directly to a user on one resource.
    async fn permissions_on(
        &self,
        user: &UserId,
        resource: &ResourceRef,
    ) -> std::result::Result<Vec<Permission>, StoreError>;

    /// Records a grant.
    async fn grant(&self, grant: ResourcePermission) -> std::result::Result<(), StoreError>;

    /// Removes a grant.
    async fn revoke(&self, grant: &ResourcePermission) -> std::result::Result<(), StoreError>;
}

/// Composite store trait.
pub trait Store: RoleStore + ResourceStore + ResourcePermissionStore {}

impl<T> Store for T where T: RoleStore + ResourceStore + ResourcePermissionStore {}
