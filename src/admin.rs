use std::collections::BTreeSet;
use std::sync::Arc;

use crate::checker::PermissionChecker;
use crate::error::{Error, Result};
use crate::hierarchy::{check_parent_selection, descendants_of};
use crate::model::{ResourcePermission, ResourceRelationship, Role, UserRole};
use crate::permission::Permission;
use crate::types::{ResourceRef, RoleId, UserId};

/// Applies permission data changes through the providers and then drops
/// every cached entry that could still hold the old answer.
///
/// Role changes invalidate every holder of the role and of the roles that
/// inherit from it. Grant and hierarchy changes invalidate the resource and
/// every resource whose cached result was derived through it.
#[derive(Debug, Clone)]
pub struct PermissionAdmin {
    checker: Arc<PermissionChecker>,
}

impl PermissionAdmin {
    /// Creates an admin that writes through the checker's providers.
    pub fn new(checker: Arc<PermissionChecker>) -> Self {
        Self { checker }
    }

    /// Checker whose caches this admin keeps coherent.
    pub fn checker(&self) -> &Arc<PermissionChecker> {
        &self.checker
    }

    /// Stores a new role. A parent, if set, must pass hierarchy validation.
    pub async fn create_role(&self, role: Role) -> Result<()> {
        if let Some(parent) = &role.parent_role_id {
            let mut roles = self.roles().await?;
            roles.retain(|existing| existing.id != role.id);
            roles.push(role.clone());
            check_parent_selection(&roles, &role.id, parent, Some(self.checker.max_role_depth()))?;
        }
        let id = role.id.clone();
        let affected = self.holders_of(&id).await?;
        self.checker
            .role_store()
            .create_role(role)
            .await
            .map_err(Error::from)?;
        tracing::info!(role = %id, "role created");
        self.clear_users(affected).await;
        Ok(())
    }

    /// Replaces a role. A changed parent must pass hierarchy validation.
    pub async fn update_role(&self, role: Role) -> Result<()> {
        let roles = self.roles().await?;
        let current_parent = roles
            .iter()
            .find(|existing| existing.id == role.id)
            .and_then(|existing| existing.parent_role_id.clone());
        if let Some(parent) = role
            .parent_role_id
            .as_ref()
            .filter(|parent| current_parent.as_ref() != Some(*parent))
        {
            check_parent_selection(&roles, &role.id, parent, Some(self.checker.max_role_depth()))?;
        }
        let id = role.id.clone();
        let affected = self.holders_of(&id).await?;
        self.checker
            .role_store()
            .update_role(role)
            .await
            .map_err(Error::from)?;
        tracing::info!(role = %id, "role updated");
        self.clear_users(affected).await;
        Ok(())
    }

    /// Deletes a role. Holders are collected before the delete so their
    /// cached roles can still be found.
    pub async fn delete_role(&self, role: &RoleId) -> Result<()> {
        let affected = self.holders_of(role).await?;
        self.checker
            .role_store()
            .delete_role(role)
            .await
            .map_err(Error::from)?;
        tracing::info!(role = %role, "role deleted");
        self.clear_users(affected).await;
        Ok(())
    }

    /// Moves a role under a new parent, or detaches it with `None`.
    pub async fn set_role_parent(&self, role: &RoleId, parent: Option<RoleId>) -> Result<()> {
        if let Some(parent) = &parent {
            let roles = self.roles().await?;
            check_parent_selection(&roles, role, parent, Some(self.checker.max_role_depth()))?;
        }
        let affected = self.holders_of(role).await?;
        self.checker
            .role_store()
            .set_role_parent(role, parent)
            .await
            .map_err(Error::from)?;
        self.clear_users(affected).await;
        Ok(())
    }

    pub async fn add_role_permission(&self, role: &RoleId, permission: Permission) -> Result<()> {
        let affected = self.holders_of(role).await?;
        self.checker
            .role_store()
            .add_role_permission(role, permission)
            .await
            .map_err(Error::from)?;
        self.clear_users(affected).await;
        Ok(())
    }

    pub async fn remove_role_permission(
        &self,
        role: &RoleId,
        permission: &Permission,
    ) -> Result<()> {
        let affected = self.holders_of(role).await?;
        self.checker
            .role_store()
            .remove_role_permission(role, permission)
            .await
            .map_err(Error::from)?;
        self.clear_users(affected).await;
        Ok(())
    }

    pub async fn assign_role(&self, assignment: UserRole) -> Result<()> {
        let user = assignment.user_id.clone();
        self.checker
            .role_store()
            .assign_role(assignment)
            .await
            .map_err(Error::from)?;
        self.checker.clear_user(&user).await;
        Ok(())
    }

    pub async fn revoke_role(&self, user: &UserId, role: &RoleId) -> Result<()> {
        self.checker
            .role_store()
            .revoke_role(user, role)
            .await
            .map_err(Error::from)?;
        self.checker.clear_user(user).await;
        Ok(())
    }

    pub async fn grant_resource_permission(&self, grant: ResourcePermission) -> Result<()> {
        let resource = grant.resource.clone();
        self.checker
            .grant_store()
            .grant(grant)
            .await
            .map_err(Error::from)?;
        self.checker.clear_resource(&resource).await;
        Ok(())
    }

    pub async fn revoke_resource_permission(&self, grant: &ResourcePermission) -> Result<()> {
        self.checker
            .grant_store()
            .revoke(grant)
            .await
            .map_err(Error::from)?;
        self.checker.clear_resource(&grant.resource).await;
        Ok(())
    }

    /// Sets the parent of a resource, replacing any previous one.
    pub async fn link_resource(&self, relationship: ResourceRelationship) -> Result<()> {
        let child = relationship.child.clone();
        self.checker
            .resource_store()
            .link(relationship)
            .await
            .map_err(Error::from)?;
        self.checker.clear_resource(&child).await;
        Ok(())
    }

    /// Detaches a resource from its parent.
    pub async fn unlink_resource(&self, child: &ResourceRef) -> Result<()> {
        self.checker
            .resource_store()
            .unlink(child)
            .await
            .map_err(Error::from)?;
        self.checker.clear_resource(child).await;
        Ok(())
    }

    async fn roles(&self) -> Result<Vec<Role>> {
        self.checker.role_store().roles().await.map_err(Error::from)
    }

    // Users holding `role` or any role inheriting from it.
    async fn holders_of(&self, role: &RoleId) -> Result<BTreeSet<UserId>> {
        let roles = self.roles().await?;
        let mut users = BTreeSet::new();
        for id in descendants_of(&roles, role) {
            let holders = self
                .checker
                .role_store()
                .users_with_role(&id)
                .await
                .map_err(Error::from)?;
            users.extend(holders);
        }
        Ok(users)
    }

    async fn clear_users(&self, users: BTreeSet<UserId>) {
        for user in &users {
            self.checker.clear_user(user).await;
        }
    }
}

#[cfg(all(test, feature = "memory-store"))]
mod tests {
    use super::*;
    use crate::error::InvalidParentReason;
    use crate::memory_store::MemoryStore;
    use futures::executor::block_on;

    fn user(id: &str) -> UserId {
        UserId::try_from(id).unwrap()
    }

    fn role_id(id: &str) -> RoleId {
        RoleId::try_from(id).unwrap()
    }

    fn perm(value: &str) -> Permission {
        Permission::try_from(value).unwrap()
    }

    fn resource(kind: &str, id: &str) -> ResourceRef {
        ResourceRef::parse(kind, id).unwrap()
    }

    fn setup() -> (PermissionAdmin, MemoryStore) {
        let store = MemoryStore::new();
        store.put_role(Role::new(role_id("viewer"), "Viewer").with_permission(perm("VIEW")));
        store.put_role(Role::new(role_id("editor"), "Editor").with_parent(role_id("viewer")));
        store.add_user_role(user("u1"), role_id("editor"));
        let checker = PermissionChecker::builder(Arc::new(store.clone())).build();
        (PermissionAdmin::new(Arc::new(checker)), store)
    }

    #[test]
    fn parent_role_change_should_reach_inheriting_holders() {
        let (admin, _) = setup();
        let checker = admin.checker().clone();
        let u1 = user("u1");

        assert!(!block_on(checker.check_permission(&u1, &perm("EXPORT"), None)).unwrap());

        block_on(admin.add_role_permission(&role_id("viewer"), perm("EXPORT"))).unwrap();
        assert!(block_on(checker.check_permission(&u1, &perm("EXPORT"), None)).unwrap());

        block_on(admin.remove_role_permission(&role_id("viewer"), &perm("EXPORT"))).unwrap();
        assert!(!block_on(checker.check_permission(&u1, &perm("EXPORT"), None)).unwrap());
    }

    #[test]
    fn revoke_role_should_clear_the_user() {
        let (admin, _) = setup();
        let checker = admin.checker().clone();
        let u1 = user("u1");

        assert!(block_on(checker.check_permission(&u1, &perm("VIEW"), None)).unwrap());
        block_on(admin.revoke_role(&u1, &role_id("editor"))).unwrap();
        assert!(!block_on(checker.check_permission(&u1, &perm("VIEW"), None)).unwrap());
    }

    #[test]
    fn cyclic_parent_should_be_rejected_without_writing() {
        let (admin, store) = setup();

        let result = block_on(admin.set_role_parent(&role_id("viewer"), Some(role_id("editor"))));
        assert!(matches!(
            result,
            Err(Error::InvalidParent {
                reason: InvalidParentReason::Cycle,
                ..
            })
        ));

        let viewer = block_on(crate::store::RoleStore::role(&store, &role_id("viewer")))
            .unwrap()
            .unwrap();
        assert_eq!(viewer.parent_role_id, None);
    }

    #[test]
    fn relinking_a_resource_should_drop_inherited_grants() {
        let (admin, store) = setup();
        let checker = admin.checker().clone();
        let u1 = user("u1");
        let d1 = resource("doc", "d1");
        let (p1, p2) = (resource("project", "p1"), resource("project", "p2"));
        store.add_relationship(d1.clone(), p1.clone());
        store.add_grant(u1.clone(), p1.clone(), perm("EDIT"));

        assert!(block_on(checker.check_permission(&u1, &perm("EDIT"), Some(&d1))).unwrap());

        block_on(admin.link_resource(ResourceRelationship {
            child: d1.clone(),
            parent: p2,
        }))
        .unwrap();
        assert!(!block_on(checker.check_permission(&u1, &perm("EDIT"), Some(&d1))).unwrap());
    }

    #[test]
    fn revoking_an_ancestor_grant_should_clear_descendants() {
        let (admin, store) = setup();
        let checker = admin.checker().clone();
        let u1 = user("u1");
        let (d1, p1) = (resource("doc", "d1"), resource("project", "p1"));
        store.add_relationship(d1.clone(), p1.clone());
        let grant = ResourcePermission {
            user_id: u1.clone(),
            resource: p1.clone(),
            permission: perm("EDIT"),
        };
        block_on(admin.grant_resource_permission(grant.clone())).unwrap();

        assert!(block_on(checker.check_permission(&u1, &perm("EDIT"), Some(&d1))).unwrap());
        block_on(admin.revoke_resource_permission(&grant)).unwrap();
        assert!(!block_on(checker.check_permission(&u1, &perm("EDIT"), Some(&d1))).unwrap());
    }
}
