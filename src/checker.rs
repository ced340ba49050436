use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::hierarchy::{role_chain, validate_parent_selection};
use crate::model::{Decision, Role};
use crate::permission::Permission;
use crate::permission_cache::{PermissionCacheService, permission_key, resource_key};
use crate::resolver::{Resolution, ResourcePermissionResolver};
use crate::store::{ResourcePermissionStore, ResourceStore, RoleStore, Store};
use crate::types::{ResourceRef, RoleId, UserId};

/// Cache-backed permission checks for the rest of the application.
///
/// Global checks resolve through the user's active roles and their parent
/// chains. Resource-scoped checks resolve through direct grants on the
/// resource and its ancestors. Every decision is cached under a fixed-shape
/// key; provider errors are returned and never cached.
#[derive(Clone)]
pub struct PermissionChecker {
    roles: Arc<dyn RoleStore>,
    resources: Arc<dyn ResourceStore>,
    grants: Arc<dyn ResourcePermissionStore>,
    resolver: ResourcePermissionResolver,
    cache: Arc<PermissionCacheService>,
    max_role_depth: usize,
}

impl std::fmt::Debug for PermissionChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionChecker")
            .field("resolver", &self.resolver)
            .field("cache", &self.cache)
            .field("max_role_depth", &self.max_role_depth)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PermissionChecker`].
pub struct PermissionCheckerBuilder {
    roles: Arc<dyn RoleStore>,
    resources: Arc<dyn ResourceStore>,
    grants: Arc<dyn ResourcePermissionStore>,
    config: CacheConfig,
    cache: Option<Arc<PermissionCacheService>>,
}

impl PermissionCheckerBuilder {
    /// Creates a builder over separate providers.
    pub fn new(
        roles: Arc<dyn RoleStore>,
        resources: Arc<dyn ResourceStore>,
        grants: Arc<dyn ResourcePermissionStore>,
    ) -> Self {
        Self {
            roles,
            resources,
            grants,
            config: CacheConfig::default(),
            cache: None,
        }
    }

    /// Creates a builder over one store implementing every provider.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: Store + 'static,
    {
        Self::new(store.clone(), store.clone(), store)
    }

    /// Sets cache TTL, capacity, namespace and traversal limits.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses an existing cache service, e.g. one wired to Redis.
    ///
    /// Without this a memory-only service is built from the config.
    pub fn cache(mut self, cache: Arc<PermissionCacheService>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Builds the checker.
    pub fn build(self) -> PermissionChecker {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(PermissionCacheService::new(&self.config)));
        let resolver = ResourcePermissionResolver::new(
            Arc::clone(&self.resources),
            Arc::clone(&self.grants),
            self.config.max_resource_depth,
        );
        PermissionChecker {
            roles: self.roles,
            resources: self.resources,
            grants: self.grants,
            resolver,
            cache,
            max_role_depth: self.config.max_role_depth,
        }
    }
}

impl PermissionChecker {
    /// Shortcut for [`PermissionCheckerBuilder::from_store`].
    pub fn builder<S>(store: Arc<S>) -> PermissionCheckerBuilder
    where
        S: Store + 'static,
    {
        PermissionCheckerBuilder::from_store(store)
    }

    /// Checks one permission, globally or on a resource.
    pub async fn check_permission(
        &self,
        user: &UserId,
        permission: &Permission,
        resource: Option<&ResourceRef>,
    ) -> Result<bool> {
        let key = permission_key(user, permission, resource);
        let ttl = Some(self.cache.ttl());
        let resident = self.cache.user_permissions().peek_local(&key).is_some();
        let mut evaluated = false;
        let allowed = self
            .cache
            .user_permissions()
            .get_or_create(
                &key,
                || {
                    evaluated = true;
                    self.evaluate(user, permission, resource)
                },
                ttl,
            )
            .await?;

        // A decision read from the shared tier skipped the resolver, so this
        // process has not recorded the ancestry it depends on yet.
        if let Some(resource) = resource.filter(|_| !resident && !evaluated) {
            self.learn_ancestry(user, resource).await;
        }
        Ok(allowed)
    }

    /// True as soon as one permission is granted. False for an empty list.
    pub async fn check_any_permission(
        &self,
        user: &UserId,
        permissions: &[Permission],
        resource: Option<&ResourceRef>,
    ) -> Result<bool> {
        for permission in permissions {
            if self.check_permission(user, permission, resource).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// False as soon as one permission is missing. True for an empty list.
    pub async fn check_all_permissions(
        &self,
        user: &UserId,
        permissions: &[Permission],
        resource: Option<&ResourceRef>,
    ) -> Result<bool> {
        for permission in permissions {
            if !self.check_permission(user, permission, resource).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fail-closed variant of [`Self::check_permission`]: any error denies.
    pub async fn authorize(
        &self,
        user: &UserId,
        permission: &Permission,
        resource: Option<&ResourceRef>,
    ) -> Decision {
        match self.check_permission(user, permission, resource).await {
            Ok(allowed) => Decision::from(allowed),
            Err(e) => {
                tracing::warn!(
                    user = %user,
                    permission = %permission,
                    error = %e,
                    "permission check failed; denying"
                );
                Decision::Deny
            }
        }
    }

    /// Union of grants on `resource` and its ancestors, cached per user and
    /// resource.
    pub async fn get_effective_permissions(
        &self,
        user: &UserId,
        resource: &ResourceRef,
    ) -> Result<BTreeSet<Permission>> {
        let resolution = self.resolve_cached(user, resource).await?;
        Ok(resolution.permissions)
    }

    /// Ancestors of `resource`, immediate parent first. Not cached.
    pub async fn get_resource_ancestors(&self, resource: &ResourceRef) -> Result<Vec<ResourceRef>> {
        self.resolver.get_resource_ancestors(resource).await
    }

    /// Active roles of a user, each followed by its parent chain, cached per
    /// user. Roles reachable through several assignments appear once.
    pub async fn user_roles(&self, user: &UserId) -> Result<Vec<Role>> {
        let ttl = Some(self.cache.ttl());
        self.cache
            .user_roles()
            .get_or_create(user.as_str(), || self.load_user_roles(user), ttl)
            .await
    }

    /// Permissions granted through the user's roles.
    pub async fn global_permissions(&self, user: &UserId) -> Result<BTreeSet<Permission>> {
        let roles = self.user_roles(user).await?;
        Ok(roles
            .into_iter()
            .flat_map(|role| role.permissions)
            .collect())
    }

    /// Validates a proposed parent role against the current role set.
    pub async fn validate_parent_selection(
        &self,
        child: &RoleId,
        proposed_parent: &RoleId,
    ) -> Result<bool> {
        let roles = self.roles.roles().await.map_err(Error::from)?;
        Ok(validate_parent_selection(
            &roles,
            child,
            proposed_parent,
            Some(self.max_role_depth),
        ))
    }

    /// Drops every cached entry of a user.
    pub async fn clear_user(&self, user: &UserId) -> usize {
        self.cache.clear_user(user).await
    }

    /// Drops every cached entry scoped to a resource or inherited through it.
    pub async fn clear_resource(&self, resource: &ResourceRef) -> usize {
        self.cache.clear_resource(resource).await
    }

    /// Cache service shared by this checker.
    pub fn cache(&self) -> &Arc<PermissionCacheService> {
        &self.cache
    }

    /// Role provider.
    pub fn role_store(&self) -> &Arc<dyn RoleStore> {
        &self.roles
    }

    /// Resource hierarchy provider.
    pub fn resource_store(&self) -> &Arc<dyn ResourceStore> {
        &self.resources
    }

    /// Resource grant provider.
    pub fn grant_store(&self) -> &Arc<dyn ResourcePermissionStore> {
        &self.grants
    }

    /// Maximum role chain length.
    pub fn max_role_depth(&self) -> usize {
        self.max_role_depth
    }

    async fn learn_ancestry(&self, user: &UserId, resource: &ResourceRef) {
        let resolution = self
            .cache
            .resource_permissions()
            .peek(&resource_key(user, resource))
            .await;
        if let Some(resolution) = resolution {
            self.cache.record_ancestry(resource, &resolution.ancestors);
        }
    }

    async fn evaluate(
        &self,
        user: &UserId,
        permission: &Permission,
        resource: Option<&ResourceRef>,
    ) -> Result<bool> {
        let granted = match resource {
            Some(resource) => self.get_effective_permissions(user, resource).await?,
            None => self.global_permissions(user).await?,
        };
        Ok(granted.contains(permission))
    }

    async fn resolve_cached(&self, user: &UserId, resource: &ResourceRef) -> Result<Resolution> {
        let ttl = Some(self.cache.ttl());
        let resolution = self
            .cache
            .resource_permissions()
            .get_or_create(
                &resource_key(user, resource),
                || self.resolver.resolve(user, resource),
                ttl,
            )
            .await?;
        self.cache.record_ancestry(resource, &resolution.ancestors);
        Ok(resolution)
    }

    async fn load_user_roles(&self, user: &UserId) -> Result<Vec<Role>> {
        let now = SystemTime::now();
        let assignments = self.roles.user_roles(user).await.map_err(Error::from)?;

        let mut seen = HashSet::new();
        let mut roles = Vec::new();
        for assignment in assignments.iter().filter(|a| a.is_active_at(now)) {
            let chain = role_chain(self.roles.as_ref(), &assignment.role_id, self.max_role_depth)
                .await?;
            for role in chain {
                if seen.insert(role.id.clone()) {
                    roles.push(role);
                }
            }
        }
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{ResourcePermission, ResourceRelationship, UserRole};
    use async_trait::async_trait;
    use futures::executor::block_on;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("provider offline")]
    struct Offline;

    #[derive(Default)]
    struct TestStore {
        assignments: Vec<UserRole>,
        roles: HashMap<RoleId, Role>,
        parents: HashMap<ResourceRef, ResourceRef>,
        grants: HashMap<ResourceRef, Vec<Permission>>,
        failing: AtomicBool,
        role_lookups: AtomicUsize,
        grant_lookups: AtomicUsize,
    }

    impl TestStore {
        fn fail_if_offline(&self) -> std::result::Result<(), StoreError> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(Box::new(Offline));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RoleStore for TestStore {
        async fn user_roles(
            &self,
            user: &UserId,
        ) -> std::result::Result<Vec<UserRole>, StoreError> {
            self.role_lookups.fetch_add(1, Ordering::Relaxed);
            self.fail_if_offline()?;
            Ok(self
                .assignments
                .iter()
                .filter(|a| &a.user_id == user)
                .cloned()
                .collect())
        }

        async fn role(&self, role: &RoleId) -> std::result::Result<Option<Role>, StoreError> {
            self.fail_if_offline()?;
            Ok(self.roles.get(role).cloned())
        }

        async fn roles(&self) -> std::result::Result<Vec<Role>, StoreError> {
            Ok(self.roles.values().cloned().collect())
        }

        async fn users_with_role(
            &self,
            _role: &RoleId,
        ) -> std::result::Result<Vec<UserId>, StoreError> {
            Ok(Vec::new())
        }

        async fn create_role(&self, _role: Role) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn update_role(&self, _role: Role) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn delete_role(&self, _role: &RoleId) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn set_role_parent(
            &self,
            _role: &RoleId,
            _parent: Option<RoleId>,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn add_role_permission(
            &self,
            _role: &RoleId,
            _permission: Permission,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn remove_role_permission(
            &self,
            _role: &RoleId,
            _permission: &Permission,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn assign_role(&self, _assignment: UserRole) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn revoke_role(
            &self,
            _user: &UserId,
            _role: &RoleId,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    #[async_trait]
    impl ResourceStore for TestStore {
        async fn parent(
            &self,
            child: &ResourceRef,
        ) -> std::result::Result<Option<ResourceRef>, StoreError> {
            self.fail_if_offline()?;
            Ok(self.parents.get(child).cloned())
        }

        async fn link(
            &self,
            _relationship: ResourceRelationship,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn unlink(&self, _child: &ResourceRef) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    #[async_trait]
    impl ResourcePermissionStore for TestStore {
        async fn permissions_on(
            &self,
            _user: &UserId,
            resource: &ResourceRef,
        ) -> std::result::Result<Vec<Permission>, StoreError> {
            self.grant_lookups.fetch_add(1, Ordering::Relaxed);
            self.fail_if_offline()?;
            Ok(self.grants.get(resource).cloned().unwrap_or_default())
        }

        async fn grant(&self, _grant: ResourcePermission) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn revoke(&self, _grant: &ResourcePermission) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

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

    fn assign(store: &mut TestStore, user_id: &str, role: &str, expires_at: Option<SystemTime>) {
        store.assignments.push(UserRole {
            user_id: user(user_id),
            role_id: role_id(role),
            granted_by: user("admin"),
            expires_at,
        });
    }

    fn editor_store() -> TestStore {
        let mut store = TestStore::default();
        store.roles.insert(
            role_id("viewer"),
            Role::new(role_id("viewer"), "Viewer").with_permission(perm("VIEW_PROJECTS")),
        );
        store.roles.insert(
            role_id("editor"),
            Role::new(role_id("editor"), "Editor")
                .with_parent(role_id("viewer"))
                .with_permission(perm("EDIT_PROJECTS")),
        );
        assign(&mut store, "u1", "editor", None);
        store
    }

    fn checker(store: TestStore) -> (PermissionChecker, Arc<TestStore>) {
        let store = Arc::new(store);
        let checker = PermissionChecker::builder(store.clone()).build();
        (checker, store)
    }

    #[test]
    fn global_check_should_include_parent_role_permissions() {
        let (checker, _) = checker(editor_store());
        let u1 = user("u1");

        assert!(block_on(checker.check_permission(&u1, &perm("EDIT_PROJECTS"), None)).unwrap());
        assert!(block_on(checker.check_permission(&u1, &perm("VIEW_PROJECTS"), None)).unwrap());
        assert!(!block_on(checker.check_permission(&u1, &perm("DELETE_PROJECTS"), None)).unwrap());
    }

    #[test]
    fn repeated_checks_should_hit_the_cache() {
        let (checker, store) = checker(editor_store());
        let u1 = user("u1");
        let view = perm("VIEW_PROJECTS");

        for _ in 0..5 {
            assert!(block_on(checker.check_permission(&u1, &view, None)).unwrap());
        }

        assert_eq!(store.role_lookups.load(Ordering::Relaxed), 1);
        let metrics = checker.cache().user_permissions().metrics();
        assert_eq!(metrics.hits, 4);
        assert_eq!(metrics.misses, 1);
    }

    #[test]
    fn expired_assignment_should_grant_nothing() {
        let mut store = editor_store();
        assign(
            &mut store,
            "u2",
            "editor",
            Some(SystemTime::now() - Duration::from_secs(60)),
        );
        let (checker, _) = checker(store);

        let u2 = user("u2");
        let view = perm("VIEW_PROJECTS");
        let check = checker.check_permission(&u2, &view, None);
        assert!(!block_on(check).unwrap());
    }

    #[test]
    fn provider_error_should_propagate_and_not_be_cached() {
        let (checker, store) = checker(editor_store());
        let u1 = user("u1");
        let view = perm("VIEW_PROJECTS");

        store.failing.store(true, Ordering::Relaxed);
        let result = block_on(checker.check_permission(&u1, &view, None));
        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(block_on(checker.authorize(&u1, &view, None)), Decision::Deny);

        store.failing.store(false, Ordering::Relaxed);
        assert_eq!(block_on(checker.authorize(&u1, &view, None)), Decision::Allow);
    }

    #[test]
    fn resource_check_should_inherit_from_ancestors() {
        let mut store = TestStore::default();
        store.parents.insert(resource("doc", "d1"), resource("folder", "f1"));
        store.parents.insert(resource("folder", "f1"), resource("project", "p1"));
        store.grants.insert(resource("project", "p1"), vec![perm("VIEW")]);
        let (checker, store) = checker(store);
        let u1 = user("u1");
        let d1 = resource("doc", "d1");

        assert!(block_on(checker.check_permission(&u1, &perm("VIEW"), Some(&d1))).unwrap());
        assert!(!block_on(checker.check_permission(&u1, &perm("EDIT"), Some(&d1))).unwrap());
        // both checks share one cached resolution: three nodes, one walk
        assert_eq!(store.grant_lookups.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn any_and_all_should_short_circuit() {
        let (checker, _) = checker(editor_store());
        let u1 = user("u1");
        let view = perm("VIEW_PROJECTS");
        let edit = perm("EDIT_PROJECTS");
        let delete = perm("DELETE_PROJECTS");
        let decided = |permission: &Permission| {
            let key = permission_key(&u1, permission, None);
            checker.cache().user_permissions().peek_local(&key)
        };

        let any_perms = [view.clone(), delete.clone()];
        let any = checker.check_any_permission(&u1, &any_perms, None);
        assert!(block_on(any).unwrap());
        assert_eq!(decided(&view), Some(true));
        assert_eq!(decided(&delete), None);

        let all_perms = [delete.clone(), edit.clone()];
        let all = checker.check_all_permissions(&u1, &all_perms, None);
        assert!(!block_on(all).unwrap());
        assert_eq!(decided(&delete), Some(false));
        assert_eq!(decided(&edit), None);

        assert!(!block_on(checker.check_any_permission(&u1, &[], None)).unwrap());
        assert!(block_on(checker.check_all_permissions(&u1, &[], None)).unwrap());
    }

    #[test]
    fn resident_resource_decision_should_not_touch_resolutions() {
        let mut store = TestStore::default();
        store.parents.insert(resource("doc", "d1"), resource("project", "p1"));
        store
            .grants
            .insert(resource("project", "p1"), vec![perm("VIEW")]);
        let (checker, _) = checker(store);
        let u1 = user("u1");
        let d1 = resource("doc", "d1");

        for _ in 0..3 {
            assert!(block_on(checker.check_permission(&u1, &perm("VIEW"), Some(&d1))).unwrap());
        }

        let resolutions = checker.cache().resource_permissions().metrics();
        assert_eq!(resolutions.hits, 0);
        assert_eq!(resolutions.misses, 1);
    }

    #[test]
    fn validate_parent_selection_should_use_provider_roles() {
        let (checker, _) = checker(editor_store());

        let (viewer, editor) = (role_id("viewer"), role_id("editor"));

        assert!(!block_on(checker.validate_parent_selection(&viewer, &editor)).unwrap());
        assert!(!block_on(checker.validate_parent_selection(&editor, &editor)).unwrap());
    }
}
