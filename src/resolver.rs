use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::permission::Permission;
use crate::store::{ResourcePermissionStore, ResourceStore};
use crate::types::{ResourceRef, UserId};

/// Permissions a user holds on a resource, and the chain they were drawn from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Union of direct and inherited grants.
    pub permissions: BTreeSet<Permission>,
    /// Ancestors of the resource, immediate parent first.
    pub ancestors: Vec<ResourceRef>,
}

/// Walks the resource hierarchy and aggregates inherited grants.
///
/// A grant on an ancestor applies to every descendant. The walk is guarded by
/// a visited set and a maximum depth, so corrupt parent data surfaces as an
/// error instead of an endless loop.
#[derive(Clone)]
pub struct ResourcePermissionResolver {
    resources: Arc<dyn ResourceStore>,
    grants: Arc<dyn ResourcePermissionStore>,
    max_depth: usize,
}

impl std::fmt::Debug for ResourcePermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePermissionResolver")
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl ResourcePermissionResolver {
    /// Creates a resolver over the given providers.
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        grants: Arc<dyn ResourcePermissionStore>,
        max_depth: usize,
    ) -> Self {
        Self {
            resources,
            grants,
            max_depth,
        }
    }

    /// Returns the ancestors of `resource`, immediate parent first.
    pub async fn get_resource_ancestors(&self, resource: &ResourceRef) -> Result<Vec<ResourceRef>> {
        let mut visited = HashSet::from([resource.clone()]);
        let mut chain = Vec::new();
        let mut current = resource.clone();

        while let Some(parent) = self.resources.parent(&current).await.map_err(Error::from)? {
            if !visited.insert(parent.clone()) {
                tracing::warn!(resource = %resource, at = %parent, "resource hierarchy cycle");
                return Err(Error::ResourceCycleDetected { resource: parent });
            }
            if chain.len() >= self.max_depth {
                return Err(Error::ResourceDepthExceeded {
                    resource: resource.clone(),
                    max_depth: self.max_depth,
                });
            }
            chain.push(parent.clone());
            current = parent;
        }

        Ok(chain)
    }

    /// Returns the de-duplicated union of grants on `resource` and all of its
    /// ancestors.
    pub async fn get_effective_permissions(
        &self,
        user: &UserId,
        resource: &ResourceRef,
    ) -> Result<BTreeSet<Permission>> {
        Ok(self.resolve(user, resource).await?.permissions)
    }

    /// Like [`Self::get_effective_permissions`] but also returns the chain.
    pub async fn resolve(&self, user: &UserId, resource: &ResourceRef) -> Result<Resolution> {
        let ancestors = self.get_resource_ancestors(resource).await?;
        let mut permissions = BTreeSet::new();
        for node in std::iter::once(resource).chain(ancestors.iter()) {
            let granted = self
                .grants
                .permissions_on(user, node)
                .await
                .map_err(Error::from)?;
            permissions.extend(granted);
        }
        Ok(Resolution {
            permissions,
            ancestors,
        })
    }
}
