//! Role hierarchy checks.
//!
//! Roles form a forest: each role has at most one parent and inherits that
//! parent's permissions. A new parent edge is only valid if it keeps the
//! forest acyclic, which means the proposed parent must not sit anywhere in
//! the child's descendant subtree.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, InvalidParentReason, Result};
use crate::model::Role;
use crate::store::RoleStore;
use crate::types::RoleId;

/// Returns whether `proposed_parent` may become the parent of `child`.
///
/// False when the two are the same role, when the parent lies in the child's
/// descendant subtree, when the parent does not exist, or when the resulting
/// chain would be longer than `max_depth` roles.
pub fn validate_parent_selection(
    roles: &[Role],
    child: &RoleId,
    proposed_parent: &RoleId,
    max_depth: Option<usize>,
) -> bool {
    check_parent_selection(roles, child, proposed_parent, max_depth).is_ok()
}

/// Like [`validate_parent_selection`] but reports why a parent is rejected.
pub fn check_parent_selection(
    roles: &[Role],
    child: &RoleId,
    proposed_parent: &RoleId,
    max_depth: Option<usize>,
) -> Result<()> {
    let reject = |reason| Error::InvalidParent {
        role: child.clone(),
        parent: proposed_parent.clone(),
        reason,
    };

    if child == proposed_parent {
        return Err(reject(InvalidParentReason::SelfParent));
    }

    let by_id: HashMap<&RoleId, &Role> = roles.iter().map(|role| (&role.id, role)).collect();
    if !by_id.contains_key(proposed_parent) {
        return Err(reject(InvalidParentReason::UnknownParent));
    }

    let mut children: HashMap<&RoleId, Vec<&RoleId>> = HashMap::new();
    for role in roles {
        if let Some(parent) = &role.parent_role_id {
            children.entry(parent).or_default().push(&role.id);
        }
    }

    // Breadth-first over the child's subtree, tracking the deepest level.
    let mut visited: HashSet<&RoleId> = HashSet::from([child]);
    let mut queue = VecDeque::from([(child, 1_usize)]);
    let mut subtree_height = 1;
    while let Some((current, level)) = queue.pop_front() {
        subtree_height = subtree_height.max(level);
        for &next in children.get(current).into_iter().flatten() {
            if next == proposed_parent {
                return Err(reject(InvalidParentReason::Cycle));
            }
            if visited.insert(next) {
                queue.push_back((next, level + 1));
            }
        }
    }

    if let Some(max_depth) = max_depth {
        let mut parent_chain = 0;
        let mut seen: HashSet<&RoleId> = HashSet::new();
        let mut cursor = Some(proposed_parent);
        while let Some(id) = cursor {
            if !seen.insert(id) || id == child {
                // Existing data is already cyclic above the parent.
                return Err(reject(InvalidParentReason::Cycle));
            }
            parent_chain += 1;
            cursor = by_id.get(id).and_then(|role| role.parent_role_id.as_ref());
        }
        if parent_chain + subtree_height > max_depth {
            return Err(reject(InvalidParentReason::DepthExceeded { max_depth }));
        }
    }

    Ok(())
}

/// Loads a role and its parent chain, the role itself first.
///
/// Missing roles end the chain. Cycles and chains longer than `max_depth`
/// are reported as errors.
pub async fn role_chain(
    store: &dyn RoleStore,
    role: &RoleId,
    max_depth: usize,
) -> Result<Vec<Role>> {
    let mut chain: Vec<Role> = Vec::new();
    let mut visited = HashSet::new();
    let mut cursor = Some(role.clone());

    while let Some(id) = cursor {
        if !visited.insert(id.clone()) {
            return Err(Error::RoleCycleDetected { role: id });
        }
        if chain.len() >= max_depth {
            return Err(Error::RoleDepthExceeded {
                role: id,
                max_depth,
            });
        }
        let Some(current) = store.role(&id).await.map_err(Error::from)? else {
            break;
        };
        cursor = current.parent_role_id.clone();
        chain.push(current);
    }

    Ok(chain)
}

/// Returns `role` and every role below it in the hierarchy.
pub fn descendants_of(roles: &[Role], role: &RoleId) -> Vec<RoleId> {
    let mut result = vec![role.clone()];
    let mut seen: HashSet<&RoleId> = HashSet::from([role]);
    let mut index = 0;
    while index < result.len() {
        let current = result[index].clone();
        for candidate in roles {
            if candidate.parent_role_id.as_ref() == Some(&current) && seen.insert(&candidate.id) {
                result.push(candidate.id.clone());
            }
        }
        index += 1;
    }
    result
}
