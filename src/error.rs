use crate::types::{ResourceRef, RoleId};
use thiserror::Error;

/// Provider-layer error type.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Provider error wrapper.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// Shared cache store or pub/sub channel failure.
    #[error("cache backend unavailable: {0}")]
    CacheBackend(String),
    /// Cached value could not be encoded or decoded.
    #[error("cache codec error: {0}")]
    Codec(String),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// Invalid permission input.
    #[error("invalid permission: {0}")]
    InvalidPermission(String),
    /// Resource parent chain loops back onto itself.
    #[error("resource cycle detected at {resource}")]
    ResourceCycleDetected { resource: ResourceRef },
    /// Resource parent chain is deeper than allowed.
    #[error("resource ancestry depth exceeded at {resource}; max depth {max_depth}")]
    ResourceDepthExceeded {
        resource: ResourceRef,
        max_depth: usize,
    },
    /// Role parent chain loops back onto itself.
    #[error("role cycle detected at role {role}")]
    RoleCycleDetected { role: RoleId },
    /// Role parent chain is deeper than allowed.
    #[error("role inheritance depth exceeded at role {role}; max depth {max_depth}")]
    RoleDepthExceeded { role: RoleId, max_depth: usize },
    /// Proposed parent role was rejected.
    #[error("invalid parent {parent} for role {role}: {reason}")]
    InvalidParent {
        role: RoleId,
        parent: RoleId,
        reason: InvalidParentReason,
    },
}

/// Why a parent role selection was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidParentReason {
    /// A role cannot be its own parent.
    SelfParent,
    /// The proposed parent sits below the child, so the edge would close a cycle.
    Cycle,
    /// The resulting chain would exceed the configured maximum depth.
    DepthExceeded { max_depth: usize },
    /// The proposed parent role does not exist.
    UnknownParent,
}

impl std::fmt::Display for InvalidParentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfParent => f.write_str("role cannot inherit from itself"),
            Self::Cycle => f.write_str("parent is a descendant of the role"),
            Self::DepthExceeded { max_depth } => {
                write!(f, "hierarchy would exceed max depth {max_depth}")
            }
            Self::UnknownParent => f.write_str("parent role does not exist"),
        }
    }
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Codec(error.to_string())
    }
}
