//! Process-wide checker for applications that wire permissions once at
//! startup. Tests should build isolated [`PermissionChecker`] instances.

use std::sync::{Arc, OnceLock};

use crate::checker::PermissionChecker;

static CHECKER: OnceLock<Arc<PermissionChecker>> = OnceLock::new();

/// Installs the process-wide checker.
///
/// Returns the rejected checker if one is already installed.
pub fn install(checker: Arc<PermissionChecker>) -> Result<(), Arc<PermissionChecker>> {
    CHECKER.set(checker)?;
    tracing::info!("global permission checker installed");
    Ok(())
}

/// Returns the process-wide checker, if installed.
pub fn global() -> Option<Arc<PermissionChecker>> {
    CHECKER.get().cloned()
}

#[cfg(all(test, feature = "memory-store"))]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    #[test]
    fn second_install_should_be_rejected() {
        let first = Arc::new(PermissionChecker::builder(Arc::new(MemoryStore::new())).build());
        let second = Arc::new(PermissionChecker::builder(Arc::new(MemoryStore::new())).build());

        let _ = install(first);
        assert!(global().is_some());
        assert!(install(second).is_err());
    }
}
