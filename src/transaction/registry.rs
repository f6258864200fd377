//! Name-keyed discovery of transaction managers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::manager::TransactionManager;

/// Registry of transaction managers, for code that locates its manager by
/// name instead of having it injected.
#[derive(Debug, Clone, Default)]
pub struct TransactionRegistry {
    managers: Arc<RwLock<HashMap<String, TransactionManager>>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a manager under its own name, replacing any previous binding.
    pub fn bind(&self, manager: TransactionManager) -> Option<TransactionManager> {
        let name = manager.name().to_string();
        debug!(name = %name, "bound transaction manager");
        self.managers.write().insert(name, manager)
    }

    pub fn unbind(&self, name: &str) -> Option<TransactionManager> {
        self.managers.write().remove(name)
    }

    /// Look a manager up by name.
    ///
    /// Fails with [`TransactionError::ManagerUnavailable`] when nothing is
    /// bound under `name` or the bound manager has shut down.
    pub fn lookup(&self, name: &str) -> TransactionResult<TransactionManager> {
        self.managers
            .read()
            .get(name)
            .filter(|manager| manager.is_available())
            .cloned()
            .ok_or_else(|| TransactionError::ManagerUnavailable {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.managers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::InMemoryQueues;

    fn manager(name: &str) -> TransactionManager {
        TransactionManager::named(name, Arc::new(InMemoryQueues::new()))
    }

    #[test]
    fn test_lookup_bound() {
        let registry = TransactionRegistry::new();
        registry.bind(manager("queues"));

        let found = registry.lookup("queues").unwrap();
        assert_eq!(found.name(), "queues");
        assert_eq!(registry.names(), vec!["queues"]);
    }

    #[test]
    fn test_lookup_missing() {
        let registry = TransactionRegistry::new();
        let err = registry.lookup("nowhere").unwrap_err();
        assert!(matches!(err, TransactionError::ManagerUnavailable { name } if name == "nowhere"));
    }

    #[test]
    fn test_lookup_after_shutdown() {
        let registry = TransactionRegistry::new();
        let bound = manager("queues");
        registry.bind(bound.clone());
        bound.shutdown();

        assert!(registry.lookup("queues").is_err());
        assert!(registry.unbind("queues").is_some());
    }
}
