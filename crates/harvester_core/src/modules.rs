use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Detected component versions, keyed by component name.
///
/// Cloning yields another handle to the same map.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    versions: Arc<RwLock<BTreeMap<String, String>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `version` for `name`, replacing any earlier version.
    pub fn register_module(&self, name: impl Into<String>, version: impl Into<String>) {
        let mut versions = self.versions.write().unwrap_or_else(PoisonError::into_inner);
        versions.insert(name.into(), version.into());
    }

    pub fn version(&self, name: &str) -> Option<String> {
        let versions = self.versions.read().unwrap_or_else(PoisonError::into_inner);
        versions.get(name).cloned()
    }

    /// Point-in-time copy, ordered by name.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.versions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.versions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
