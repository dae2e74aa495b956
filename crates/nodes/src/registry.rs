//! Process-wide executor registry.
//!
//! Built at worker init from [`crate::builtins`] plus any executors a host
//! registers before calling [`ExecutorRegistry::freeze`]. Registration after
//! freezing is rejected — the registry is read-only for the lifetime of the
//! worker process, frozen before it begins processing any task.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::traits::Executor;

/// Errors raised while registering or looking up executors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("executor '{0}' is already registered")]
    DuplicateName(String),

    #[error("registry is frozen; cannot register '{0}'")]
    Frozen(String),

    #[error("no executor registered for type '{0}'")]
    Unknown(String),
}

/// Maps executor-type names (the DAG node's `type` field) to implementations.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
    frozen: bool,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under `name`. Rejects duplicate names and any
    /// registration attempted after [`Self::freeze`].
    pub fn register(
        &mut self,
        name: impl Into<String>,
        executor: Arc<dyn Executor>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.frozen {
            return Err(RegistryError::Frozen(name));
        }
        if self.executors.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    /// Prevent further registration. Idempotent.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Look up the executor registered for `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Executor>, RegistryError> {
        self.executors
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNode;
    use serde_json::json;

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ExecutorRegistry::new();
        registry
            .register("echo", Arc::new(MockNode::returning("echo", json!({}))))
            .unwrap();
        let err = registry
            .register("echo", Arc::new(MockNode::returning("echo", json!({}))))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(n) if n == "echo"));
    }

    #[test]
    fn registration_after_freeze_is_rejected() {
        let mut registry = ExecutorRegistry::new();
        registry.freeze();
        let err = registry
            .register("echo", Arc::new(MockNode::returning("echo", json!({}))))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Frozen(n) if n == "echo"));
    }

    #[test]
    fn unknown_executor_lookup_errors() {
        let registry = ExecutorRegistry::new();
        assert!(matches!(registry.get("missing"), Err(RegistryError::Unknown(_))));
    }
}
