//! Process-wide store of workflow definitions keyed by name.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_types::workflow::WorkflowDefinition;
use tokio::sync::RwLock;

use super::definition::{WorkflowError, validate_definition};

/// Read/write guarded registry of validated definitions.
///
/// Registering an existing name replaces it (last write wins). Cloning the
/// registry shares the underlying map.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    definitions: Arc<RwLock<HashMap<String, Arc<WorkflowDefinition>>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a definition, returning the shared handle.
    pub async fn register(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        validate_definition(&definition)?;

        let definition = Arc::new(definition);
        let mut defs = self.definitions.write().await;
        let replaced = defs
            .insert(definition.name.clone(), Arc::clone(&definition))
            .is_some();

        tracing::info!(
            workflow = %definition.name,
            tasks = definition.tasks.len(),
            replaced,
            "workflow registered"
        );
        Ok(definition)
    }

    /// Fetch a definition by name.
    pub async fn lookup(&self, name: &str) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.definitions
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::WorkflowNotFound(name.to_string()))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.definitions.read().await.contains_key(name)
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.write().await.remove(name)
    }

    pub async fn len(&self) -> usize {
        self.definitions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.definitions.read().await.is_empty()
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::workflow::{ActionDefinition, TaskDefinition};

    fn workflow(name: &str, description: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            name: name.to_string(),
            description: Some(description.to_string()),
            tasks: vec![TaskDefinition {
                name: "main".to_string(),
                actions: vec![ActionDefinition::new("workflow", "nop")],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = WorkflowRegistry::new();
        registry.register(workflow("deploy", "v1")).await.unwrap();

        assert!(registry.contains("deploy").await);
        let def = registry.lookup("deploy").await.unwrap();
        assert_eq!(def.description.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_register_twice_last_write_wins() {
        let registry = WorkflowRegistry::new();
        registry.register(workflow("deploy", "v1")).await.unwrap();
        registry.register(workflow("deploy", "v2")).await.unwrap();

        assert_eq!(registry.len().await, 1);
        let def = registry.lookup("deploy").await.unwrap();
        assert_eq!(def.description.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_lookup_unknown_is_lookup_error() {
        let registry = WorkflowRegistry::new();
        let err = registry.lookup("missing").await.unwrap_err();
        assert!(err.is_lookup());
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_definition() {
        let registry = WorkflowRegistry::new();
        let invalid = WorkflowDefinition {
            name: "empty".to_string(),
            ..Default::default()
        };
        assert!(registry.register(invalid).await.unwrap_err().is_validation());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_names_sorted_and_remove() {
        let registry = WorkflowRegistry::new();
        registry.register(workflow("b", "")).await.unwrap();
        registry.register(workflow("a", "")).await.unwrap();
        assert_eq!(registry.names().await, vec!["a", "b"]);

        assert!(registry.remove("a").await.is_some());
        assert_eq!(registry.names().await, vec!["b"]);
    }
}
