//! In-memory workflow Dao.
//!
//! Stores definitions (or raw JSON documents) by location. Relative
//! locations (a bare name without scheme or path) resolve against the
//! repository base as `{repository}/{name}`.

use std::sync::Arc;

use conductor_core::repository::workflow::WorkflowDao;
use conductor_types::error::RepositoryError;
use conductor_types::workflow::WorkflowDefinition;
use dashmap::DashMap;
use serde_json::Value;

#[derive(Debug, Clone)]
enum Entry {
    Definition(WorkflowDefinition),
    Document(Value),
}

/// Concurrent location -> workflow map.
#[derive(Debug, Clone)]
pub struct MemoryWorkflowDao {
    repository: String,
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryWorkflowDao {
    /// Create a Dao whose relative locations resolve under `repository`.
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into().trim_end_matches('/').to_string(),
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Expand a relative location to `{repository}/{name}`.
    pub fn resolve(&self, location: &str) -> String {
        let location = location.trim();
        if location.contains("://") || location.starts_with('/') || location.contains('/') {
            location.to_string()
        } else {
            format!("{}/{}", self.repository, location)
        }
    }

    /// Store a definition; relative locations are resolved first.
    pub fn insert(&self, location: &str, definition: WorkflowDefinition) {
        let key = self.resolve(location);
        tracing::debug!(location = %key, workflow = %definition.name, "workflow stored");
        self.entries.insert(key, Entry::Definition(definition));
    }

    /// Store a JSON document, decoded on load.
    pub fn insert_document(&self, location: &str, document: Value) {
        let key = self.resolve(location);
        tracing::debug!(location = %key, "workflow document stored");
        self.entries.insert(key, Entry::Document(document));
    }

    pub fn contains(&self, location: &str) -> bool {
        self.entries.contains_key(&self.resolve(location))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl WorkflowDao for MemoryWorkflowDao {
    async fn load(&self, location: &str) -> Result<WorkflowDefinition, RepositoryError> {
        if location.trim().is_empty() {
            return Err(RepositoryError::InvalidLocation(
                "location must not be empty".to_string(),
            ));
        }
        let key = self.resolve(location);
        let entry = self
            .entries
            .get(&key)
            .map(|e| e.value().clone())
            .ok_or_else(|| RepositoryError::NotFound(key.clone()))?;

        let mut definition = match entry {
            Entry::Definition(definition) => definition,
            Entry::Document(document) => serde_json::from_value(document)
                .map_err(|e| RepositoryError::Decode(format!("{key}: {e}")))?,
        };
        if definition.source.is_none() {
            definition.source = Some(key);
        }
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::WorkflowEngine;
    use conductor_types::workflow::RunRequest;
    use serde_json::json;

    fn document(name: &str) -> Value {
        json!({
            "name": name,
            "tasks": [{
                "name": "main",
                "actions": [{"service": "workflow", "action": "nop", "request": {"ok": true}}],
                "post": [{"name": "result", "from": "response.ok"}]
            }],
            "post": [{"name": "result", "from": "result"}]
        })
    }

    #[test]
    fn resolve_relative_locations() {
        let dao = MemoryWorkflowDao::new("mem://repo/");
        assert_eq!(dao.resolve("deploy"), "mem://repo/deploy");
        assert_eq!(dao.resolve("mem://other/x"), "mem://other/x");
        assert_eq!(dao.resolve("/abs/path"), "/abs/path");
    }

    #[tokio::test]
    async fn load_sets_source_and_reports_missing() {
        let dao = MemoryWorkflowDao::new("mem://repo");
        dao.insert_document("deploy", document("deploy"));

        let def = dao.load("deploy").await.unwrap();
        assert_eq!(def.name, "deploy");
        assert_eq!(def.source.as_deref(), Some("mem://repo/deploy"));

        let err = dao.load("absent").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(ref l) if l == "mem://repo/absent"));
    }

    #[tokio::test]
    async fn load_reports_decode_errors() {
        let dao = MemoryWorkflowDao::new("mem://repo");
        dao.insert_document("broken", json!({"tasks": "not a list"}));
        assert!(matches!(
            dao.load("broken").await.unwrap_err(),
            RepositoryError::Decode(_)
        ));
    }

    #[tokio::test]
    async fn engine_loads_unregistered_workflow_through_dao() {
        let dao = MemoryWorkflowDao::new("mem://repo");
        dao.insert_document("deploy", document("deploy"));
        let engine = WorkflowEngine::builder().dao(dao.clone()).build();

        let response = engine
            .run(RunRequest::from_source("mem://repo/deploy:main"))
            .await
            .unwrap();
        assert_eq!(response.data["result"], json!(true));
        assert!(engine.registry().contains("deploy").await);

        let err = engine.run(RunRequest::named("unknown")).await.unwrap_err();
        assert!(err.is_lookup());
    }
}
