//! Workflow Dao port: loading definitions that are not yet registered.
//!
//! The engine consults the Dao when a run names a workflow the registry does
//! not hold. Document decoding belongs to implementations; the engine only
//! receives a `WorkflowDefinition`.

use std::future::Future;
use std::pin::Pin;

use conductor_types::error::RepositoryError;
use conductor_types::workflow::WorkflowDefinition;

/// Source of workflow definitions keyed by location.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowDao: Send + Sync {
    /// Load the definition stored at `location`.
    fn load(
        &self,
        location: &str,
    ) -> impl Future<Output = Result<WorkflowDefinition, RepositoryError>> + Send;
}

/// Object-safe version of [`WorkflowDao`] with boxed futures.
pub trait WorkflowDaoDyn: Send + Sync {
    fn load_boxed<'a>(
        &'a self,
        location: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<WorkflowDefinition, RepositoryError>> + Send + 'a>>;
}

impl<T: WorkflowDao> WorkflowDaoDyn for T {
    fn load_boxed<'a>(
        &'a self,
        location: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<WorkflowDefinition, RepositoryError>> + Send + 'a>> {
        Box::pin(self.load(location))
    }
}

/// Type-erased Dao held by the engine.
pub struct BoxWorkflowDao {
    inner: Box<dyn WorkflowDaoDyn + Send + Sync>,
}

impl BoxWorkflowDao {
    pub fn new<T: WorkflowDao + 'static>(dao: T) -> Self {
        Self {
            inner: Box::new(dao),
        }
    }

    pub async fn load(&self, location: &str) -> Result<WorkflowDefinition, RepositoryError> {
        self.inner.load_boxed(location).await
    }
}

impl std::fmt::Debug for BoxWorkflowDao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxWorkflowDao").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl WorkflowDao for Fixed {
        async fn load(&self, location: &str) -> Result<WorkflowDefinition, RepositoryError> {
            if location == "deploy" {
                Ok(WorkflowDefinition {
                    name: "deploy".to_string(),
                    source: Some(location.to_string()),
                    ..Default::default()
                })
            } else {
                Err(RepositoryError::NotFound(location.to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_boxed_dao_delegates() {
        let dao = BoxWorkflowDao::new(Fixed);
        let def = dao.load("deploy").await.unwrap();
        assert_eq!(def.source.as_deref(), Some("deploy"));
        assert!(matches!(
            dao.load("other").await.unwrap_err(),
            RepositoryError::NotFound(_)
        ));
    }
}
