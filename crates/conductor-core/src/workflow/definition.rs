//! Workflow error taxonomy and definition validation.
//!
//! `WorkflowError` is the single error type surfaced by the engine; its
//! variants mirror how a failure should be treated (validation and lookup
//! failures are fatal, action failures are recoverable through an
//! on-error task). `validate_definition` runs on every registration.

use std::collections::HashSet;

use conductor_types::error::RepositoryError;
use conductor_types::workflow::WorkflowDefinition;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while registering or running workflows.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed request or definition.
    #[error("validation error: {0}")]
    Validation(String),

    /// No workflow registered (or loadable) under this name.
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    /// Task name not present in the workflow.
    #[error("task '{task}' not found in workflow '{workflow}'")]
    TaskNotFound { workflow: String, task: String },

    /// No service registered under this id.
    #[error("service '{0}' not found")]
    ServiceNotFound(String),

    /// Service does not expose the action.
    #[error("action '{action}' not found on service '{service}'")]
    ActionNotFound { service: String, action: String },

    /// Criteria expression failed to evaluate.
    #[error("criteria '{expression}' failed: {message}")]
    Criteria { expression: String, message: String },

    /// The underlying service call failed.
    #[error("{service}.{action} failed: {message}")]
    Action {
        service: String,
        action: String,
        message: String,
    },

    /// A concurrent branch failed.
    #[error("async {service}.{action} failed: {message}")]
    AsyncAction {
        service: String,
        action: String,
        message: String,
    },

    /// Several concurrent branches failed (`AsyncErrorPolicy::All`).
    #[error("{} async actions failed: {}", .0.len(), join_messages(.0))]
    AsyncActions(Vec<WorkflowError>),

    /// A required binding resolved to nothing.
    #[error("binding error: {0}")]
    Binding(String),

    /// A required repeater extraction never matched.
    #[error("required extraction '{key}' did not match (pattern: {pattern})")]
    ExtractionRequired { key: String, pattern: String },

    /// Nested runs exceeded the configured stack depth.
    #[error("run stack depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: usize, max: usize },

    /// Workflow Dao failure.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl WorkflowError {
    /// Unknown workflow, task, service or action.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            WorkflowError::WorkflowNotFound(_)
                | WorkflowError::TaskNotFound { .. }
                | WorkflowError::ServiceNotFound(_)
                | WorkflowError::ActionNotFound { .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, WorkflowError::Validation(_))
    }
}

fn join_messages(errors: &[WorkflowError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty
/// - At least one task exists
/// - Task names are non-empty and unique
/// - `on_error_task` and `defer_task` name existing tasks
/// - Every action names a service and an action
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }

    if def.tasks.is_empty() {
        return Err(WorkflowError::Validation(format!(
            "workflow '{}' must have at least one task",
            def.name
        )));
    }

    let mut seen = HashSet::new();
    for task in &def.tasks {
        if task.name.trim().is_empty() {
            return Err(WorkflowError::Validation(format!(
                "workflow '{}' has a task without a name",
                def.name
            )));
        }
        if !seen.insert(task.name.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "duplicate task name: '{}'",
                task.name
            )));
        }
        for (idx, action) in task.actions.iter().enumerate() {
            if action.service.trim().is_empty() || action.action.trim().is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "task '{}' action #{} must name a service and an action",
                    task.name, idx
                )));
            }
        }
    }

    for (label, reference) in [
        ("onErrorTask", def.on_error_task.as_deref()),
        ("deferTask", def.defer_task.as_deref()),
    ] {
        if let Some(task) = reference {
            if !seen.contains(task) {
                return Err(WorkflowError::Validation(format!(
                    "{label} '{task}' does not name a task of workflow '{}'",
                    def.name
                )));
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
