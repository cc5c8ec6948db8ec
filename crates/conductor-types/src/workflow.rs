//! Workflow domain types for Conductor.
//!
//! Defines the immutable definition model (`WorkflowDefinition`, `TaskDefinition`,
//! `ActionDefinition`), the declarative data-movement primitives (`Binding`,
//! `RepeaterConfig`, `Extraction`) and the run request/response envelopes
//! exchanged with the execution engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A named, reusable workflow: an ordered list of tasks plus lifecycle hooks.
///
/// Immutable once registered; the engine shares it behind an `Arc`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Unique workflow name (registry key).
    pub name: String,
    /// Location the definition was loaded from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered task list.
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    /// Bindings applied to the run scope before any task runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init: Vec<Binding>,
    /// Bindings producing the run response data after all tasks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post: Vec<Binding>,
    /// Task run as recovery when the main task loop fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error_task: Option<String>,
    /// Task always run once the run finishes (best-effort cleanup).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_task: Option<String>,
    /// Sleep applied after the workflow finishes, in milliseconds.
    #[serde(default)]
    pub sleep_time_ms: u64,
    /// When true, nested runs write directly into the caller's scope.
    #[serde(default)]
    pub shared_state: bool,
}

impl WorkflowDefinition {
    /// Find a task by name.
    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Whether a task with the given name exists.
    pub fn has_task(&self, name: &str) -> bool {
        self.task(name).is_some()
    }
}

// ---------------------------------------------------------------------------
// Task Definition
// ---------------------------------------------------------------------------

/// An ordered group of actions sharing Init/Post bindings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    /// Task name, unique within its workflow.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered actions.
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
    /// Criteria expression; an empty or absent predicate means "run".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post: Vec<Binding>,
    /// Pacing budget: the task sleeps for whatever part of this is unused.
    #[serde(default)]
    pub time_spent_ms: u64,
}

// ---------------------------------------------------------------------------
// Action Definition
// ---------------------------------------------------------------------------

/// One dispatch to a registered service operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    /// Service id, e.g. `workflow` or `storage`.
    pub service: String,
    /// Action name exposed by the service.
    pub action: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque request payload; placeholders are expanded before dispatch.
    #[serde(default)]
    pub request: Map<String, Value>,
    /// Criteria expression; false skips just this action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Criteria expression; true skips this action and the rest of its tag group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<String>,
    /// Run concurrently with the task's other async actions.
    #[serde(default, rename = "async")]
    pub is_async: bool,
    /// Grouping label for skip/filter semantics.
    #[serde(default, rename = "tagId", skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<String>,
    /// Retry/poll configuration.
    #[serde(default)]
    pub repeater: RepeaterConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post: Vec<Binding>,
}

impl ActionDefinition {
    /// Convenience constructor used by inline definitions and tests.
    pub fn new(service: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            ..Default::default()
        }
    }

    /// `service.action` identifier used in logs and events.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.service, self.action)
    }
}

// ---------------------------------------------------------------------------
// Repeater
// ---------------------------------------------------------------------------

/// Retry/poll configuration attached to an action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepeaterConfig {
    /// Attempt count; values <= 1 mean exactly one attempt.
    #[serde(default)]
    pub repeat: i64,
    /// Sleep between attempts in milliseconds.
    #[serde(default)]
    pub sleep_time_ms: u64,
    /// Exit criteria evaluated after every attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<String>,
    /// Ordered extraction rules applied to each attempt's textual output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extraction: Vec<Extraction>,
}

impl RepeaterConfig {
    /// Number of attempts after normalization (never below one).
    pub fn attempts(&self) -> u32 {
        if self.repeat <= 1 {
            1
        } else {
            u32::try_from(self.repeat).unwrap_or(u32::MAX)
        }
    }
}

/// Regex extraction rule applied to repeater output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    /// Target key in the extraction set.
    pub key: String,
    /// Regular expression; capture group 1 (or the whole match) is extracted.
    pub pattern: String,
    /// Clear the key before each attempt.
    #[serde(default)]
    pub reset: bool,
    /// Fail the repeater if the pattern never matched.
    #[serde(default)]
    pub required: bool,
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Declarative `name <- from` data movement between scopes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// Target path in the output scope; a `->` prefix appends to an array.
    pub name: String,
    /// Source path (or `$` template) in the input scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Literal default used when `from` is absent or unresolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Remove the target before resolving.
    #[serde(default)]
    pub reset: bool,
    /// Fail when nothing resolves.
    #[serde(default)]
    pub required: bool,
}

impl Binding {
    /// Binding reading `from` into `name`.
    pub fn from_path(name: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from: Some(from.into()),
            ..Default::default()
        }
    }

    /// Binding writing a literal (placeholder-expanded) value into `name`.
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Run request / response
// ---------------------------------------------------------------------------

/// Request to run a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Registered workflow name; takes precedence over `source` for lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Combined `location[:tasks]` reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Inline definition registered before the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowDefinition>,
    /// Task selector: `*`, a single name or a comma list. Empty means `*`.
    #[serde(default)]
    pub tasks: String,
    /// Parameters exposed as `params`.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Also merge parameters directly into the run scope.
    #[serde(default)]
    pub publish_parameters: bool,
    /// Alias the caller's scope instead of cloning it.
    #[serde(default)]
    pub shared_state: bool,
    /// Dispatch the whole run in the background and return immediately.
    #[serde(default, rename = "async")]
    pub is_async: bool,
    /// Only actions carrying one of these tag ids run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_ids: Vec<String>,
}

impl RunRequest {
    /// Request running every task of a registered workflow.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Request resolving a `location[:tasks]` reference.
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    pub fn with_tasks(mut self, tasks: impl Into<String>) -> Self {
        self.tasks = tasks.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Result of a workflow run.
///
/// Failures travel through the `Result` error channel; there is no inline
/// error field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    /// Run identifier (also carried by every lifecycle event).
    pub run_id: Uuid,
    /// Output produced by the workflow's Post bindings.
    #[serde(default)]
    pub data: Map<String, Value>,
}
