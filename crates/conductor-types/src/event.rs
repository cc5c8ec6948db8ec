//! Lifecycle events for the Conductor event bus.
//!
//! `EngineEvent` is broadcast by the execution engine as runs progress. All
//! variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Events emitted while a workflow run executes.
///
/// Consumed by CLI renderers, telemetry exporters and tests. Publishing is
/// fire-and-forget: events with no subscriber are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A workflow definition was resolved for a run.
    WorkflowLoaded {
        run_id: Uuid,
        workflow_name: String,
        source: Option<String>,
    },

    /// The run scope was seeded and workflow Init bindings applied.
    WorkflowInit {
        run_id: Uuid,
        workflow_name: String,
        tasks: Vec<String>,
    },

    /// A task passed its `when` predicate and is about to run.
    TaskStarted {
        run_id: Uuid,
        workflow_name: String,
        task: String,
    },

    /// A task finished (successfully or not).
    TaskEnded {
        run_id: Uuid,
        workflow_name: String,
        task: String,
        duration_ms: u64,
        error: Option<String>,
    },

    /// An action is being dispatched to its service.
    ActivityStarted {
        run_id: Uuid,
        task: String,
        service: String,
        action: String,
        tag_id: Option<String>,
        request: Value,
    },

    /// An action returned (successfully or not).
    ActivityEnded {
        run_id: Uuid,
        task: String,
        service: String,
        action: String,
        attempts: u32,
        duration_ms: u64,
        error: Option<String>,
    },

    /// A batch of async actions was launched for a task.
    AsyncActionDispatched {
        run_id: Uuid,
        task: String,
        actions: Vec<String>,
    },

    /// Bindings wrote into a scope.
    StateModified {
        run_id: Uuid,
        stage: String,
        keys: Vec<String>,
    },

    /// A run ended. Published unconditionally.
    WorkflowEnded {
        run_id: Uuid,
        workflow_name: String,
        duration_ms: u64,
        error: Option<String>,
    },
}

impl EngineEvent {
    /// Run identifier carried by every variant.
    pub fn run_id(&self) -> Uuid {
        match self {
            EngineEvent::WorkflowLoaded { run_id, .. }
            | EngineEvent::WorkflowInit { run_id, .. }
            | EngineEvent::TaskStarted { run_id, .. }
            | EngineEvent::TaskEnded { run_id, .. }
            | EngineEvent::ActivityStarted { run_id, .. }
            | EngineEvent::ActivityEnded { run_id, .. }
            | EngineEvent::AsyncActionDispatched { run_id, .. }
            | EngineEvent::StateModified { run_id, .. }
            | EngineEvent::WorkflowEnded { run_id, .. } => *run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_loaded_serde_roundtrip() {
        let event = EngineEvent::WorkflowLoaded {
            run_id: Uuid::nil(),
            workflow_name: "deploy".to_string(),
            source: Some("mem://repo/deploy".to_string()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"workflow_loaded\""));
        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, EngineEvent::WorkflowLoaded { .. }));
    }

    #[test]
    fn test_activity_ended_serde_roundtrip() {
        let event = EngineEvent::ActivityEnded {
            run_id: Uuid::nil(),
            task: "ship".to_string(),
            service: "storage".to_string(),
            action: "copy".to_string(),
            attempts: 2,
            duration_ms: 15,
            error: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"activity_ended\""));
        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, EngineEvent::ActivityEnded { attempts: 2, .. }));
    }

    #[test]
    fn test_run_id_accessor() {
        let id = Uuid::now_v7();
        let event = EngineEvent::WorkflowEnded {
            run_id: id,
            workflow_name: "deploy".to_string(),
            duration_ms: 0,
            error: Some("boom".to_string()),
        };
        assert_eq!(event.run_id(), id);
    }
}
