//! Built-in `workflow` service: nested runs and control flow.
//!
//! | action     | effect                                                  |
//! |------------|---------------------------------------------------------|
//! | `run`      | run another workflow on the caller's stack              |
//! | `switch`   | run the task/action of the first matching case          |
//! | `goto`     | schedule a task of the current frame                    |
//! | `exit`     | terminate the current frame                             |
//! | `fail`     | fail with a message                                     |
//! | `nop`      | echo the request                                        |
//! | `print`    | log a message                                           |
//! | `register` | register an inline definition                           |

use conductor_types::workflow::{ActionDefinition, RunRequest, WorkflowDefinition};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::service::{ActionContext, Service, ServiceError, decode_request};

use super::definition::WorkflowError;
use super::scope::value_to_string;

const ACTIONS: &[&str] = &[
    "run", "switch", "goto", "exit", "fail", "nop", "print", "register",
];

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GotoRequest {
    task: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrintRequest {
    #[serde(default)]
    message: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    workflow: WorkflowDefinition,
}

/// Task or single action to run when a switch case matches.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchTarget {
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub action: Option<ActionDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchCase {
    pub value: Value,
    #[serde(flatten)]
    pub target: SwitchTarget,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchRequest {
    /// Scope path whose value selects the case.
    pub source_key: String,
    #[serde(default)]
    pub cases: Vec<SwitchCase>,
    #[serde(default)]
    pub default: Option<SwitchTarget>,
}

impl SwitchRequest {
    /// First case whose value matches `actual` by string form, else the default.
    pub fn select(&self, actual: Option<&Value>) -> Option<&SwitchTarget> {
        let actual = actual.map(value_to_string);
        self.cases
            .iter()
            .find(|case| actual.as_deref() == Some(value_to_string(&case.value).as_str()))
            .map(|case| &case.target)
            .or(self.default.as_ref())
    }
}

// ---------------------------------------------------------------------------
// ControlService
// ---------------------------------------------------------------------------

/// Registered under id `workflow` by every engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlService;

impl ControlService {
    async fn run_nested(
        &self,
        ctx: ActionContext,
        request: Map<String, Value>,
    ) -> Result<Value, ServiceError> {
        let request: RunRequest = decode_request(request)?;
        let response = ctx
            .engine
            .run_with(ctx.exec.clone(), request)
            .await
            .map_err(|err| ServiceError::Failed(err.to_string()))?;
        Ok(Value::Object(response.data))
    }

    async fn switch(
        &self,
        ctx: ActionContext,
        request: Map<String, Value>,
    ) -> Result<Value, ServiceError> {
        let request: SwitchRequest = decode_request(request)?;
        let actual = ctx.exec.scope().get(&request.source_key);
        let Some(target) = request.select(actual.as_ref()) else {
            tracing::debug!(source_key = %request.source_key, "switch: no case matched");
            return Ok(Value::Null);
        };

        let mut result = Value::Null;
        if let Some(task) = &target.task {
            tracing::debug!(source_key = %request.source_key, task = %task, "switch: running task");
            ctx.engine.run_task_in(&ctx.exec, task).await?;
            result = json!({ "task": task });
        }
        if let Some(action) = &target.action {
            tracing::debug!(source_key = %request.source_key, action = %action.qualified_name(), "switch: running action");
            result = ctx
                .engine
                .run_action_in(&ctx.exec, action)
                .await?
                .unwrap_or(Value::Null);
        }
        Ok(result)
    }

    fn goto(&self, ctx: &ActionContext, request: Map<String, Value>) -> Result<Value, ServiceError> {
        let request: GotoRequest = decode_request(request)?;
        ctx.exec
            .with_top(|frame| frame.schedule(&request.task))
            .ok_or_else(|| {
                WorkflowError::Validation("goto outside of a workflow run".to_string())
            })??;
        Ok(json!({ "task": request.task }))
    }

    fn exit(&self, ctx: &ActionContext) -> Result<Value, ServiceError> {
        ctx.exec
            .with_top(|frame| frame.terminate())
            .ok_or_else(|| WorkflowError::Validation("exit outside of a workflow run".to_string()))?;
        Ok(Value::Null)
    }
}

impl Service for ControlService {
    fn id(&self) -> &str {
        "workflow"
    }

    fn actions(&self) -> &[&str] {
        ACTIONS
    }

    async fn run(
        &self,
        ctx: ActionContext,
        action: &str,
        request: Map<String, Value>,
    ) -> Result<Value, ServiceError> {
        match action {
            "run" => self.run_nested(ctx, request).await,
            "switch" => self.switch(ctx, request).await,
            "goto" => self.goto(&ctx, request),
            "exit" => self.exit(&ctx),
            "fail" => {
                let request: FailRequest = decode_request(request)?;
                Err(ServiceError::Failed(
                    request
                        .message
                        .unwrap_or_else(|| format!("{} requested failure", ctx.caller_id)),
                ))
            }
            "nop" => Ok(Value::Object(request)),
            "print" => {
                let request: PrintRequest = decode_request(request)?;
                let message = value_to_string(&request.message);
                tracing::info!(caller = %ctx.caller_id, "{message}");
                Ok(Value::String(message))
            }
            "register" => {
                let request: RegisterRequest = decode_request(request)?;
                let definition = ctx.engine.register(request.workflow).await?;
                Ok(json!({ "name": definition.name }))
            }
            other => Err(ServiceError::InvalidRequest(format!(
                "unsupported workflow action '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::ExecutionContext;
    use crate::workflow::executor::WorkflowEngine;
    use crate::workflow::frame::Frame;
    use conductor_types::workflow::TaskDefinition;
    use std::sync::Arc;

    fn switch_request(value: Value) -> SwitchRequest {
        serde_json::from_value(value).unwrap()
    }

    fn action_ctx(engine: &WorkflowEngine) -> ActionContext {
        let exec = ExecutionContext::new();
        let definition = WorkflowDefinition {
            name: "w".to_string(),
            tasks: vec![TaskDefinition {
                name: "next".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        exec.push_frame(Frame::new(uuid::Uuid::nil(), Arc::new(definition)));
        ActionContext {
            engine: engine.clone(),
            exec,
            caller_id: "workflow.test".to_string(),
        }
    }

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_switch_select_compares_string_forms() {
        let request = switch_request(json!({
            "sourceKey": "code",
            "cases": [
                {"value": 200, "task": "ok"},
                {"value": "404", "task": "missing"}
            ],
            "default": {"task": "other"}
        }));

        let ok = request.select(Some(&json!("200"))).unwrap();
        assert_eq!(ok.task.as_deref(), Some("ok"));
        let missing = request.select(Some(&json!(404))).unwrap();
        assert_eq!(missing.task.as_deref(), Some("missing"));
        let other = request.select(None).unwrap();
        assert_eq!(other.task.as_deref(), Some("other"));
    }

    #[test]
    fn test_switch_select_without_default() {
        let request = switch_request(json!({"sourceKey": "k", "cases": [{"value": "a", "task": "A"}]}));
        assert!(request.select(Some(&json!("b"))).is_none());
    }

    #[tokio::test]
    async fn test_goto_schedules_on_top_frame() {
        let engine = WorkflowEngine::builder().build();
        let ctx = action_ctx(&engine);

        ControlService
            .run(ctx.clone(), "goto", map(json!({"task": "next"})))
            .await
            .unwrap();
        assert_eq!(
            ctx.exec.with_top(|f| f.scheduled_task.clone()).flatten().as_deref(),
            Some("next")
        );

        let err = ControlService
            .run(ctx, "goto", map(json!({"task": "nowhere"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Workflow(ref e) if e.is_lookup()));
    }

    #[tokio::test]
    async fn test_exit_without_frame_is_rejected() {
        let engine = WorkflowEngine::builder().build();
        let ctx = ActionContext {
            engine: engine.clone(),
            exec: ExecutionContext::new(),
            caller_id: "workflow.exit".to_string(),
        };
        assert!(ControlService.run(ctx, "exit", Map::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_exit_terminates_top_frame() {
        let engine = WorkflowEngine::builder().build();
        let ctx = action_ctx(&engine);
        ControlService.run(ctx.clone(), "exit", Map::new()).await.unwrap();
        assert!(ctx.exec.is_terminated());
    }

    #[tokio::test]
    async fn test_fail_nop_and_print() {
        let engine = WorkflowEngine::builder().build();
        let ctx = action_ctx(&engine);

        let err = ControlService
            .run(ctx.clone(), "fail", map(json!({"message": "stop here"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "stop here");

        let echoed = ControlService
            .run(ctx.clone(), "nop", map(json!({"a": 1})))
            .await
            .unwrap();
        assert_eq!(echoed, json!({"a": 1}));

        let printed = ControlService
            .run(ctx, "print", map(json!({"message": 42})))
            .await
            .unwrap();
        assert_eq!(printed, json!("42"));
    }

    #[tokio::test]
    async fn test_register_adds_definition() {
        let engine = WorkflowEngine::builder().build();
        let ctx = action_ctx(&engine);
        let response = ControlService
            .run(
                ctx,
                "register",
                map(json!({"workflow": {
                    "name": "late",
                    "tasks": [{"name": "t", "actions": [{"service": "workflow", "action": "nop"}]}]
                }})),
            )
            .await
            .unwrap();
        assert_eq!(response, json!({"name": "late"}));
        assert!(engine.registry().contains("late").await);
    }

    #[tokio::test]
    async fn test_run_invalid_request_is_rejected() {
        let engine = WorkflowEngine::builder().build();
        let ctx = action_ctx(&engine);
        let err = ControlService
            .run(ctx, "run", map(json!({"tasks": 5})))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }
}
