//! Run frames and the explicit run stack.
//!
//! Every run (including nested `workflow.run` actions) pushes a `Frame` onto
//! the `RunStack` of its execution context. Control-flow commands (goto,
//! switch, exit) only ever address the top-most frame.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_types::workflow::WorkflowDefinition;
use serde_json::Value;
use uuid::Uuid;

use super::definition::WorkflowError;

/// Snapshot of the action most recently dispatched by a frame.
#[derive(Debug, Clone)]
pub struct Activity {
    pub service: String,
    pub action: String,
    pub tag_id: Option<String>,
    /// Expanded request as sent to the service.
    pub request: Value,
    /// Response, once the action returned successfully.
    pub response: Option<Value>,
    pub started_at: DateTime<Utc>,
}

/// Control-flow record of one active run.
#[derive(Debug, Clone)]
pub struct Frame {
    pub run_id: Uuid,
    pub workflow: Arc<WorkflowDefinition>,
    /// Task currently executing.
    pub task_name: Option<String>,
    pub activity: Option<Activity>,
    /// Set by `workflow.exit`; checked before each task and sync action.
    pub terminated: bool,
    /// Pending goto target, cleared when consumed.
    pub scheduled_task: Option<String>,
    /// Captured failure message while the on-error task runs.
    pub error: Option<String>,
}

impl Frame {
    pub fn new(run_id: Uuid, workflow: Arc<WorkflowDefinition>) -> Self {
        Self {
            run_id,
            workflow,
            task_name: None,
            activity: None,
            terminated: false,
            scheduled_task: None,
            error: None,
        }
    }

    /// Store `task` as the pending goto target.
    pub fn schedule(&mut self, task: &str) -> Result<(), WorkflowError> {
        if !self.workflow.has_task(task) {
            return Err(WorkflowError::TaskNotFound {
                workflow: self.workflow.name.clone(),
                task: task.to_string(),
            });
        }
        self.scheduled_task = Some(task.to_string());
        Ok(())
    }

    /// Consume the pending goto target.
    pub fn take_scheduled(&mut self) -> Option<String> {
        self.scheduled_task.take()
    }

    pub fn terminate(&mut self) {
        self.terminated = true;
    }
}

/// Ordered stack of frames; the last element is the top.
#[derive(Debug, Clone, Default)]
pub struct RunStack {
    frames: Vec<Frame>,
}

impl RunStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
