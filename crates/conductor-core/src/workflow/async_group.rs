//! Concurrent execution of a task's async actions.
//!
//! Every async action of a task launches together once the task's
//! synchronous pass finishes. Each branch runs on a detached fork of the
//! execution context (private scope, private run stack), so goto/exit issued
//! inside a branch never reach the task. The task waits for every branch at
//! a `JoinSet` barrier; only each action's Post bindings cross back into the
//! parent scope, serialized by a dedicated lock. The activity of the first
//! failing branch is copied onto the parent frame.

use std::sync::Arc;

use conductor_types::config::AsyncErrorPolicy;
use conductor_types::event::EngineEvent;
use conductor_types::workflow::ActionDefinition;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::binding::apply_bindings;
use super::context::ExecutionContext;
use super::definition::WorkflowError;
use super::executor::{WorkflowEngine, post_input};
use super::frame::Activity;
use super::scope::Scope;

// ---------------------------------------------------------------------------
// ErrorCollector
// ---------------------------------------------------------------------------

/// Thread-safe-by-ownership accumulator for branch failures.
///
/// Errors are recorded in join order, which is completion order.
#[derive(Debug)]
pub struct ErrorCollector {
    policy: AsyncErrorPolicy,
    errors: Vec<WorkflowError>,
}

impl ErrorCollector {
    pub fn new(policy: AsyncErrorPolicy) -> Self {
        Self {
            policy,
            errors: Vec::new(),
        }
    }

    pub fn record(&mut self, error: WorkflowError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Collapse the recorded errors according to the policy.
    pub fn into_result(self) -> Result<(), WorkflowError> {
        let mut errors = self.errors;
        match (self.policy, errors.len()) {
            (_, 0) => Ok(()),
            (AsyncErrorPolicy::First, _) | (AsyncErrorPolicy::All, 1) => Err(errors.remove(0)),
            (AsyncErrorPolicy::All, _) => Err(WorkflowError::AsyncActions(errors)),
        }
    }
}

/// Relabel a branch failure as an async action error.
fn as_async_error(action: &ActionDefinition, err: WorkflowError) -> WorkflowError {
    match err {
        WorkflowError::Action {
            service,
            action,
            message,
        } => WorkflowError::AsyncAction {
            service,
            action,
            message,
        },
        err @ WorkflowError::AsyncAction { .. } => err,
        other => WorkflowError::AsyncAction {
            service: action.service.clone(),
            action: action.action.clone(),
            message: other.to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// AsyncActionGroup
// ---------------------------------------------------------------------------

/// One task's batch of async actions.
pub struct AsyncActionGroup<'a> {
    engine: &'a WorkflowEngine,
    ctx: &'a ExecutionContext,
    task: &'a str,
    run_id: Uuid,
}

impl<'a> AsyncActionGroup<'a> {
    pub fn new(
        engine: &'a WorkflowEngine,
        ctx: &'a ExecutionContext,
        task: &'a str,
        run_id: Uuid,
    ) -> Self {
        Self {
            engine,
            ctx,
            task,
            run_id,
        }
    }

    /// Launch every action and wait for all of them.
    pub async fn run(&self, actions: Vec<ActionDefinition>) -> Result<(), WorkflowError> {
        if actions.is_empty() {
            return Ok(());
        }

        self.engine.publish(EngineEvent::AsyncActionDispatched {
            run_id: self.run_id,
            task: self.task.to_string(),
            actions: actions.iter().map(ActionDefinition::qualified_name).collect(),
        });
        tracing::debug!(
            run_id = %self.run_id,
            task = self.task,
            count = actions.len(),
            "dispatching async actions"
        );

        // Fork every branch before any of them can write back Post bindings.
        let branches: Vec<(ActionDefinition, ExecutionContext)> = actions
            .into_iter()
            .map(|action| {
                let branch = self.ctx.fork();
                branch.with_top(|frame| frame.activity = None);
                (action, branch)
            })
            .collect();

        let post_lock = Arc::new(Mutex::new(()));
        let mut join_set = JoinSet::new();

        for (action, branch) in branches {
            let engine = self.engine.clone();
            let parent_scope = self.ctx.scope().clone();
            let lock = Arc::clone(&post_lock);
            let task = self.task.to_string();
            let run_id = self.run_id;

            join_set.spawn(async move {
                run_branch(&engine, &branch, &parent_scope, &lock, &task, &action, run_id)
                    .await
                    .map_err(|err| {
                        let activity = branch.with_top(|frame| frame.activity.take()).flatten();
                        (as_async_error(&action, err), activity)
                    })
            });
        }

        let mut collector = ErrorCollector::new(self.engine.config().async_error_policy);
        let mut failed_activity: Option<Activity> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err((err, activity))) => {
                    tracing::debug!(run_id = %self.run_id, task = self.task, error = %err, "async action failed");
                    if collector.is_empty() {
                        failed_activity = activity;
                    }
                    collector.record(err);
                }
                Err(join_err) => collector.record(WorkflowError::AsyncAction {
                    service: "async".to_string(),
                    action: self.task.to_string(),
                    message: format!("task join error: {join_err}"),
                }),
            }
        }

        // The first failing branch's activity is what on-error handlers see.
        if let Some(activity) = failed_activity {
            self.ctx.with_top(|frame| frame.activity = Some(activity));
        }

        collector.into_result()
    }
}

/// One branch: dispatch on the detached context, then copy Post bindings
/// into the parent scope under the group lock.
async fn run_branch(
    engine: &WorkflowEngine,
    branch: &ExecutionContext,
    parent_scope: &Scope,
    lock: &Mutex<()>,
    task: &str,
    action: &ActionDefinition,
    run_id: Uuid,
) -> Result<(), WorkflowError> {
    let Some(response) = engine.dispatch_action(branch, task, action, run_id).await? else {
        return Ok(());
    };
    if action.post.is_empty() {
        return Ok(());
    }

    let input = post_input(branch.scope(), &response);
    let _guard = lock.lock().await;
    let keys = apply_bindings(&action.post, &input, parent_scope)?;
    engine.state_modified(run_id, "action.post", keys);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(name: &str) -> WorkflowError {
        WorkflowError::AsyncAction {
            service: "svc".to_string(),
            action: name.to_string(),
            message: format!("{name} failed"),
        }
    }

    #[test]
    fn test_collector_empty_is_ok() {
        assert!(ErrorCollector::new(AsyncErrorPolicy::All).into_result().is_ok());
    }

    #[test]
    fn test_collector_first_keeps_first_recorded() {
        let mut collector = ErrorCollector::new(AsyncErrorPolicy::First);
        collector.record(failure("a"));
        collector.record(failure("b"));
        assert_eq!(collector.len(), 2);
        let err = collector.into_result().unwrap_err();
        assert!(err.to_string().contains("a failed"));
    }

    #[test]
    fn test_collector_all_aggregates() {
        let mut collector = ErrorCollector::new(AsyncErrorPolicy::All);
        collector.record(failure("a"));
        collector.record(failure("b"));
        let err = collector.into_result().unwrap_err();
        assert!(matches!(err, WorkflowError::AsyncActions(ref errs) if errs.len() == 2));
    }

    #[test]
    fn test_collector_all_single_error_is_unwrapped() {
        let mut collector = ErrorCollector::new(AsyncErrorPolicy::All);
        collector.record(failure("a"));
        assert!(matches!(
            collector.into_result().unwrap_err(),
            WorkflowError::AsyncAction { .. }
        ));
    }

    #[test]
    fn test_as_async_error_relabels_action_failures() {
        let action = ActionDefinition::new("storage", "copy");
        let err = as_async_error(
            &action,
            WorkflowError::Action {
                service: "storage".to_string(),
                action: "copy".to_string(),
                message: "denied".to_string(),
            },
        );
        assert_eq!(err.to_string(), "async storage.copy failed: denied");

        let err = as_async_error(&action, WorkflowError::Binding("x".to_string()));
        assert!(matches!(err, WorkflowError::AsyncAction { ref message, .. } if message.contains("binding")));
    }
}
