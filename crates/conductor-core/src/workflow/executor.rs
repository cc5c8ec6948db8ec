//! Workflow engine: the task/action scheduler.
//!
//! `WorkflowEngine` resolves a run request to a registered (or Dao-loaded)
//! definition, pushes a frame, and walks the selected tasks in order.
//!
//! # Execution flow
//!
//! 1. Resolve the definition and publish `WorkflowLoaded`.
//! 2. Derive the run scope (forked from the caller unless shared), seed
//!    `params`, push a frame, apply workflow Init bindings.
//! 3. For each selected task: evaluate `when`, apply Init, run sync actions
//!    in document order (honouring tag filter, skip groups and exit), join
//!    the async group, apply Post, pace to `time_spent_ms`.
//! 4. A pending goto replaces the remaining task list once the current task
//!    completes; exit stops the loop before the next task or sync action.
//! 5. On failure run the on-error task; then always run the defer task.
//! 6. Apply workflow Post bindings into the response, pop the frame and
//!    publish `WorkflowEnded`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use conductor_types::config::EngineConfig;
use conductor_types::error::RepositoryError;
use conductor_types::event::EngineEvent;
use conductor_types::workflow::{
    ActionDefinition, RunRequest, RunResponse, TaskDefinition, WorkflowDefinition,
};
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::workflow::{BoxWorkflowDao, WorkflowDao};
use crate::service::{ActionContext, BoxService, Service, ServiceError, ServiceRegistry};

use super::async_group::AsyncActionGroup;
use super::binding::apply_bindings;
use super::context::ExecutionContext;
use super::control::ControlService;
use super::definition::WorkflowError;
use super::expression::{CriteriaEvaluator, JexlCriteria};
use super::frame::{Activity, Frame};
use super::registry::WorkflowRegistry;
use super::repeater::Repeater;
use super::scope::Scope;
use super::selector::{Selector, TasksFilter, resolve_tasks};

/// Boxed, sendable future used where runs recurse through services.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Service id and action of nested runs; the tag filter is injected here.
const RUN_SERVICE: &str = "workflow";
const RUN_ACTION: &str = "run";

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`WorkflowEngine`].
pub struct WorkflowEngineBuilder {
    config: EngineConfig,
    services: ServiceRegistry,
    registry: WorkflowRegistry,
    dao: Option<BoxWorkflowDao>,
    criteria: Option<Arc<dyn CriteriaEvaluator>>,
    event_bus: Option<EventBus>,
}

impl WorkflowEngineBuilder {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            services: ServiceRegistry::new(),
            registry: WorkflowRegistry::new(),
            dao: None,
            criteria: None,
            event_bus: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a service. The `workflow` control service is always present.
    pub fn service<S: Service + 'static>(self, service: S) -> Self {
        self.services.register(service);
        self
    }

    pub fn boxed_service(self, service: BoxService) -> Self {
        self.services.register_boxed(service);
        self
    }

    /// Share an existing registry (e.g. pre-populated definitions).
    pub fn registry(mut self, registry: WorkflowRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn dao<D: WorkflowDao + 'static>(mut self, dao: D) -> Self {
        self.dao = Some(BoxWorkflowDao::new(dao));
        self
    }

    pub fn criteria<C: CriteriaEvaluator + 'static>(mut self, criteria: C) -> Self {
        self.criteria = Some(Arc::new(criteria));
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> WorkflowEngine {
        self.services.register(ControlService);
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(self.config.event_bus_capacity));
        let criteria = self
            .criteria
            .unwrap_or_else(|| Arc::new(JexlCriteria::new()));

        WorkflowEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                services: self.services,
                registry: self.registry,
                dao: self.dao,
                criteria,
                event_bus,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

struct EngineInner {
    config: EngineConfig,
    services: ServiceRegistry,
    registry: WorkflowRegistry,
    dao: Option<BoxWorkflowDao>,
    criteria: Arc<dyn CriteriaEvaluator>,
    event_bus: EventBus,
}

/// Cheap-to-clone handle over the engine's shared state.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.inner.registry
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.inner.services
    }

    pub fn criteria(&self) -> &dyn CriteriaEvaluator {
        self.inner.criteria.as_ref()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.event_bus.subscribe()
    }

    /// Validate and register a definition (last write wins).
    pub async fn register(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.inner.registry.register(definition).await
    }

    /// Run a workflow in a fresh execution context.
    pub async fn run(&self, request: RunRequest) -> Result<RunResponse, WorkflowError> {
        self.run_with(ExecutionContext::new(), request).await
    }

    /// Run a workflow on top of `ctx` (nested runs share the caller's stack).
    ///
    /// An async request is spawned on a detached fork of `ctx` and returns
    /// immediately with an empty response; completion is observable only
    /// through events.
    pub fn run_with(
        &self,
        ctx: ExecutionContext,
        request: RunRequest,
    ) -> BoxFuture<'_, Result<RunResponse, WorkflowError>> {
        Box::pin(async move {
            let run_id = Uuid::now_v7();
            if request.is_async {
                let engine = self.clone();
                let detached = ctx.fork();
                tokio::spawn(async move {
                    if let Err(err) = engine.execute_run(detached, request, run_id).await {
                        tracing::warn!(run_id = %run_id, error = %err, "async workflow run failed");
                    }
                });
                return Ok(RunResponse {
                    run_id,
                    data: Map::new(),
                });
            }
            self.execute_run(ctx, request, run_id).await
        })
    }

    // -----------------------------------------------------------------------
    // Run lifecycle
    // -----------------------------------------------------------------------

    async fn execute_run(
        &self,
        ctx: ExecutionContext,
        request: RunRequest,
        run_id: Uuid,
    ) -> Result<RunResponse, WorkflowError> {
        let started = Instant::now();

        let (definition, filter) = match self.resolve(&request).await {
            Ok(resolved) => resolved,
            Err(err) => {
                let workflow_name = request
                    .name
                    .clone()
                    .or_else(|| request.source.clone())
                    .unwrap_or_default();
                self.publish_ended(run_id, &workflow_name, started, Some(&err));
                return Err(err);
            }
        };

        self.publish(EngineEvent::WorkflowLoaded {
            run_id,
            workflow_name: definition.name.clone(),
            source: definition.source.clone(),
        });
        tracing::info!(run_id = %run_id, workflow = %definition.name, tasks = %filter, "workflow run started");

        let scope = if request.shared_state || definition.shared_state {
            ctx.scope().clone()
        } else {
            ctx.scope().fork()
        };
        scope.put("params", Value::Object(request.params.clone()));
        if request.publish_parameters {
            scope.merge(request.params.clone());
        }
        let run_ctx = ctx.rescoped(scope).with_tag_ids(&request.tag_ids);

        let depth = run_ctx.depth();
        if depth >= self.inner.config.max_run_depth {
            let err = WorkflowError::DepthExceeded {
                depth: depth + 1,
                max: self.inner.config.max_run_depth,
            };
            self.publish_ended(run_id, &definition.name, started, Some(&err));
            return Err(err);
        }
        run_ctx.push_frame(Frame::new(run_id, Arc::clone(&definition)));

        let result = match self.run_frame(&run_ctx, &definition, &filter, run_id).await {
            Ok(()) => {
                let data = Scope::new();
                apply_bindings(&definition.post, run_ctx.scope(), &data).map(|_| RunResponse {
                    run_id,
                    data: data.to_map(),
                })
            }
            Err(err) => Err(err),
        };

        if definition.sleep_time_ms > 0 {
            tokio::time::sleep(Duration::from_millis(definition.sleep_time_ms)).await;
        }
        run_ctx.pop_frame();

        self.publish_ended(run_id, &definition.name, started, result.as_ref().err());
        match &result {
            Ok(_) => tracing::info!(
                run_id = %run_id,
                workflow = %definition.name,
                duration_ms = started.elapsed().as_millis() as u64,
                "workflow run completed"
            ),
            Err(err) => tracing::info!(
                run_id = %run_id,
                workflow = %definition.name,
                error = %err,
                "workflow run failed"
            ),
        }
        result
    }

    /// Resolve the definition and task filter of a request.
    async fn resolve(
        &self,
        request: &RunRequest,
    ) -> Result<(Arc<WorkflowDefinition>, TasksFilter), WorkflowError> {
        let requested = TasksFilter::parse(&request.tasks);

        if let Some(inline) = &request.workflow {
            let definition = self.register(inline.clone()).await?;
            return Ok((definition, requested));
        }

        let (name, location, filter) = match (&request.name, &request.source) {
            (name, Some(source)) => {
                let selector = Selector::parse(source)?;
                let filter = if request.tasks.trim().is_empty() {
                    selector.tasks
                } else {
                    requested
                };
                (name.clone().unwrap_or(selector.name), selector.url, filter)
            }
            (Some(name), None) => (name.clone(), name.clone(), requested),
            (None, None) => {
                return Err(WorkflowError::Validation(
                    "run request must name a workflow, a source or an inline definition"
                        .to_string(),
                ));
            }
        };

        if let Ok(definition) = self.inner.registry.lookup(&name).await {
            return Ok((definition, filter));
        }

        let Some(dao) = &self.inner.dao else {
            return Err(WorkflowError::WorkflowNotFound(name));
        };
        tracing::debug!(workflow = %name, location = %location, "loading workflow through dao");
        let mut definition = dao.load(&location).await.map_err(|err| match err {
            RepositoryError::NotFound(_) => WorkflowError::WorkflowNotFound(name.clone()),
            other => WorkflowError::Repository(other),
        })?;
        if definition.name.trim().is_empty() {
            definition.name = name;
        }
        if definition.source.is_none() {
            definition.source = Some(location);
        }
        let definition = self.register(definition).await?;
        Ok((definition, filter))
    }

    /// Everything between frame push and pop: init, task loop, recovery.
    async fn run_frame(
        &self,
        ctx: &ExecutionContext,
        definition: &Arc<WorkflowDefinition>,
        filter: &TasksFilter,
        run_id: Uuid,
    ) -> Result<(), WorkflowError> {
        let mut result = self.run_main(ctx, definition, filter, run_id).await;

        if let (Err(err), Some(on_error)) = (&result, &definition.on_error_task) {
            result = self.recover(ctx, definition, on_error, err, run_id).await;
        }

        if let Some(defer) = &definition.defer_task {
            ctx.with_top(|frame| {
                frame.terminated = false;
                frame.scheduled_task = None;
            });
            let deferred = self.run_named_task(ctx, definition, defer, run_id).await;
            match (deferred, &result) {
                (Err(err), Ok(())) => result = Err(err),
                (Err(err), Err(primary)) => tracing::warn!(
                    run_id = %run_id,
                    task = %defer,
                    error = %err,
                    primary = %primary,
                    "defer task failed after run error"
                ),
                (Ok(()), _) => {}
            }
        }

        result
    }

    async fn run_main(
        &self,
        ctx: &ExecutionContext,
        definition: &Arc<WorkflowDefinition>,
        filter: &TasksFilter,
        run_id: Uuid,
    ) -> Result<(), WorkflowError> {
        let keys = apply_bindings(&definition.init, ctx.scope(), ctx.scope())?;
        self.state_modified(run_id, "workflow.init", keys);

        let tasks = resolve_tasks(definition, filter)?;
        self.publish(EngineEvent::WorkflowInit {
            run_id,
            workflow_name: definition.name.clone(),
            tasks: tasks.clone(),
        });

        self.run_task_list(ctx, definition, tasks, run_id).await
    }

    /// Run tasks in order; a pending goto replaces the rest of the list.
    async fn run_task_list(
        &self,
        ctx: &ExecutionContext,
        definition: &Arc<WorkflowDefinition>,
        mut queue: Vec<String>,
        run_id: Uuid,
    ) -> Result<(), WorkflowError> {
        loop {
            for name in &queue {
                if ctx.is_terminated() {
                    tracing::debug!(run_id = %run_id, task = %name, "frame terminated, stopping");
                    return Ok(());
                }
                self.run_named_task(ctx, definition, name, run_id).await?;
                if ctx.with_top(|frame| frame.scheduled_task.is_some()).unwrap_or(false) {
                    break;
                }
            }

            match ctx.with_top(Frame::take_scheduled).flatten() {
                Some(next) if !ctx.is_terminated() => {
                    tracing::debug!(run_id = %run_id, task = %next, "goto");
                    queue = vec![next];
                }
                _ => return Ok(()),
            }
        }
    }

    /// Populate `error` in scope and run the on-error task.
    async fn recover(
        &self,
        ctx: &ExecutionContext,
        definition: &Arc<WorkflowDefinition>,
        on_error: &str,
        err: &WorkflowError,
        run_id: Uuid,
    ) -> Result<(), WorkflowError> {
        let message = err.to_string();
        let (task, activity) = ctx
            .with_top(|frame| {
                frame.error = Some(message.clone());
                frame.scheduled_task = None;
                frame.terminated = false;
                (frame.task_name.clone(), frame.activity.clone())
            })
            .unwrap_or_default();

        let mut entry = json!({ "error": message, "task": task });
        if let Some(activity) = activity {
            entry["service"] = json!(activity.service);
            entry["action"] = json!(activity.action);
            entry["request"] = activity.request;
            entry["response"] = activity.response.unwrap_or(Value::Null);
        }
        ctx.scope().put("error", entry);

        tracing::warn!(run_id = %run_id, task = %on_error, error = %message, "running on-error task");
        let recovered = self.run_named_task(ctx, definition, on_error, run_id).await;
        ctx.with_top(|frame| frame.error = None);
        if recovered.is_ok() {
            tracing::info!(run_id = %run_id, workflow = %definition.name, "run recovered by on-error task");
        }
        recovered
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    async fn run_named_task(
        &self,
        ctx: &ExecutionContext,
        definition: &WorkflowDefinition,
        name: &str,
        run_id: Uuid,
    ) -> Result<(), WorkflowError> {
        let task = definition
            .task(name)
            .ok_or_else(|| WorkflowError::TaskNotFound {
                workflow: definition.name.clone(),
                task: name.to_string(),
            })?;
        self.run_task(ctx, definition, task, run_id).await
    }

    async fn run_task(
        &self,
        ctx: &ExecutionContext,
        definition: &WorkflowDefinition,
        task: &TaskDefinition,
        run_id: Uuid,
    ) -> Result<(), WorkflowError> {
        let scope = ctx.scope();
        if !self
            .inner
            .criteria
            .evaluate(scope, task.when.as_deref(), "when", true)?
        {
            tracing::debug!(run_id = %run_id, task = %task.name, "task skipped by when");
            return Ok(());
        }

        ctx.with_top(|frame| {
            frame.task_name = Some(task.name.clone());
            frame.activity = None;
        });
        self.publish(EngineEvent::TaskStarted {
            run_id,
            workflow_name: definition.name.clone(),
            task: task.name.clone(),
        });
        tracing::info!(run_id = %run_id, workflow = %definition.name, task = %task.name, "task started");

        let started = Instant::now();
        let result = self.run_task_body(ctx, task, run_id).await;
        let elapsed = started.elapsed();

        self.publish(EngineEvent::TaskEnded {
            run_id,
            workflow_name: definition.name.clone(),
            task: task.name.clone(),
            duration_ms: elapsed.as_millis() as u64,
            error: result.as_ref().err().map(ToString::to_string),
        });
        result?;

        let budget = Duration::from_millis(task.time_spent_ms);
        if budget > elapsed {
            tokio::time::sleep(budget - elapsed).await;
        }
        Ok(())
    }

    async fn run_task_body(
        &self,
        ctx: &ExecutionContext,
        task: &TaskDefinition,
        run_id: Uuid,
    ) -> Result<(), WorkflowError> {
        let scope = ctx.scope();
        let keys = apply_bindings(&task.init, scope, scope)?;
        self.state_modified(run_id, "task.init", keys);

        let (async_actions, sync_actions): (Vec<&ActionDefinition>, Vec<&ActionDefinition>) =
            task.actions.iter().partition(|a| a.is_async);

        // Tag group being skipped by a true `skip` predicate.
        let mut skipping: Option<&str> = None;
        for action in sync_actions {
            if ctx.is_terminated() {
                break;
            }
            if let Some(tag) = skipping {
                if action.tag_id.as_deref() == Some(tag) {
                    continue;
                }
                skipping = None;
            }
            if !ctx.matches_tag(action.tag_id.as_deref()) {
                continue;
            }
            if self
                .inner
                .criteria
                .evaluate(scope, action.skip.as_deref(), "skip", false)?
            {
                tracing::debug!(run_id = %run_id, action = %action.qualified_name(), tag = ?action.tag_id, "skip group");
                skipping = action.tag_id.as_deref();
                continue;
            }
            self.run_action(ctx, &task.name, action, run_id).await?;
        }

        if !async_actions.is_empty() && !ctx.is_terminated() {
            let mut launch = Vec::with_capacity(async_actions.len());
            for action in async_actions {
                if !ctx.matches_tag(action.tag_id.as_deref()) {
                    continue;
                }
                if self
                    .inner
                    .criteria
                    .evaluate(scope, action.skip.as_deref(), "skip", false)?
                {
                    continue;
                }
                launch.push(action.clone());
            }
            AsyncActionGroup::new(self, ctx, &task.name, run_id)
                .run(launch)
                .await?;
        }

        let keys = apply_bindings(&task.post, scope, scope)?;
        self.state_modified(run_id, "task.post", keys);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Dispatch an action and apply its Post bindings into the same scope.
    async fn run_action(
        &self,
        ctx: &ExecutionContext,
        task: &str,
        action: &ActionDefinition,
        run_id: Uuid,
    ) -> Result<Option<Value>, WorkflowError> {
        let Some(response) = self.dispatch_action(ctx, task, action, run_id).await? else {
            return Ok(None);
        };
        if !action.post.is_empty() {
            let input = post_input(ctx.scope(), &response);
            let keys = apply_bindings(&action.post, &input, ctx.scope())?;
            self.state_modified(run_id, "action.post", keys);
        }
        Ok(Some(response))
    }

    /// Evaluate `when`, apply Init, expand the request and run it through
    /// the repeater. Returns `None` when `when` was false.
    pub(crate) async fn dispatch_action(
        &self,
        ctx: &ExecutionContext,
        task: &str,
        action: &ActionDefinition,
        run_id: Uuid,
    ) -> Result<Option<Value>, WorkflowError> {
        let scope = ctx.scope();
        if !self
            .inner
            .criteria
            .evaluate(scope, action.when.as_deref(), "when", true)?
        {
            tracing::debug!(run_id = %run_id, action = %action.qualified_name(), "action skipped by when");
            return Ok(None);
        }

        let keys = apply_bindings(&action.init, scope, scope)?;
        self.state_modified(run_id, "action.init", keys);

        let mut request = scope.expand_map(&action.request);
        if ctx.has_tag_filter()
            && action.service == RUN_SERVICE
            && action.action == RUN_ACTION
            && !request.contains_key("tagIds")
        {
            request.insert("tagIds".to_string(), json!(ctx.tag_ids()));
        }

        let route = self.inner.services.route(&action.service, &action.action)?;
        let caller_id = action.qualified_name();

        ctx.with_top(|frame| {
            frame.activity = Some(Activity {
                service: action.service.clone(),
                action: action.action.clone(),
                tag_id: action.tag_id.clone(),
                request: Value::Object(request.clone()),
                response: None,
                started_at: Utc::now(),
            });
        });
        self.publish(EngineEvent::ActivityStarted {
            run_id,
            task: task.to_string(),
            service: action.service.clone(),
            action: action.action.clone(),
            tag_id: action.tag_id.clone(),
            request: Value::Object(request.clone()),
        });
        tracing::debug!(run_id = %run_id, task, action = %caller_id, "dispatching action");

        let started = Instant::now();
        let action_ctx = ActionContext {
            engine: self.clone(),
            exec: ctx.clone(),
            caller_id: caller_id.clone(),
        };
        let mut attempted = 0u32;
        let outcome = Repeater::new(&action.repeater, self.criteria())
            .with_default_sleep(self.inner.config.default_repeat_sleep_ms)
            .run(
                &caller_id,
                scope,
                |attempt| {
                    attempted = attempt;
                    let route = route.clone();
                    let action_ctx = action_ctx.clone();
                    let request = request.clone();
                    async move {
                        let service = route.service_id().to_string();
                        let action = route.action().to_string();
                        route
                            .run(action_ctx, request)
                            .await
                            .map_err(|err| service_failure(service, action, err))
                    }
                },
                scope,
            )
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(outcome) => {
                ctx.with_top(|frame| {
                    if let Some(activity) = frame.activity.as_mut() {
                        activity.response = Some(outcome.output.clone());
                    }
                });
                scope.put("response", outcome.output.clone());
                self.publish(EngineEvent::ActivityEnded {
                    run_id,
                    task: task.to_string(),
                    service: action.service.clone(),
                    action: action.action.clone(),
                    attempts: outcome.attempts,
                    duration_ms,
                    error: None,
                });
                Ok(Some(outcome.output))
            }
            Err(err) => {
                self.publish(EngineEvent::ActivityEnded {
                    run_id,
                    task: task.to_string(),
                    service: action.service.clone(),
                    action: action.action.clone(),
                    attempts: attempted,
                    duration_ms,
                    error: Some(err.to_string()),
                });
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Entry points for control-flow actions
    // -----------------------------------------------------------------------

    /// Run a task of the top frame's workflow (used by `workflow.switch`).
    pub(crate) fn run_task_in<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        task: &'a str,
    ) -> BoxFuture<'a, Result<(), WorkflowError>> {
        Box::pin(async move {
            let (definition, run_id) = ctx
                .with_top(|frame| (Arc::clone(&frame.workflow), frame.run_id))
                .ok_or_else(|| WorkflowError::Validation("no active workflow frame".to_string()))?;
            self.run_named_task(ctx, &definition, task, run_id).await
        })
    }

    /// Run a single action in the top frame (used by `workflow.switch`).
    pub(crate) fn run_action_in<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        action: &'a ActionDefinition,
    ) -> BoxFuture<'a, Result<Option<Value>, WorkflowError>> {
        Box::pin(async move {
            let (task, run_id) = ctx
                .with_top(|frame| (frame.task_name.clone().unwrap_or_default(), frame.run_id))
                .ok_or_else(|| WorkflowError::Validation("no active workflow frame".to_string()))?;
            self.run_action(ctx, &task, action, run_id).await
        })
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub(crate) fn publish(&self, event: EngineEvent) {
        self.inner.event_bus.publish(event);
    }

    pub(crate) fn state_modified(&self, run_id: Uuid, stage: &str, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        tracing::debug!(run_id = %run_id, stage, keys = ?keys, "state modified");
        self.publish(EngineEvent::StateModified {
            run_id,
            stage: stage.to_string(),
            keys,
        });
    }

    fn publish_ended(
        &self,
        run_id: Uuid,
        workflow_name: &str,
        started: Instant,
        error: Option<&WorkflowError>,
    ) {
        self.publish(EngineEvent::WorkflowEnded {
            run_id,
            workflow_name: workflow_name.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            error: error.map(ToString::to_string),
        });
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("services", &self.inner.services.service_ids())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Input scope for action Post bindings: the caller scope overlaid with the
/// response's top-level keys and the whole response under `response`.
pub(crate) fn post_input(scope: &Scope, response: &Value) -> Scope {
    let input = scope.fork();
    if let Value::Object(fields) = response {
        input.merge(fields.clone());
    }
    input.put("response", response.clone());
    input
}

fn service_failure(service: String, action: String, err: ServiceError) -> WorkflowError {
    match err {
        ServiceError::Workflow(inner) => *inner,
        other => WorkflowError::Action {
            service,
            action,
            message: other.to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
