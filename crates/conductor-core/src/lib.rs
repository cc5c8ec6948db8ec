//! Workflow engine and port definitions for Conductor.
//!
//! Runs declarative workflows: tasks of actions dispatched to pluggable
//! services, with bindings, criteria, repeaters, async groups and
//! control-flow actions. Depends only on `conductor-types`; storage
//! adapters live in `conductor-infra`.

pub mod event;
pub mod repository;
pub mod service;
pub mod workflow;

pub use event::EventBus;
pub use service::{ActionContext, BoxService, Service, ServiceError, ServiceRegistry};
pub use workflow::{ExecutionContext, Scope, WorkflowEngine, WorkflowError, WorkflowRegistry};
