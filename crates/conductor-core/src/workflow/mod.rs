//! Workflow engine core: registry, scheduler and control flow.
//!
//! - `definition` -- error type and structural validation
//! - `registry` -- name -> definition table, last write wins
//! - `selector` -- `location:tasks` references and task filters
//! - `scope` -- shared keyed state and `$path` expansion
//! - `binding` -- Init/Post variable bindings
//! - `expression` -- JEXL criteria for `when`/`skip`/`exit`
//! - `repeater` -- bounded retry loop with exit criteria and extraction
//! - `frame` / `context` -- run stack and execution context
//! - `async_group` -- concurrent async actions with a join barrier
//! - `control` -- the built-in `workflow` service
//! - `executor` -- the engine itself

pub mod async_group;
pub mod binding;
pub mod context;
pub mod control;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod frame;
pub mod registry;
pub mod repeater;
pub mod scope;
pub mod selector;

pub use context::ExecutionContext;
pub use definition::WorkflowError;
pub use executor::{WorkflowEngine, WorkflowEngineBuilder};
pub use registry::WorkflowRegistry;
pub use scope::Scope;
