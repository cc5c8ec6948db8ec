//! Execution context threaded through the scheduler and every service call.
//!
//! An `ExecutionContext` bundles the current scope, the run stack and the
//! active tag filter. The synchronous path shares one stack; async branches
//! and background runs operate on a detached `fork`.

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::frame::{Frame, RunStack};
use super::scope::Scope;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Identifier of the outermost run this context belongs to.
    pub session_id: Uuid,
    scope: Scope,
    stack: Arc<Mutex<RunStack>>,
    tag_ids: Arc<Vec<String>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::with_scope(Scope::new())
    }

    pub fn with_scope(scope: Scope) -> Self {
        Self {
            session_id: Uuid::now_v7(),
            scope,
            stack: Arc::new(Mutex::new(RunStack::new())),
            tag_ids: Arc::new(Vec::new()),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Same stack and filter, different scope.
    pub fn rescoped(&self, scope: Scope) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    /// Detached copy: forked scope and a private snapshot of the stack.
    ///
    /// Control-flow changes made through the fork never reach this context.
    pub fn fork(&self) -> Self {
        let stack = self.stack.lock().expect("run stack lock poisoned").clone();
        Self {
            session_id: self.session_id,
            scope: self.scope.fork(),
            stack: Arc::new(Mutex::new(stack)),
            tag_ids: Arc::clone(&self.tag_ids),
        }
    }

    // -----------------------------------------------------------------------
    // Tag filter
    // -----------------------------------------------------------------------

    pub fn tag_ids(&self) -> &[String] {
        &self.tag_ids
    }

    /// Replace the filter; an empty list keeps the inherited one.
    pub fn with_tag_ids(mut self, tag_ids: &[String]) -> Self {
        if !tag_ids.is_empty() {
            self.tag_ids = Arc::new(tag_ids.to_vec());
        }
        self
    }

    pub fn has_tag_filter(&self) -> bool {
        !self.tag_ids.is_empty()
    }

    /// Whether an action tagged `tag_id` passes the active filter.
    pub fn matches_tag(&self, tag_id: Option<&str>) -> bool {
        if self.tag_ids.is_empty() {
            return true;
        }
        tag_id.is_some_and(|tag| self.tag_ids.iter().any(|t| t == tag))
    }

    // -----------------------------------------------------------------------
    // Run stack
    // -----------------------------------------------------------------------

    pub fn push_frame(&self, frame: Frame) -> usize {
        let mut stack = self.stack.lock().expect("run stack lock poisoned");
        stack.push(frame);
        stack.depth()
    }

    pub fn pop_frame(&self) -> Option<Frame> {
        self.stack.lock().expect("run stack lock poisoned").pop()
    }

    pub fn depth(&self) -> usize {
        self.stack.lock().expect("run stack lock poisoned").depth()
    }

    /// Run `f` against the top-most frame, if any.
    pub fn with_top<R>(&self, f: impl FnOnce(&mut Frame) -> R) -> Option<R> {
        let mut stack = self.stack.lock().expect("run stack lock poisoned");
        stack.top_mut().map(f)
    }

    pub fn is_terminated(&self) -> bool {
        self.with_top(|frame| frame.terminated).unwrap_or(false)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
