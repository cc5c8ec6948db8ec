//! BoxService -- object-safe dynamic dispatch wrapper for Service.
//!
//! 1. `ServiceDyn` is the object-safe mirror of `Service` with boxed futures
//! 2. Blanket-impl `ServiceDyn` for all `T: Service`
//! 3. `BoxService` wraps `Box<dyn ServiceDyn>` and delegates
//!
//! The boxed future also breaks the type cycle of nested runs
//! (`workflow.run` -> engine -> service).

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use super::{ActionContext, Service, ServiceError};

/// Object-safe version of [`Service`] with boxed futures.
pub trait ServiceDyn: Send + Sync {
    fn id(&self) -> &str;

    fn actions(&self) -> &[&str];

    fn run_boxed<'a>(
        &'a self,
        ctx: ActionContext,
        action: &'a str,
        request: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ServiceError>> + Send + 'a>>;
}

/// Blanket implementation: any `Service` automatically implements `ServiceDyn`.
impl<T: Service> ServiceDyn for T {
    fn id(&self) -> &str {
        Service::id(self)
    }

    fn actions(&self) -> &[&str] {
        Service::actions(self)
    }

    fn run_boxed<'a>(
        &'a self,
        ctx: ActionContext,
        action: &'a str,
        request: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ServiceError>> + Send + 'a>> {
        Box::pin(self.run(ctx, action, request))
    }
}

/// Type-erased service for the registry.
pub struct BoxService {
    inner: Box<dyn ServiceDyn + Send + Sync>,
}

impl BoxService {
    /// Wrap a concrete `Service` in a type-erased box.
    pub fn new<T: Service + 'static>(service: T) -> Self {
        Self {
            inner: Box::new(service),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn actions(&self) -> &[&str] {
        self.inner.actions()
    }

    pub fn supports(&self, action: &str) -> bool {
        self.actions().contains(&action)
    }

    pub async fn run(
        &self,
        ctx: ActionContext,
        action: &str,
        request: Map<String, Value>,
    ) -> Result<Value, ServiceError> {
        self.inner.run_boxed(ctx, action, request).await
    }
}

impl std::fmt::Debug for BoxService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxService")
            .field("id", &self.id())
            .field("actions", &self.actions())
            .finish()
    }
}
