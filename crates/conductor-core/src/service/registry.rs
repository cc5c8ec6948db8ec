//! Service capability table: service id -> action -> handler.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use super::box_service::BoxService;
use super::{ActionContext, Service, ServiceError};
use crate::workflow::definition::WorkflowError;

/// Resolved dispatch target for one `service.action` pair.
#[derive(Debug, Clone)]
pub struct Route {
    service: Arc<BoxService>,
    action: String,
}

impl Route {
    pub fn service_id(&self) -> &str {
        self.service.id()
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub async fn run(
        &self,
        ctx: ActionContext,
        request: Map<String, Value>,
    ) -> Result<Value, ServiceError> {
        self.service.run(ctx, &self.action, request).await
    }
}

/// Concurrent map of registered services keyed by id.
///
/// Registering an id twice replaces the earlier service.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<DashMap<String, Arc<BoxService>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Service + 'static>(&self, service: S) {
        self.register_boxed(BoxService::new(service));
    }

    pub fn register_boxed(&self, service: BoxService) {
        let id = service.id().to_string();
        tracing::debug!(service = %id, actions = ?service.actions(), "service registered");
        self.services.insert(id, Arc::new(service));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    /// Registered service ids, sorted.
    pub fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Resolve `service.action` to a dispatch route.
    pub fn route(&self, service: &str, action: &str) -> Result<Route, WorkflowError> {
        let entry = self
            .services
            .get(service)
            .ok_or_else(|| WorkflowError::ServiceNotFound(service.to_string()))?;
        let svc = Arc::clone(entry.value());
        drop(entry);

        if !svc.supports(action) {
            return Err(WorkflowError::ActionNotFound {
                service: service.to_string(),
                action: action.to_string(),
            });
        }

        Ok(Route {
            service: svc,
            action: action.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Service for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        fn actions(&self) -> &[&str] {
            &["say", "shout"]
        }

        async fn run(
            &self,
            _ctx: ActionContext,
            action: &str,
            request: Map<String, Value>,
        ) -> Result<Value, ServiceError> {
            let text = request.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(match action {
                "shout" => Value::String(text.to_uppercase()),
                _ => Value::String(text.to_string()),
            })
        }
    }

    #[test]
    fn test_route_known_action() {
        let registry = ServiceRegistry::new();
        registry.register(Echo);

        let route = registry.route("echo", "shout").unwrap();
        assert_eq!(route.service_id(), "echo");
        assert_eq!(route.action(), "shout");
    }

    #[test]
    fn test_route_unknown_service_and_action() {
        let registry = ServiceRegistry::new();
        registry.register(Echo);

        assert!(matches!(
            registry.route("s3", "copy").unwrap_err(),
            WorkflowError::ServiceNotFound(_)
        ));
        assert!(matches!(
            registry.route("echo", "whisper").unwrap_err(),
            WorkflowError::ActionNotFound { .. }
        ));
    }

    #[test]
    fn test_service_ids_sorted() {
        let registry = ServiceRegistry::new();
        registry.register(Echo);
        assert_eq!(registry.service_ids(), vec!["echo"]);
        assert!(registry.contains("echo"));
    }
}
