//! Pluggable services: the capability table actions dispatch through.
//!
//! A service registers under a unique id and exposes named actions. The
//! engine hands it a generic keyed request map and receives a JSON response;
//! it never inspects domain content. Typed services convert at the edge with
//! [`decode_request`] and [`encode_response`].

pub mod box_service;
pub mod registry;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::workflow::context::ExecutionContext;
use crate::workflow::definition::WorkflowError;
use crate::workflow::executor::WorkflowEngine;

pub use box_service::BoxService;
pub use registry::{Route, ServiceRegistry};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by service implementations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Failed(String),

    /// Engine error passed through unchanged (lookup failures from
    /// control-flow actions, for instance).
    #[error(transparent)]
    Workflow(Box<WorkflowError>),
}

impl From<WorkflowError> for ServiceError {
    fn from(err: WorkflowError) -> Self {
        ServiceError::Workflow(Box::new(err))
    }
}

// ---------------------------------------------------------------------------
// ActionContext
// ---------------------------------------------------------------------------

/// Everything a service call may need besides its request.
#[derive(Clone)]
pub struct ActionContext {
    /// Engine handle, for services that start nested runs.
    pub engine: WorkflowEngine,
    /// Execution context of the calling frame.
    pub exec: ExecutionContext,
    /// `service.action` of the dispatching action.
    pub caller_id: String,
}

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// A registered capability exposing named actions.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). Wrap in
/// [`BoxService`] for dynamic dispatch.
pub trait Service: Send + Sync {
    /// Unique service id, e.g. `workflow`.
    fn id(&self) -> &str;

    /// Action names this service accepts.
    fn actions(&self) -> &[&str];

    /// Run `action` with a generic request map.
    fn run(
        &self,
        ctx: ActionContext,
        action: &str,
        request: Map<String, Value>,
    ) -> impl std::future::Future<Output = Result<Value, ServiceError>> + Send;
}

// ---------------------------------------------------------------------------
// Request/response conversion
// ---------------------------------------------------------------------------

/// Decode a generic request map into a typed request.
pub fn decode_request<T: DeserializeOwned>(request: Map<String, Value>) -> Result<T, ServiceError> {
    serde_json::from_value(Value::Object(request))
        .map_err(|e| ServiceError::InvalidRequest(e.to_string()))
}

/// Encode a typed response into a JSON value.
pub fn encode_response<T: Serialize>(response: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(response).map_err(|e| ServiceError::Failed(format!("encode response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct CopyRequest {
        source_url: String,
        #[serde(default)]
        overwrite: bool,
    }

    #[test]
    fn test_decode_request() {
        let Value::Object(map) = json!({"sourceUrl": "mem://a"}) else {
            unreachable!()
        };
        let req: CopyRequest = decode_request(map).unwrap();
        assert_eq!(req.source_url, "mem://a");
        assert!(!req.overwrite);
    }

    #[test]
    fn test_decode_request_reports_invalid_payload() {
        let err = decode_request::<CopyRequest>(Map::new()).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(ref m) if m.contains("sourceUrl")));
    }

    #[test]
    fn test_encode_response() {
        let value = encode_response(&CopyRequest {
            source_url: "x".to_string(),
            overwrite: true,
        })
        .unwrap();
        assert_eq!(value, json!({"sourceUrl": "x", "overwrite": true}));
    }

    #[test]
    fn test_workflow_error_passes_through() {
        let err: ServiceError = WorkflowError::ServiceNotFound("s3".to_string()).into();
        assert_eq!(err.to_string(), "service 's3' not found");
    }
}
