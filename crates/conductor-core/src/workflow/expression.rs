//! Criteria evaluation for `when`, `skip` and repeater `exit` predicates.
//!
//! `JexlCriteria` wraps `jexl_eval::Evaluator` with pre-registered standard
//! transforms. Predicates are evaluated against a snapshot of the run scope,
//! so `build.status == 'done'` reads `build.status` from the scope.
//!
//! **Security note:** Scope values are always passed as context objects, NEVER
//! interpolated into expression strings.

use serde_json::{Value, json};

use super::definition::WorkflowError;
use super::scope::Scope;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during criteria evaluation.
#[derive(Debug, thiserror::Error)]
pub enum CriteriaError {
    #[error("{event}: expression '{expression}' failed: {message}")]
    EvalFailed {
        event: String,
        expression: String,
        message: String,
    },

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

impl From<CriteriaError> for WorkflowError {
    fn from(err: CriteriaError) -> Self {
        match err {
            CriteriaError::EvalFailed {
                expression,
                message,
                ..
            } => WorkflowError::Criteria {
                expression,
                message,
            },
            CriteriaError::InvalidContext(message) => WorkflowError::Criteria {
                expression: String::new(),
                message,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// CriteriaEvaluator trait
// ---------------------------------------------------------------------------

/// Boolean predicate evaluation over a scope.
///
/// `event_name` labels the predicate site (`when`, `skip`, `exit`) in
/// diagnostics. An absent or blank expression returns `default_when_empty`.
pub trait CriteriaEvaluator: Send + Sync {
    fn evaluate(
        &self,
        scope: &Scope,
        expression: Option<&str>,
        event_name: &str,
        default_when_empty: bool,
    ) -> Result<bool, CriteriaError>;
}

// ---------------------------------------------------------------------------
// JexlCriteria
// ---------------------------------------------------------------------------

/// JEXL-backed criteria evaluator with standard transforms registered.
pub struct JexlCriteria {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl JexlCriteria {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!truthy(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.len(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression against an explicit JSON object context.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, CriteriaError> {
        if !context.is_object() {
            return Err(CriteriaError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }
        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| CriteriaError::EvalFailed {
                event: "eval".to_string(),
                expression: expression.to_string(),
                message: e.to_string(),
            })
    }
}

impl Default for JexlCriteria {
    fn default() -> Self {
        Self::new()
    }
}

impl CriteriaEvaluator for JexlCriteria {
    fn evaluate(
        &self,
        scope: &Scope,
        expression: Option<&str>,
        event_name: &str,
        default_when_empty: bool,
    ) -> Result<bool, CriteriaError> {
        let Some(expression) = expression.map(str::trim).filter(|e| !e.is_empty()) else {
            return Ok(default_when_empty);
        };

        let context = scope.snapshot();
        let result = self
            .evaluator
            .eval_in_context(expression, &context)
            .map_err(|e| CriteriaError::EvalFailed {
                event: event_name.to_string(),
                expression: expression.to_string(),
                message: e.to_string(),
            })?;

        let outcome = truthy(&result);
        tracing::trace!(event = event_name, expression, outcome, "criteria evaluated");
        Ok(outcome)
    }
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        let scope = Scope::new();
        scope.put("build.status", json!("done"));
        scope.put("build.count", json!(3));
        scope.put("env", json!("PROD"));
        scope.put("hosts", json!(["a", "b"]));
        scope
    }

    #[test]
    fn test_empty_expression_uses_default() {
        let criteria = JexlCriteria::new();
        let scope = scope();
        assert!(criteria.evaluate(&scope, None, "when", true).unwrap());
        assert!(!criteria.evaluate(&scope, Some("   "), "skip", false).unwrap());
    }

    #[test]
    fn test_equality_against_scope() {
        let criteria = JexlCriteria::new();
        let scope = scope();
        assert!(
            criteria
                .evaluate(&scope, Some("build.status == 'done'"), "exit", false)
                .unwrap()
        );
        assert!(
            !criteria
                .evaluate(&scope, Some("build.count > 5"), "when", true)
                .unwrap()
        );
    }

    #[test]
    fn test_transforms() {
        let criteria = JexlCriteria::new();
        let scope = scope();
        assert!(
            criteria
                .evaluate(&scope, Some("env|lower == 'prod'"), "when", true)
                .unwrap()
        );
        assert!(
            criteria
                .evaluate(&scope, Some("hosts|length == 2"), "when", true)
                .unwrap()
        );
        assert!(
            criteria
                .evaluate(&scope, Some("build.status|startsWith('do')"), "when", true)
                .unwrap()
        );
    }

    #[test]
    fn test_truthiness_coercion() {
        let criteria = JexlCriteria::new();
        let scope = scope();
        assert!(criteria.evaluate(&scope, Some("build.count"), "when", false).unwrap());
        assert!(truthy(&json!("x")));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(truthy(&json!([])));
    }

    #[test]
    fn test_invalid_expression_is_error() {
        let criteria = JexlCriteria::new();
        let scope = scope();
        let err = criteria
            .evaluate(&scope, Some("build.status == == 'x'"), "skip", false)
            .unwrap_err();
        assert!(err.to_string().starts_with("skip:"));

        let workflow_err: WorkflowError = err.into();
        assert!(matches!(workflow_err, WorkflowError::Criteria { .. }));
    }

    #[test]
    fn test_evaluate_value_requires_object_context() {
        let criteria = JexlCriteria::new();
        let err = criteria.evaluate_value("1 + 1", &json!(5)).unwrap_err();
        assert!(matches!(err, CriteriaError::InvalidContext(_)));
        assert_eq!(criteria.evaluate_value("1 + 1", &json!({})).unwrap(), json!(2.0));
    }
}
