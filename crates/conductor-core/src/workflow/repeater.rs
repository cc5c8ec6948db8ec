//! Retry/poll primitive with regex extraction and exit criteria.
//!
//! The repeater runs an attempt up to `repeat` times. After each attempt the
//! textual output is matched against the extraction rules and the exit
//! criteria is evaluated; a true exit short-circuits the remaining attempts.
//! A hard error from an attempt aborts immediately: only the exit-criteria
//! loop is retried, never failed attempts.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use conductor_types::workflow::{Extraction, RepeaterConfig};
use regex::Regex;
use serde_json::{Map, Value};

use super::definition::WorkflowError;
use super::expression::CriteriaEvaluator;
use super::scope::{Scope, value_to_string};

/// Result of a repeater run.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatOutcome {
    /// Output of the last attempt.
    pub output: Value,
    /// Number of attempts actually made.
    pub attempts: u32,
    /// Accumulated extraction values.
    pub extracted: Map<String, Value>,
    /// Whether the exit criteria fired.
    pub exited: bool,
}

/// Repeater bound to one action's configuration.
pub struct Repeater<'a> {
    config: &'a RepeaterConfig,
    criteria: &'a dyn CriteriaEvaluator,
    default_sleep_ms: u64,
}

impl<'a> Repeater<'a> {
    pub fn new(config: &'a RepeaterConfig, criteria: &'a dyn CriteriaEvaluator) -> Self {
        Self {
            config,
            criteria,
            default_sleep_ms: 0,
        }
    }

    /// Inter-attempt sleep used when the configuration sets none.
    pub fn with_default_sleep(mut self, sleep_ms: u64) -> Self {
        self.default_sleep_ms = sleep_ms;
        self
    }

    fn sleep_ms(&self) -> u64 {
        if self.config.sleep_time_ms > 0 {
            self.config.sleep_time_ms
        } else {
            self.default_sleep_ms
        }
    }

    /// Run `attempt` until the exit criteria holds or attempts run out.
    ///
    /// The exit criteria sees `scope` overlaid with the top-level keys of an
    /// object output and with the extracted values. Extracted values are
    /// also written into `sink` once the loop ends.
    pub async fn run<F, Fut>(
        &self,
        caller_id: &str,
        scope: &Scope,
        mut attempt: F,
        sink: &Scope,
    ) -> Result<RepeatOutcome, WorkflowError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Value, WorkflowError>>,
    {
        let rules = compile_rules(&self.config.extraction)?;
        let max_attempts = self.config.attempts();

        let mut extracted = Map::new();
        let mut matched: HashSet<&str> = HashSet::new();
        let mut output = Value::Null;
        let mut attempts = 0;
        let mut exited = false;

        for n in 1..=max_attempts {
            for (rule, _) in &rules {
                if rule.reset {
                    extracted.remove(&rule.key);
                }
            }

            output = attempt(n).await?;
            attempts = n;

            let text = value_to_string(&output);
            for (rule, regex) in &rules {
                if let Some(caps) = regex.captures(&text) {
                    if let Some(m) = caps.get(1).or_else(|| caps.get(0)) {
                        extracted.insert(rule.key.clone(), Value::String(m.as_str().to_string()));
                        matched.insert(rule.key.as_str());
                    }
                }
            }

            if self.config.exit.is_some() {
                let overlay = scope.fork();
                if let Value::Object(fields) = &output {
                    overlay.merge(fields.clone());
                }
                overlay.merge(extracted.clone());
                exited = self
                    .criteria
                    .evaluate(&overlay, self.config.exit.as_deref(), "exit", false)?;
            }

            tracing::debug!(caller = caller_id, attempt = n, max_attempts, exited, "repeater attempt");

            if exited {
                break;
            }
            let sleep_ms = self.sleep_ms();
            if n < max_attempts && sleep_ms > 0 {
                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            }
        }

        if self.config.exit.is_some() && !exited && max_attempts > 1 {
            tracing::warn!(
                caller = caller_id,
                attempts,
                exit = self.config.exit.as_deref().unwrap_or_default(),
                "repeater exhausted attempts without meeting exit criteria"
            );
        }

        for (rule, _) in &rules {
            if rule.required && !matched.contains(rule.key.as_str()) {
                return Err(WorkflowError::ExtractionRequired {
                    key: rule.key.clone(),
                    pattern: rule.pattern.clone(),
                });
            }
        }

        if !extracted.is_empty() {
            sink.merge(extracted.clone());
        }

        Ok(RepeatOutcome {
            output,
            attempts,
            extracted,
            exited,
        })
    }
}

fn compile_rules(rules: &[Extraction]) -> Result<Vec<(&Extraction, Regex)>, WorkflowError> {
    rules
        .iter()
        .map(|rule| {
            Regex::new(&rule.pattern).map(|re| (rule, re)).map_err(|e| {
                WorkflowError::Validation(format!(
                    "invalid extraction pattern for '{}': {e}",
                    rule.key
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::expression::JexlCriteria;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(repeat: i64, exit: Option<&str>) -> RepeaterConfig {
        RepeaterConfig {
            repeat,
            exit: exit.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_single_attempt_by_default() {
        let criteria = JexlCriteria::new();
        let cfg = config(0, None);
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = Repeater::new(&cfg, &criteria)
            .run(
                "test",
                &Scope::new(),
                |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(json!("ok"))
                    }
                },
                &Scope::new(),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.output, json!("ok"));
    }

    #[tokio::test]
    async fn test_exit_short_circuits_remaining_attempts() {
        let criteria = JexlCriteria::new();
        let cfg = config(3, Some("status == 'done'"));

        let outcome = Repeater::new(&cfg, &criteria)
            .run(
                "poll",
                &Scope::new(),
                |n| async move {
                    let status = if n >= 2 { "done" } else { "pending" };
                    Ok(json!({"status": status}))
                },
                &Scope::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert!(outcome.exited);
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_output_without_error() {
        let criteria = JexlCriteria::new();
        let mut cfg = config(3, Some("status == 'done'"));
        cfg.sleep_time_ms = 1;

        let outcome = Repeater::new(&cfg, &criteria)
            .run(
                "poll",
                &Scope::new(),
                |n| async move { Ok(json!({"status": "pending", "n": n})) },
                &Scope::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert!(!outcome.exited);
        assert_eq!(outcome.output["n"], json!(3));
    }

    #[tokio::test]
    async fn test_hard_error_aborts_immediately() {
        let criteria = JexlCriteria::new();
        let cfg = config(5, Some("false"));
        let calls = Arc::new(AtomicU32::new(0));

        let err = Repeater::new(&cfg, &criteria)
            .run(
                "poll",
                &Scope::new(),
                |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<Value, _>(WorkflowError::Action {
                            service: "http".to_string(),
                            action: "get".to_string(),
                            message: "refused".to_string(),
                        })
                    }
                },
                &Scope::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Action { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_extraction_feeds_exit_and_sink() {
        let criteria = JexlCriteria::new();
        let mut cfg = config(4, Some("version == '1.2'"));
        cfg.extraction = vec![Extraction {
            key: "version".to_string(),
            pattern: r"version=(\d+\.\d+)".to_string(),
            reset: true,
            required: true,
        }];
        let sink = Scope::new();

        let outcome = Repeater::new(&cfg, &criteria)
            .run(
                "deploy",
                &Scope::new(),
                |n| async move { Ok(json!(format!("state=up version=1.{n}"))) },
                &sink,
            )
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.extracted["version"], json!("1.2"));
        assert_eq!(sink.get("version"), Some(json!("1.2")));
    }

    #[tokio::test]
    async fn test_reset_extraction_clears_value_between_attempts() {
        let criteria = JexlCriteria::new();
        let rule = |reset: bool| Extraction {
            key: "ticket".to_string(),
            pattern: r"ticket=(\d+)".to_string(),
            reset,
            required: false,
        };
        let attempt = |n: u32| async move {
            let text = if n == 1 { "ticket=7" } else { "queue empty" };
            Ok(json!(text))
        };

        let mut cfg = config(2, None);
        cfg.extraction = vec![rule(true)];
        let sink = Scope::new();
        let outcome = Repeater::new(&cfg, &criteria)
            .run("poll", &Scope::new(), attempt, &sink)
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert!(!outcome.extracted.contains_key("ticket"));
        assert!(sink.get("ticket").is_none());

        cfg.extraction = vec![rule(false)];
        let outcome = Repeater::new(&cfg, &criteria)
            .run("poll", &Scope::new(), attempt, &Scope::new())
            .await
            .unwrap();
        assert_eq!(outcome.extracted["ticket"], json!("7"));
    }

    #[tokio::test]
    async fn test_required_extraction_never_matched_fails() {
        let criteria = JexlCriteria::new();
        let mut cfg = config(2, None);
        cfg.extraction = vec![Extraction {
            key: "token".to_string(),
            pattern: "token:(\\w+)".to_string(),
            required: true,
            ..Default::default()
        }];

        let err = Repeater::new(&cfg, &criteria)
            .run(
                "login",
                &Scope::new(),
                |_| async { Ok(json!("denied")) },
                &Scope::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::ExtractionRequired { ref key, .. } if key == "token"));
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_validation_error() {
        let criteria = JexlCriteria::new();
        let mut cfg = config(1, None);
        cfg.extraction = vec![Extraction {
            key: "x".to_string(),
            pattern: "(".to_string(),
            ..Default::default()
        }];

        let err = Repeater::new(&cfg, &criteria)
            .run("x", &Scope::new(), |_| async { Ok(Value::Null) }, &Scope::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
