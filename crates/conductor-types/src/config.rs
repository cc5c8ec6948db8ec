//! Engine configuration types.
//!
//! `EngineConfig` is the top-level `conductor.toml` document. Every field has
//! a default so an empty file (or no file) yields a working engine.

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Maximum number of nested frames on a run stack.
    #[serde(default = "default_max_run_depth")]
    pub max_run_depth: usize,

    /// How errors from concurrent async actions are surfaced.
    #[serde(default)]
    pub async_error_policy: AsyncErrorPolicy,

    /// Inter-attempt sleep used when an action's repeater sets none.
    #[serde(default)]
    pub default_repeat_sleep_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_max_run_depth() -> usize {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
            max_run_depth: default_max_run_depth(),
            async_error_policy: AsyncErrorPolicy::default(),
            default_repeat_sleep_ms: 0,
            logging: LoggingConfig::default(),
        }
    }
}

/// Aggregation policy for errors raised by a task's async actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncErrorPolicy {
    /// Surface the first error observed at the join barrier.
    #[default]
    First,
    /// Surface every branch error as one aggregated error.
    All,
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Export spans to stdout through OpenTelemetry.
    #[serde(default)]
    pub otel: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            otel: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.event_bus_capacity, 1024);
        assert_eq!(config.max_run_depth, 16);
        assert_eq!(config.async_error_policy, AsyncErrorPolicy::First);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
max_run_depth = 4
async_error_policy = "all"

[logging]
filter = "conductor_core=debug"
otel = true
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_run_depth, 4);
        assert_eq!(config.async_error_policy, AsyncErrorPolicy::All);
        assert_eq!(config.event_bus_capacity, 1024);
        assert!(config.logging.otel);
        assert_eq!(config.logging.filter, "conductor_core=debug");
    }
}
