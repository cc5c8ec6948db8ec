//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use conductor_types::config::LoggingConfig;
//!
//! conductor_observe::init_tracing(&LoggingConfig::default()).unwrap();
//! // ... run workflows ...
//! conductor_observe::shutdown_tracing();
//! ```

use std::sync::OnceLock;

use conductor_types::config::LoggingConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Build the level filter: `RUST_LOG` wins over the configured directive.
fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

/// Initialize the global tracing subscriber.
///
/// Always installs a structured `fmt` layer with target visibility and span
/// close timing. With `config.otel`, spans are additionally bridged to
/// OpenTelemetry through a stdout exporter.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    if config.otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("conductor");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        tracing_subscriber::registry()
            .with(env_filter(config))
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
    } else {
        tracing_subscriber::registry()
            .with(env_filter(config))
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Flush pending spans and shut down the OpenTelemetry tracer provider.
///
/// No-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let config = LoggingConfig {
            filter: "warn".to_string(),
            otel: false,
        };
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
        shutdown_tracing();
    }

    #[test]
    fn test_env_filter_falls_back_to_config() {
        let config = LoggingConfig {
            filter: "conductor_core=debug".to_string(),
            otel: false,
        };
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(env_filter(&config).to_string(), "conductor_core=debug");
        }
    }
}
