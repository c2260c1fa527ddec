//! Logging and distributed tracing setup.
//!
//! Installs a global `tracing` subscriber with:
//! - an `EnvFilter` (`RUST_LOG` wins over the configured level)
//! - a pretty or JSON `fmt` layer
//! - an OpenTelemetry layer exporting over OTLP when an endpoint is configured

use auditor_config::TelemetryConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Config, RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Telemetry initialization error
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to install the subscriber
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
    /// Bad filter directive
    #[error("Invalid log filter '{directive}': {message}")]
    Filter {
        /// Directive that failed to parse
        directive: String,
        /// Parser message
        message: String,
    },
    /// OTLP exporter setup failed
    #[error("OTLP configuration error: {0}")]
    Otlp(String),
    /// Metrics registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Filter from `RUST_LOG`, falling back to the configured level
pub fn build_filter(log_level: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(log_level).map_err(|e| TelemetryError::Filter {
        directive: log_level.to_string(),
        message: e.to_string(),
    })
}

fn otlp_provider(
    config: &TelemetryConfig,
    endpoint: &str,
) -> Result<TracerProvider, TelemetryError> {
    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let trace_config = Config::default()
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(trace_config)
        .install_batch(runtime::Tokio)
        .map_err(|e| TelemetryError::Otlp(e.to_string()))
}

/// Install the global subscriber.
///
/// Returns the tracer provider when OTLP export is on; pass it to
/// [`shutdown_tracing`] before exit so buffered spans are flushed. Must be
/// called from within a Tokio runtime when an OTLP endpoint is set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<Option<TracerProvider>, TelemetryError> {
    let filter = build_filter(&config.log_level)?;

    let fmt_layer = if config.json_logs {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let provider = config
        .otlp_endpoint
        .as_deref()
        .map(|endpoint| otlp_provider(config, endpoint))
        .transpose()?;

    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    if let Some(provider) = &provider {
        opentelemetry::global::set_tracer_provider(provider.clone());
    }

    info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        otlp = config.otlp_endpoint.is_some(),
        "Tracing initialized"
    );

    Ok(provider)
}

/// Flush and shut down span export
pub fn shutdown_tracing(provider: Option<TracerProvider>) {
    if let Some(provider) = provider {
        for result in provider.force_flush() {
            if let Err(e) = result {
                warn!(error = %e, "Failed to flush spans");
            }
        }
        opentelemetry::global::shutdown_tracer_provider();
        drop(provider);
        info!("Tracing shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_directives() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("auditor_server=debug,tower_http=info").is_ok());
    }

    #[test]
    fn test_filter_rejects_garbage() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let err = build_filter("auditor=loudest").unwrap_err();
        assert!(matches!(err, TelemetryError::Filter { .. }));
    }
}
