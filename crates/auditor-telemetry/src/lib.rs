//! # Auditor Telemetry
//!
//! Observability for the AI Cost Auditor:
//! - Structured logging (pretty or JSON)
//! - Optional OpenTelemetry span export over OTLP
//! - Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod metrics;
pub mod tracing_setup;

pub use metrics::Metrics;
pub use tracing_setup::{build_filter, init_tracing, shutdown_tracing, TelemetryError};
