//! Prometheus metrics.
//!
//! Collectors live in a private registry rendered at `/metrics` in the text
//! exposition format.

use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::tracing_setup::TelemetryError;

/// Collectors for HTTP traffic and ledger activity.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Requests served, by method, route, and status
    pub http_requests_total: IntCounterVec,
    /// Request latency, by method and route
    pub http_request_duration_seconds: HistogramVec,
    /// Ledger appends, by provider and blocked flag
    pub usage_events_total: IntCounterVec,
    /// Recorded spend in USD, by provider
    pub spend_usd_total: CounterVec,
}

impl Metrics {
    /// Create and register every collector
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ]),
            &["method", "endpoint"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let usage_events_total = IntCounterVec::new(
            Opts::new("auditor_usage_events_total", "Usage events recorded in the ledger"),
            &["provider", "blocked"],
        )?;
        registry.register(Box::new(usage_events_total.clone()))?;

        let spend_usd_total = CounterVec::new(
            Opts::new("auditor_spend_usd_total", "Recorded LLM spend in USD"),
            &["provider"],
        )?;
        registry.register(Box::new(spend_usd_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            usage_events_total,
            spend_usd_total,
        })
    }

    /// Count one served request
    pub fn record_http(&self, method: &str, endpoint: &str, status: u16, elapsed: Duration) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, endpoint, status.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(elapsed.as_secs_f64());
    }

    /// Count one ledger append
    pub fn record_usage(&self, provider: &str, blocked: bool, total_cost: f64) {
        self.usage_events_total
            .with_label_values(&[provider, if blocked { "true" } else { "false" }])
            .inc();
        if total_cost.is_finite() && total_cost > 0.0 {
            self.spend_usd_total
                .with_label_values(&[provider])
                .inc_by(total_cost);
        }
    }

    /// Text exposition of every collector
    pub fn render(&self) -> Result<String, TelemetryError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| TelemetryError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}
