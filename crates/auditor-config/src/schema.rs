//! Configuration schema.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

use crate::error::{ConfigError, ConfigResult};

/// Development-only JWT secret; startup logs a warning while it is in use.
pub const DEV_JWT_SECRET: &str = "dev-jwt-secret-change-in-production";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct AuditorConfig {
    /// HTTP listener
    #[validate(nested)]
    pub server: ServerConfig,
    /// Persistence
    #[validate(nested)]
    pub database: DatabaseConfig,
    /// Dashboard authentication
    #[validate(nested)]
    pub auth: AuthConfig,
    /// Upstream LLM providers
    #[validate(nested)]
    pub upstream: UpstreamConfig,
    /// Metrics windows and query limits
    #[validate(nested)]
    pub accounting: AccountingConfig,
    /// Model price overrides
    pub pricing: PricingConfig,
    /// Logging and tracing
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl AuditorConfig {
    /// Run derived and cross-field validation
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.validate()?;

        if self.auth.jwt_secret.expose_secret().is_empty() {
            return Err(ConfigError::validation("auth.jwt_secret must not be empty"));
        }
        if self.server.request_timeout.is_zero() {
            return Err(ConfigError::validation(
                "server.request_timeout must be greater than zero",
            ));
        }
        if self.upstream.timeout.is_zero() {
            return Err(ConfigError::validation(
                "upstream.timeout must be greater than zero",
            ));
        }
        self.pricing.validate_prices()?;

        Ok(())
    }

    /// Whether the development JWT secret is still configured
    #[must_use]
    pub fn uses_dev_secret(&self) -> bool {
        self.auth.jwt_secret.expose_secret() == DEV_JWT_SECRET
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    #[validate(length(min = 1))]
    pub host: String,
    /// Bind port
    #[validate(range(min = 1))]
    pub port: u16,
    /// Per-request deadline
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Drain period on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Allowed browser origins
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(30),
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
        }
    }
}

impl ServerConfig {
    /// `host:port`
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite://...` URL, or `memory` for the in-process store
    #[validate(length(min = 1))]
    pub url: String,
    /// Maximum pool size
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://auditor.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// Whether the in-process store is selected
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.url == "memory" || self.url == "memory://"
    }
}

/// Dashboard authentication settings.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub jwt_secret: SecretString,
    /// Token lifetime
    #[serde(with = "humantime_serde")]
    pub jwt_expiration: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: SecretString::new(DEV_JWT_SECRET.to_string()),
            jwt_expiration: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Upstream provider settings.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct UpstreamConfig {
    /// OpenAI API base URL
    #[validate(length(min = 1))]
    pub openai_base_url: String,
    /// Anthropic API base URL
    #[validate(length(min = 1))]
    pub anthropic_base_url: String,
    /// OpenAI API key
    pub openai_api_key: Option<SecretString>,
    /// Anthropic API key
    pub anthropic_api_key: Option<SecretString>,
    /// Upstream request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com".to_string(),
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            openai_api_key: None,
            anthropic_api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Metrics windows and ledger query limits.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct AccountingConfig {
    /// Trailing window for top users and projects
    #[validate(range(min = 1, max = 366))]
    pub top_window_days: u32,
    /// Trailing window for waste detection
    #[validate(range(min = 1, max = 366))]
    pub waste_window_days: u32,
    /// Length of every top-N list
    #[validate(range(min = 1, max = 100))]
    pub top_n: usize,
    /// Default page size for usage-event queries
    #[validate(range(min = 1))]
    pub default_usage_query_limit: usize,
    /// Largest page size a caller may request
    #[validate(range(min = 1, max = 10000))]
    pub max_usage_query_limit: usize,
    /// Output tokens projected, and sent upstream as `max_tokens`, when a
    /// proxied request sets no limit of its own
    #[validate(range(min = 1))]
    pub default_max_output_tokens: u32,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            top_window_days: 30,
            waste_window_days: 30,
            top_n: 10,
            default_usage_query_limit: 100,
            max_usage_query_limit: 1000,
            default_max_output_tokens: 4096,
        }
    }
}

/// Price per one million tokens, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ModelPrice {
    /// Prompt tokens
    pub input: f64,
    /// Completion tokens
    pub output: f64,
}

impl ModelPrice {
    /// Create a price
    #[must_use]
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    fn is_valid(self) -> bool {
        self.input.is_finite() && self.output.is_finite() && self.input >= 0.0 && self.output >= 0.0
    }
}

/// Overrides layered on the built-in price table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Price for models absent from the table
    pub default: ModelPrice,
    /// `provider -> model -> price`
    pub providers: BTreeMap<String, BTreeMap<String, ModelPrice>>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            default: ModelPrice::new(1.0, 3.0),
            providers: BTreeMap::new(),
        }
    }
}

impl PricingConfig {
    fn validate_prices(&self) -> ConfigResult<()> {
        if !self.default.is_valid() {
            return Err(ConfigError::validation(
                "pricing.default must be non-negative",
            ));
        }
        for (provider, models) in &self.providers {
            for (model, price) in models {
                if !price.is_valid() {
                    return Err(ConfigError::validation(format!(
                        "pricing.providers.{provider}.{model} must be non-negative"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Logging and tracing settings.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default `EnvFilter` directive
    #[validate(length(min = 1))]
    pub log_level: String,
    /// Emit JSON log lines
    pub json_logs: bool,
    /// OTLP collector endpoint; tracing export is off when unset
    pub otlp_endpoint: Option<String>,
    /// Service name reported to the tracing backend
    #[validate(length(min = 1))]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            otlp_endpoint: None,
            service_name: "ai-cost-auditor".to_string(),
        }
    }
}
