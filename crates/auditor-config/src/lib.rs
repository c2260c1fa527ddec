//! # Auditor Config
//!
//! Layered configuration for the AI Cost Auditor: built-in defaults, an
//! optional YAML or TOML file, then `AUDITOR_*` environment overrides.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{apply_env_overrides, ConfigFormat, ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{
    AccountingConfig, AuditorConfig, AuthConfig, DatabaseConfig, ModelPrice, PricingConfig,
    ServerConfig, TelemetryConfig, UpstreamConfig, DEV_JWT_SECRET,
};
