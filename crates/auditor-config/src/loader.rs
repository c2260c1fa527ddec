//! Configuration loading: defaults, then file, then environment.

use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::AuditorConfig;

/// Prefix for environment overrides.
pub const DEFAULT_ENV_PREFIX: &str = "AUDITOR";

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml` / `.yml`
    Yaml,
    /// `.toml`
    Toml,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

/// Builds an [`AuditorConfig`] from layered sources.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
    use_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader reading only defaults and the environment
    #[must_use]
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            use_env: true,
        }
    }

    /// Read a YAML or TOML file before applying overrides
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Change the environment variable prefix
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Ignore the process environment
    #[must_use]
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Load, merge, and validate
    pub async fn load(&self) -> ConfigResult<AuditorConfig> {
        let mut config = match &self.file {
            Some(path) => {
                let contents = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Io {
                        path: path.clone(),
                        source,
                    })?;
                let config = Self::parse(&contents, ConfigFormat::from_path(path)?)?;
                info!(path = %path.display(), "Loaded configuration file");
                config
            }
            None => AuditorConfig::default(),
        };

        if self.use_env {
            apply_env_overrides(&mut config, &self.env_prefix, |var| std::env::var(var).ok())?;
        }

        config.validate_all()?;
        Ok(config)
    }

    /// Parse configuration text without validating it
    pub fn parse(contents: &str, format: ConfigFormat) -> ConfigResult<AuditorConfig> {
        match format {
            ConfigFormat::Yaml => {
                serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            ConfigFormat::Toml => {
                toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
            }
        }
    }
}

/// Apply `{prefix}_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut AuditorConfig, prefix: &str, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |suffix: &str| {
        let var = format!("{prefix}_{suffix}");
        lookup(&var).map(|value| (var, value))
    };

    if let Some((_, value)) = get("HOST") {
        config.server.host = value;
    }
    if let Some((var, value)) = get("PORT") {
        config.server.port = value.parse().map_err(|e| ConfigError::env(var, e))?;
    }
    if let Some((var, value)) = get("REQUEST_TIMEOUT") {
        config.server.request_timeout = parse_duration(&var, &value)?;
    }
    if let Some((_, value)) = get("CORS_ORIGINS") {
        config.server.cors_origins = value
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some((_, value)) = get("DATABASE_URL") {
        config.database.url = value;
    }
    if let Some((_, value)) = get("JWT_SECRET") {
        config.auth.jwt_secret = SecretString::new(value);
    }
    if let Some((var, value)) = get("JWT_EXPIRATION") {
        config.auth.jwt_expiration = parse_duration(&var, &value)?;
    }
    if let Some((_, value)) = get("OPENAI_BASE_URL") {
        config.upstream.openai_base_url = value;
    }
    if let Some((_, value)) = get("ANTHROPIC_BASE_URL") {
        config.upstream.anthropic_base_url = value;
    }
    if let Some((_, value)) = get("OPENAI_API_KEY") {
        config.upstream.openai_api_key = Some(SecretString::new(value));
    }
    if let Some((_, value)) = get("ANTHROPIC_API_KEY") {
        config.upstream.anthropic_api_key = Some(SecretString::new(value));
    }
    if let Some((var, value)) = get("DEFAULT_MAX_OUTPUT_TOKENS") {
        config.accounting.default_max_output_tokens =
            value.parse().map_err(|e| ConfigError::env(var, e))?;
    }
    if let Some((_, value)) = get("LOG_LEVEL") {
        config.telemetry.log_level = value;
    }
    if let Some((var, value)) = get("JSON_LOGS") {
        config.telemetry.json_logs = parse_bool(&var, &value)?;
    }
    if let Some((_, value)) = get("OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(value).filter(|v| !v.is_empty());
    }

    debug!(prefix, "Applied environment overrides");
    Ok(())
}

fn parse_duration(var: &str, value: &str) -> ConfigResult<Duration> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| ConfigError::env(var, e))
}

fn parse_bool(var: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env(var, format!("expected a boolean, got {value:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r"
server:
  port: 9000
  request_timeout: 30s
accounting:
  waste_window_days: 7
pricing:
  providers:
    openai:
      gpt-4o:
        input: 5.0
        output: 15.0
";
        let config = ConfigLoader::parse(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.request_timeout, Duration::from_secs(30));
        assert_eq!(config.accounting.waste_window_days, 7);
        assert_eq!(config.accounting.top_window_days, 30);
        assert_eq!(config.accounting.default_max_output_tokens, 4096);
        assert!((config.pricing.providers["openai"]["gpt-4o"].input - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[database]
url = "memory"

[auth]
jwt_expiration = "1h"
"#;
        let config = ConfigLoader::parse(toml, ConfigFormat::Toml).unwrap();
        assert!(config.database.is_memory());
        assert_eq!(config.auth.jwt_expiration, Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = ConfigLoader::parse("server: [not, a, map", ConfigFormat::Yaml);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AuditorConfig::default();
        apply_env_overrides(
            &mut config,
            "AUDITOR",
            env(&[
                ("AUDITOR_PORT", "8080"),
                ("AUDITOR_JWT_SECRET", "s3cret"),
                ("AUDITOR_JWT_EXPIRATION", "2h"),
                ("AUDITOR_CORS_ORIGINS", "https://a.example, https://b.example,"),
                ("AUDITOR_JSON_LOGS", "true"),
                ("AUDITOR_OPENAI_API_KEY", "sk-test"),
                ("AUDITOR_DEFAULT_MAX_OUTPUT_TOKENS", "1024"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.jwt_secret.expose_secret(), "s3cret");
        assert_eq!(config.auth.jwt_expiration, Duration::from_secs(7200));
        assert_eq!(
            config.server.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert!(config.telemetry.json_logs);
        assert!(config.upstream.openai_api_key.is_some());
        assert_eq!(config.accounting.default_max_output_tokens, 1024);
        assert!(!config.uses_dev_secret());
    }

    #[test]
    fn test_env_override_rejects_bad_port() {
        let mut config = AuditorConfig::default();
        let err = apply_env_overrides(&mut config, "AUDITOR", env(&[("AUDITOR_PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "AUDITOR_PORT"));
    }

    #[tokio::test]
    async fn test_load_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "server:\n  port: 9100\ntelemetry:\n  log_level: debug").unwrap();

        let config = ConfigLoader::new()
            .with_file(file.path())
            .without_env()
            .load()
            .await
            .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/auditor.yaml")
            .without_env()
            .load()
            .await;
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "accounting:\n  top_n: 0").unwrap();

        let result = ConfigLoader::new()
            .with_file(file.path())
            .without_env()
            .load()
            .await;
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
