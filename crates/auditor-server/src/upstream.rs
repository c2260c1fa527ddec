//! Upstream LLM provider client.

use std::sync::Arc;

use auditor_accounting::{PROVIDER_ANTHROPIC, PROVIDER_OPENAI};
use auditor_config::UpstreamConfig;
use axum::body::Bytes;
use http::{HeaderValue, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

/// Anthropic API version sent with every call
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One supported upstream API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// `POST {openai_base_url}/v1/chat/completions`
    OpenAi,
    /// `POST {anthropic_base_url}/v1/messages`
    Anthropic,
}

impl Provider {
    /// Ledger name of the provider
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAi => PROVIDER_OPENAI,
            Self::Anthropic => PROVIDER_ANTHROPIC,
        }
    }

    /// Model used when the request names none
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-sonnet-20241022",
        }
    }

    /// Input and output token counts from a response's `usage` object
    pub fn usage(self, body: &Value) -> (u64, u64) {
        let usage = &body["usage"];
        let (input, output) = match self {
            Self::OpenAi => ("prompt_tokens", "completion_tokens"),
            Self::Anthropic => ("input_tokens", "output_tokens"),
        };
        (
            usage[input].as_u64().unwrap_or(0),
            usage[output].as_u64().unwrap_or(0),
        )
    }
}

/// Upstream reply, passed back to the caller unchanged
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    /// Upstream status
    pub status: StatusCode,
    /// Upstream content type
    pub content_type: Option<HeaderValue>,
    /// Raw body
    pub body: Bytes,
}

impl UpstreamReply {
    /// Body parsed as JSON, if it is JSON
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Forwards proxied calls to the providers.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    config: Arc<UpstreamConfig>,
}

impl UpstreamClient {
    /// Build a client with the configured timeout
    pub fn new(config: UpstreamConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("ai-cost-auditor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    fn endpoint(&self, provider: Provider) -> String {
        let (base, path) = match provider {
            Provider::OpenAi => (&self.config.openai_base_url, "/v1/chat/completions"),
            Provider::Anthropic => (&self.config.anthropic_base_url, "/v1/messages"),
        };
        format!("{}{path}", base.trim_end_matches('/'))
    }

    fn api_key(&self, provider: Provider) -> Option<&SecretString> {
        match provider {
            Provider::OpenAi => self.config.openai_api_key.as_ref(),
            Provider::Anthropic => self.config.anthropic_api_key.as_ref(),
        }
    }

    /// POST the request body to the provider
    pub async fn forward(
        &self,
        provider: Provider,
        body: &Value,
        request_id: &str,
    ) -> Result<UpstreamReply, reqwest::Error> {
        let url = self.endpoint(provider);
        let mut request = self.http.post(&url).json(body).header("x-request-id", request_id);

        match (provider, self.api_key(provider)) {
            (Provider::OpenAi, Some(key)) => {
                request = request.bearer_auth(key.expose_secret());
            }
            (Provider::Anthropic, Some(key)) => {
                request = request
                    .header("x-api-key", key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION);
            }
            (Provider::Anthropic, None) => {
                warn!(provider = provider.name(), "No upstream API key configured");
                request = request.header("anthropic-version", ANTHROPIC_VERSION);
            }
            (Provider::OpenAi, None) => {
                warn!(provider = provider.name(), "No upstream API key configured");
            }
        }

        let response = request.send().await?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok());
        let body = response.bytes().await?;

        debug!(
            provider = provider.name(),
            url = %url,
            status = status.as_u16(),
            bytes = body.len(),
            "Upstream replied"
        );

        Ok(UpstreamReply {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_fields_per_provider() {
        let openai = json!({"usage": {"prompt_tokens": 12, "completion_tokens": 30, "total_tokens": 42}});
        assert_eq!(Provider::OpenAi.usage(&openai), (12, 30));

        let anthropic = json!({"usage": {"input_tokens": 7, "output_tokens": 9}});
        assert_eq!(Provider::Anthropic.usage(&anthropic), (7, 9));

        assert_eq!(Provider::OpenAi.usage(&json!({})), (0, 0));
        assert_eq!(Provider::Anthropic.usage(&openai), (0, 0));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let config = UpstreamConfig {
            openai_base_url: "http://localhost:9000/".to_string(),
            ..UpstreamConfig::default()
        };
        let client = UpstreamClient::new(config).unwrap();
        assert_eq!(
            client.endpoint(Provider::OpenAi),
            "http://localhost:9000/v1/chat/completions"
        );
        assert_eq!(
            client.endpoint(Provider::Anthropic),
            "https://api.anthropic.com/v1/messages"
        );
    }
}
