//! LLM proxy handlers.
//!
//! Each call is authenticated by its virtual key, checked against the key's
//! token limit and monthly budget, forwarded upstream, and written to the
//! usage ledger whatever the outcome.

use auditor_accounting::PromptFingerprint;
use auditor_core::{AuditorError, NewUsageEvent, VirtualKey};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::Response;
use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::error::ApiError;
use crate::extractors::{JsonBody, RequestId, VirtualKeyHeader};
use crate::state::AppState;
use crate::upstream::{Provider, UpstreamReply};

/// Block reason recorded when the prompt estimate exceeds the key's limit
pub const TOKEN_LIMIT_REASON: &str = "max_tokens_per_request exceeded";

/// `POST /proxy/openai/v1/chat/completions`
pub async fn openai_chat_completions(
    State(state): State<AppState>,
    VirtualKeyHeader(key): VirtualKeyHeader,
    RequestId(request_id): RequestId,
    JsonBody(body): JsonBody<Value>,
) -> Result<Response, ApiError> {
    forward(state, Provider::OpenAi, &key, request_id, body).await
}

/// `POST /proxy/anthropic/v1/messages`
pub async fn anthropic_messages(
    State(state): State<AppState>,
    VirtualKeyHeader(key): VirtualKeyHeader,
    RequestId(request_id): RequestId,
    JsonBody(body): JsonBody<Value>,
) -> Result<Response, ApiError> {
    forward(state, Provider::Anthropic, &key, request_id, body).await
}

/// One proxied call, with everything its ledger event needs.
struct ProxyCall {
    provider: Provider,
    key: VirtualKey,
    model: String,
    prompt: PromptFingerprint,
    request_id: String,
}

impl ProxyCall {
    fn event(&self) -> NewUsageEvent {
        NewUsageEvent::new(self.key.id, self.provider.name(), self.model.clone())
            .with_prompt_hash(self.prompt.hash.clone())
            .with_prompt_preview(self.prompt.preview.clone(), self.prompt.chars)
            .with_request_id(self.request_id.clone())
    }

    fn blocked(&self, status: StatusCode, reason: impl Into<String>) -> NewUsageEvent {
        self.event().blocked(reason).with_status(status.as_u16())
    }

    /// Output tokens the call may produce: the request's `max_tokens`, else
    /// the key's per-request limit, else `default`
    fn max_output_tokens(&self, body: &Value, default: u32) -> u64 {
        body.get("max_tokens")
            .and_then(Value::as_u64)
            .or_else(|| self.key.max_tokens_per_request.map(u64::from))
            .unwrap_or_else(|| u64::from(default))
    }
}

#[instrument(
    name = "proxy",
    skip_all,
    fields(provider = provider.name(), request_id = %request_id)
)]
async fn forward(
    state: AppState,
    provider: Provider,
    plaintext_key: &str,
    request_id: String,
    mut body: Value,
) -> Result<Response, ApiError> {
    let key = state.registry.authenticate(plaintext_key).await?;

    if !body.is_object() {
        return Err(ApiError::unprocessable("Request body must be a JSON object"));
    }

    let model = body
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| provider.default_model())
        .to_string();
    let messages = body.get("messages").cloned().unwrap_or(Value::Null);
    let prompt = PromptFingerprint::from_messages(&model, &messages);

    let call = ProxyCall {
        provider,
        key,
        model,
        prompt,
        request_id,
    };

    let estimated_input = call.prompt.estimated_tokens();
    if let Some(limit) = call.key.max_tokens_per_request {
        if estimated_input > u64::from(limit) {
            record(&state, call.blocked(StatusCode::BAD_REQUEST, TOKEN_LIMIT_REASON)).await;
            return Err(ApiError::bad_request(format!(
                "Request exceeds max tokens limit of {limit}"
            )));
        }
    }

    // Upstream is held to the output limit the reservation is priced at.
    let max_output =
        call.max_output_tokens(&body, state.config.accounting.default_max_output_tokens);
    if let Some(fields) = body.as_object_mut() {
        if fields.get("max_tokens").and_then(Value::as_u64).is_none() {
            fields.insert("max_tokens".to_string(), Value::from(max_output));
        }
    }

    let projected = state
        .pricing
        .cost(provider.name(), &call.model, estimated_input, max_output)
        .total_cost;

    let reservation = match state.budget.reserve(&call.key, projected, Utc::now()).await {
        Ok(reservation) => reservation,
        Err(err @ AuditorError::BudgetExceeded { .. }) => {
            record(&state, call.blocked(StatusCode::FORBIDDEN, err.to_string())).await;
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    let reply = match state
        .upstream
        .forward(provider, &body, &call.request_id)
        .await
    {
        Ok(reply) => reply,
        Err(err) => {
            warn!(
                virtual_key_id = call.key.id,
                model = %call.model,
                error = %err,
                "Upstream call failed"
            );
            record(&state, call.event().with_status(StatusCode::BAD_GATEWAY.as_u16())).await;
            drop(reservation);
            return Err(ApiError::bad_gateway(format!(
                "Upstream {} request failed",
                provider.name()
            )));
        }
    };

    let mut event = call.event().with_status(reply.status.as_u16());
    if reply.status.is_success() {
        let (input_tokens, output_tokens) = reply
            .json()
            .map_or((0, 0), |json| provider.usage(&json));
        let cost = state
            .pricing
            .cost(provider.name(), &call.model, input_tokens, output_tokens);
        event = event
            .with_tokens(input_tokens, output_tokens)
            .with_costs(cost.input_cost, cost.output_cost);

        if let Some(limit) = call.key.max_reasoning_tokens {
            if output_tokens > u64::from(limit) {
                warn!(
                    virtual_key_id = call.key.id,
                    output_tokens,
                    max_reasoning_tokens = limit,
                    "Reasoning token limit exceeded"
                );
            }
        }
    }

    record(&state, event).await;
    drop(reservation);

    info!(
        virtual_key_id = call.key.id,
        model = %call.model,
        status = reply.status.as_u16(),
        "Proxied request completed"
    );
    Ok(into_response(reply))
}

/// Append to the ledger. The caller's response never depends on the write.
async fn record(state: &AppState, event: NewUsageEvent) {
    let provider = event.provider.clone();
    let blocked = event.was_blocked;
    let cost = event.total_cost;

    match state.ledger.record(event).await {
        Ok(_) => state.metrics.record_usage(&provider, blocked, cost),
        Err(err) => error!(error = %err, provider = %provider, "Failed to record usage event"),
    }
}

fn into_response(reply: UpstreamReply) -> Response {
    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = reply.status;
    if let Some(content_type) = reply.content_type {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    response
}
