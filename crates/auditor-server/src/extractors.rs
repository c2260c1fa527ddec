//! Custom Axum extractors.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ApiError;

/// Header carrying the proxy caller's virtual key
pub const VIRTUAL_KEY_HEADER: &str = "x-virtual-key";

/// Plaintext virtual key from `X-Virtual-Key`
#[derive(Clone)]
pub struct VirtualKeyHeader(pub String);

impl std::fmt::Debug for VirtualKeyHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VirtualKeyHeader(..)")
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for VirtualKeyHeader
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(VIRTUAL_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::unauthorized("X-Virtual-Key header required"))?;

        Ok(Self(key.to_string()))
    }
}

/// Extract request ID from headers or generate one
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-request-id")
            .or_else(|| parts.headers.get("x-correlation-id"))
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);

        Ok(Self(id))
    }
}

/// JSON body extractor; malformed bodies are rejected with 422
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = axum::body::Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read request body: {e}")))?;

        let value: T = serde_json::from_slice(&bytes).map_err(|e| {
            debug!(error = %e, "JSON parse error");
            ApiError::unprocessable(format!("Invalid JSON: {e}"))
        })?;

        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request as HttpRequest, StatusCode};
    use serde::Deserialize;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = HttpRequest::builder().uri("/proxy/openai/v1/chat/completions");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_virtual_key_header_required() {
        let err = VirtualKeyHeader::from_request_parts(&mut parts(&[]), &())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message(), "X-Virtual-Key header required");

        let mut with_key = parts(&[("X-Virtual-Key", " vk_abc ")]);
        let key = VirtualKeyHeader::from_request_parts(&mut with_key, &())
            .await
            .unwrap();
        assert_eq!(key.0, "vk_abc");
    }

    #[tokio::test]
    async fn test_request_id_is_propagated_or_generated() {
        let id = RequestId::from_request_parts(&mut parts(&[("x-request-id", "req-1")]), &())
            .await
            .unwrap();
        assert_eq!(id.0, "req-1");

        let generated = RequestId::from_request_parts(&mut parts(&[]), &()).await.unwrap();
        assert!(uuid::Uuid::parse_str(&generated.0).is_ok());
    }

    #[derive(Debug, Deserialize)]
    struct Named {
        name: String,
    }

    #[tokio::test]
    async fn test_json_body_rejects_malformed_with_422() {
        let req = HttpRequest::builder()
            .body(axum::body::Body::from("{\"name\": 3"))
            .unwrap();
        let err = JsonBody::<Named>::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

        let req = HttpRequest::builder()
            .body(axum::body::Body::from("{\"name\": \"ops\"}"))
            .unwrap();
        let JsonBody(named) = JsonBody::<Named>::from_request(req, &()).await.unwrap();
        assert_eq!(named.name, "ops");
    }
}
