//! HTTP request handlers for the dashboard API.

use auditor_accounting::UsageQuery;
use auditor_core::{
    AuditorError, MetricsOverview, Project, Team, UsageEvent, UserProfile, VirtualKey,
    VirtualKeyCreate, VirtualKeyUpdate,
};
use axum::{
    async_trait,
    extract::{rejection::QueryRejection, FromRequest, Multipart, Path, Query, Request, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Form, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::auth::{verify_login, AuthUser, TokenResponse};
use crate::error::ApiError;
use crate::extractors::JsonBody;
use crate::state::AppState;

/// Service banner
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "AI Cost Auditor API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

/// Liveness probe
pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

/// Prometheus exposition
pub async fn prometheus_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.render().map_err(|e| {
        error!(error = %e, "Failed to render metrics");
        ApiError::internal()
    })?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}

/// Login credentials, from a urlencoded or multipart form.
#[derive(Deserialize)]
pub struct LoginForm {
    /// User email
    pub username: String,
    /// Plaintext password
    pub password: String,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> FromRequest<S> for LoginForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let Form(form) = Form::<Self>::from_request(req, state)
                .await
                .map_err(|e| ApiError::unprocessable(e.body_text()))?;
            return Ok(form);
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiError::unprocessable(e.body_text()))?;

        let (mut username, mut password) = (None, None);
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::unprocessable(e.body_text()))?
        {
            let name = field.name().map(str::to_string);
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::unprocessable(e.body_text()))?;
            match name.as_deref() {
                Some("username") => username = Some(value),
                Some("password") => password = Some(value),
                _ => {}
            }
        }

        match (username, password) {
            (Some(username), Some(password)) => Ok(Self { username, password }),
            _ => Err(ApiError::unprocessable("username and password are required")),
        }
    }
}

/// `POST /api/auth/token`
#[instrument(skip_all, fields(username = %form.username))]
pub async fn login(
    State(state): State<AppState>,
    form: LoginForm,
) -> Result<Json<TokenResponse>, ApiError> {
    let rejected = || ApiError::unauthorized("Incorrect email or password");

    let user = state.store.find_user_by_email(&form.username).await?;

    let stored = user.as_ref().map(|u| u.password_hash.clone());
    let password = form.password;
    let verified = tokio::task::spawn_blocking(move || verify_login(&password, stored.as_deref()))
        .await
        .map_err(|e| AuditorError::internal(format!("password verification task failed: {e}")))?;

    let Some(user) = user else {
        warn!("Login for unknown user");
        return Err(rejected());
    };
    if !verified {
        warn!(user_id = user.id, "Login with wrong password");
        return Err(rejected());
    }
    if !user.is_active {
        warn!(user_id = user.id, "Login for inactive user");
        return Err(ApiError::unauthorized("Inactive user"));
    }

    let token = state.tokens.issue(&user.email)?;
    info!(user_id = user.id, "User logged in");
    Ok(Json(token))
}

/// `GET /api/auth/me`
pub async fn me(auth: AuthUser) -> Json<UserProfile> {
    Json(auth.profile)
}

/// `POST /api/admin/virtual-keys`
pub async fn create_virtual_key(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(spec): JsonBody<VirtualKeyCreate>,
) -> Result<Json<VirtualKey>, ApiError> {
    Ok(Json(state.registry.create(&auth.principal, spec).await?))
}

/// `GET /api/admin/virtual-keys`
pub async fn list_virtual_keys(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<VirtualKey>>, ApiError> {
    Ok(Json(state.registry.list(&auth.principal).await?))
}

/// `GET /api/admin/virtual-keys/:id`
pub async fn get_virtual_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<VirtualKey>, ApiError> {
    Ok(Json(state.registry.get(&auth.principal, id).await?))
}

/// `PATCH /api/admin/virtual-keys/:id`
pub async fn update_virtual_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    JsonBody(patch): JsonBody<VirtualKeyUpdate>,
) -> Result<Json<VirtualKey>, ApiError> {
    Ok(Json(
        state
            .registry
            .update_limits(&auth.principal, id, patch)
            .await?,
    ))
}

/// `POST /api/admin/virtual-keys/:id/revoke`
pub async fn revoke_virtual_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<VirtualKey>, ApiError> {
    Ok(Json(state.registry.revoke(&auth.principal, id).await?))
}

/// `GET /api/admin/usage-events`
pub async fn list_usage_events(
    State(state): State<AppState>,
    auth: AuthUser,
    query: Result<Query<UsageQuery>, QueryRejection>,
) -> Result<Json<Vec<UsageEvent>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(Json(state.ledger.query(&auth.principal, &query).await?))
}

/// `GET /api/admin/projects`
pub async fn list_projects(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<Vec<Project>>, ApiError> {
    Ok(Json(state.store.list_projects().await?))
}

/// `GET /api/admin/teams`
pub async fn list_teams(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<Vec<Team>>, ApiError> {
    Ok(Json(state.store.list_teams().await?))
}

/// `GET /api/metrics/overview`
pub async fn metrics_overview(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<MetricsOverview>, ApiError> {
    let overview = state.assembler.overview(&auth.principal, Utc::now()).await?;
    Ok(Json(overview))
}

/// Fallback for unknown routes
pub async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", "Not Found")
}
