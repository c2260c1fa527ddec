//! Route definitions.

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{handlers, middleware, proxy, state::AppState};

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let config = &state.config.server;
    let cors = middleware::cors_layer(&config.cors_origins);
    let timeout = config.request_timeout;

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest("/api/auth", auth_routes())
        .nest("/api/admin", admin_routes())
        .route("/api/metrics/overview", get(handlers::metrics_overview))
        .nest("/proxy", proxy_routes())
        .fallback(handlers::not_found)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::metrics_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    middleware::REQUEST_ID_HEADER,
                    MakeRequestUuid,
                ))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(PropagateRequestIdLayer::new(middleware::REQUEST_ID_HEADER))
                .layer(TimeoutLayer::new(timeout)),
        )
        .layer(cors)
        .with_state(state)
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/token", post(handlers::login))
        .route("/me", get(handlers::me))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/virtual-keys",
            get(handlers::list_virtual_keys).post(handlers::create_virtual_key),
        )
        .route(
            "/virtual-keys/:id",
            get(handlers::get_virtual_key).patch(handlers::update_virtual_key),
        )
        .route("/virtual-keys/:id/revoke", post(handlers::revoke_virtual_key))
        .route("/usage-events", get(handlers::list_usage_events))
        .route("/projects", get(handlers::list_projects))
        .route("/teams", get(handlers::list_teams))
}

fn proxy_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/openai/v1/chat/completions",
            post(proxy::openai_chat_completions),
        )
        .route("/anthropic/v1/messages", post(proxy::anthropic_messages))
}
