//! # Auditor Server
//!
//! HTTP server for the AI Cost Auditor.
//!
//! This crate provides:
//! - Axum-based HTTP server with graceful shutdown
//! - Dashboard API: login, virtual key admin, usage events, metrics overview
//! - OpenAI and Anthropic proxy routes that enforce key limits and write the
//!   usage ledger
//! - Request tracing, request ids, CORS, timeouts, and Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod upstream;

// Re-export main types
pub use auth::{hash_password, verify_login, verify_password, AuthUser, Claims, TokenResponse, TokenService};
pub use error::{ApiError, ServerError};
pub use routes::create_router;
pub use server::Server;
pub use shutdown::shutdown_signal;
pub use state::AppState;
pub use upstream::{Provider, UpstreamClient};
