//! Serve command - run the HTTP server.

use anyhow::{Context, Result};
use auditor_config::AuditorConfig;
use auditor_server::{AppState, Server};
use tracing::{info, warn};

/// Execute the serve command.
pub async fn execute(config: AuditorConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting AI Cost Auditor"
    );
    if config.uses_dev_secret() {
        warn!("Using the development JWT secret; set AUDITOR_JWT_SECRET in production");
    }
    if config.upstream.openai_api_key.is_none() {
        warn!("AUDITOR_OPENAI_API_KEY not set; OpenAI proxy calls will be unauthenticated");
    }
    if config.upstream.anthropic_api_key.is_none() {
        warn!("AUDITOR_ANTHROPIC_API_KEY not set; Anthropic proxy calls will be unauthenticated");
    }

    let store = auditor_storage::open_store(&config.database)
        .await
        .context("Failed to open the store")?;
    let state = AppState::new(config, store)?;

    Server::new(state).run().await.context("Server failed")
}
