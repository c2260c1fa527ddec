//! Migrate command - apply pending schema migrations.

use anyhow::{bail, Result};
use auditor_config::AuditorConfig;
use auditor_storage::SqliteStore;
use tracing::info;

/// Execute the migrate command.
pub async fn execute(config: AuditorConfig) -> Result<()> {
    let database = &config.database;
    if database.is_memory() {
        bail!("the in-memory store has no schema to migrate");
    }

    let store = SqliteStore::connect(&database.url, database.max_connections).await?;
    let applied = store.migrate().await?;

    if applied.is_empty() {
        info!(url = %database.url, "Database schema is up to date");
    } else {
        info!(url = %database.url, versions = ?applied, "Applied migrations");
    }
    println!("Applied {} migration(s)", applied.len());
    Ok(())
}
