//! # Auditor Storage
//!
//! Repository implementations for the AI Cost Auditor:
//! - [`MemoryStore`]: process-local, for tests and development
//! - [`SqliteStore`]: durable, backed by `sqlx` with versioned migrations

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod memory;
pub mod schema;
pub mod sqlite;

use std::sync::Arc;

use auditor_config::DatabaseConfig;
use auditor_core::{AuditStore, AuditorResult};
use tracing::info;

pub use memory::MemoryStore;
pub use schema::{Migration, MIGRATIONS};
pub use sqlite::SqliteStore;

/// Open the store selected by the database configuration.
///
/// SQLite stores are migrated before they are returned.
pub async fn open_store(config: &DatabaseConfig) -> AuditorResult<Arc<dyn AuditStore>> {
    if config.is_memory() {
        info!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = SqliteStore::connect(&config.url, config.max_connections).await?;
    store.migrate().await?;
    info!(url = %config.url, "Using SQLite store");
    Ok(Arc::new(store))
}
