//! Versioned SQLite schema.
//!
//! Each migration is a list of statements applied in one transaction and
//! recorded in `_migrations` with a SHA-256 checksum of its SQL.

use sha2::{Digest, Sha256};

/// One schema version.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Monotonic version number
    pub version: i64,
    /// Short description
    pub name: &'static str,
    /// Statements, applied in order
    pub statements: &'static [&'static str],
}

impl Migration {
    /// SHA-256 hex digest over the statements
    #[must_use]
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for statement in self.statements {
            hasher.update(statement.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

pub(crate) const MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

/// Every migration, oldest first.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_directory",
        statements: &[
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                full_name TEXT,
                is_admin INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS organizations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS teams (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                organization_id INTEGER NOT NULL REFERENCES organizations(id),
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                organization_id INTEGER NOT NULL REFERENCES organizations(id),
                team_id INTEGER REFERENCES teams(id),
                created_at TEXT NOT NULL
            )",
        ],
    },
    Migration {
        version: 2,
        name: "create_virtual_keys",
        statements: &[
            "CREATE TABLE IF NOT EXISTS virtual_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key_hash TEXT NOT NULL UNIQUE,
                key_prefix TEXT NOT NULL,
                name TEXT NOT NULL,
                team_id INTEGER REFERENCES teams(id),
                project_id INTEGER REFERENCES projects(id),
                user_email TEXT,
                cost_centre TEXT,
                environment TEXT,
                agent_name TEXT,
                monthly_budget_cap REAL,
                max_tokens_per_request INTEGER,
                max_reasoning_tokens INTEGER,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_by INTEGER REFERENCES users(id),
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_virtual_keys_user_email ON virtual_keys(user_email)",
            "CREATE INDEX IF NOT EXISTS idx_virtual_keys_created ON virtual_keys(created_at, id)",
            "CREATE INDEX IF NOT EXISTS idx_virtual_keys_prefix ON virtual_keys(key_prefix)",
            "CREATE TRIGGER IF NOT EXISTS virtual_keys_no_delete
                BEFORE DELETE ON virtual_keys
                BEGIN
                    SELECT RAISE(ABORT, 'virtual keys are revoked, never deleted');
                END",
        ],
    },
    Migration {
        version: 3,
        name: "create_usage_events",
        statements: &[
            "CREATE TABLE IF NOT EXISTS usage_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                virtual_key_id INTEGER NOT NULL REFERENCES virtual_keys(id),
                user_id INTEGER REFERENCES users(id),
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                input_cost REAL NOT NULL DEFAULT 0,
                output_cost REAL NOT NULL DEFAULT 0,
                total_cost REAL NOT NULL DEFAULT 0,
                prompt_hash TEXT,
                prompt_chars INTEGER,
                prompt_preview TEXT,
                request_id TEXT,
                status_code INTEGER,
                was_blocked INTEGER NOT NULL DEFAULT 0,
                block_reason TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_usage_events_key_time ON usage_events(virtual_key_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_usage_events_time ON usage_events(created_at, id)",
            "CREATE INDEX IF NOT EXISTS idx_usage_events_prompt_hash ON usage_events(prompt_hash)",
            "CREATE TRIGGER IF NOT EXISTS usage_events_no_update
                BEFORE UPDATE ON usage_events
                BEGIN
                    SELECT RAISE(ABORT, 'usage events are append-only');
                END",
            "CREATE TRIGGER IF NOT EXISTS usage_events_no_delete
                BEFORE DELETE ON usage_events
                BEGIN
                    SELECT RAISE(ABORT, 'usage events are append-only');
                END",
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_increasing() {
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
    }

    #[test]
    fn test_checksum_is_stable() {
        let first = MIGRATIONS[0].checksum();
        assert_eq!(first.len(), 64);
        assert_eq!(first, MIGRATIONS[0].checksum());
        assert_ne!(first, MIGRATIONS[1].checksum());
    }
}
