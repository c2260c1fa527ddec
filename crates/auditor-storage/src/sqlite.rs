//! SQLite store backed by `sqlx`.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use auditor_core::types::mask_key;
use auditor_core::{
    AuditorError, AuditorResult, DirectoryRepository, KeyLimits, KeyRepository, NewProject,
    NewTeam, NewUsageEvent, NewUser, NewVirtualKey, Organization, Project, Team, UsageEvent,
    UsageFilter, UsageRepository, UsageTotals, User, VirtualKey,
};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::schema::{MIGRATIONS, MIGRATIONS_TABLE};

const KEY_COLUMNS: &str = "id, key_hash, key_prefix, name, team_id, project_id, user_email, \
    cost_centre, environment, agent_name, monthly_budget_cap, max_tokens_per_request, \
    max_reasoning_tokens, is_active, created_by, created_at";

const EVENT_COLUMNS: &str = "id, virtual_key_id, user_id, provider, model, input_tokens, \
    output_tokens, total_tokens, input_cost, output_cost, total_cost, prompt_hash, prompt_chars, \
    prompt_preview, request_id, status_code, was_blocked, block_reason, created_at";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn db_err(e: sqlx::Error) -> AuditorError {
    AuditorError::storage(e.to_string())
}

fn insert_err(e: sqlx::Error, what: &str) -> AuditorError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AuditorError::Conflict(format!("{what} already exists"))
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            AuditorError::validation(format!("{what} references a missing record"), None)
        }
        _ => db_err(e),
    }
}

/// Fixed-width RFC 3339 so TEXT comparison orders chronologically.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> AuditorResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AuditorError::storage(format!("Invalid datetime '{s}': {e}")))
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> AuditorResult<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column).map_err(db_err)
}

fn get_u32(row: &SqliteRow, column: &str) -> AuditorResult<Option<u32>> {
    get::<Option<i64>>(row, column)?
        .map(|v| {
            u32::try_from(v)
                .map_err(|_| AuditorError::storage(format!("{column} out of range: {v}")))
        })
        .transpose()
}

fn get_u64(row: &SqliteRow, column: &str) -> AuditorResult<u64> {
    let value: i64 = get(row, column)?;
    u64::try_from(value).map_err(|_| AuditorError::storage(format!("{column} out of range: {value}")))
}

fn key_from_row(row: &SqliteRow) -> AuditorResult<VirtualKey> {
    let prefix: String = get(row, "key_prefix")?;
    Ok(VirtualKey {
        id: get(row, "id")?,
        key: mask_key(&prefix),
        name: get(row, "name")?,
        team_id: get(row, "team_id")?,
        project_id: get(row, "project_id")?,
        user_email: get(row, "user_email")?,
        cost_centre: get(row, "cost_centre")?,
        environment: get(row, "environment")?,
        agent_name: get(row, "agent_name")?,
        monthly_budget_cap: get(row, "monthly_budget_cap")?,
        max_tokens_per_request: get_u32(row, "max_tokens_per_request")?,
        max_reasoning_tokens: get_u32(row, "max_reasoning_tokens")?,
        is_active: get(row, "is_active")?,
        created_at: parse_datetime(&get::<String>(row, "created_at")?)?,
        key_hash: get(row, "key_hash")?,
        created_by: get(row, "created_by")?,
    })
}

fn event_from_row(row: &SqliteRow) -> AuditorResult<UsageEvent> {
    let status_code = get::<Option<i64>>(row, "status_code")?
        .map(|v| {
            u16::try_from(v).map_err(|_| AuditorError::storage(format!("status_code out of range: {v}")))
        })
        .transpose()?;

    Ok(UsageEvent {
        id: get(row, "id")?,
        virtual_key_id: get(row, "virtual_key_id")?,
        user_id: get(row, "user_id")?,
        provider: get(row, "provider")?,
        model: get(row, "model")?,
        input_tokens: get_u64(row, "input_tokens")?,
        output_tokens: get_u64(row, "output_tokens")?,
        total_tokens: get_u64(row, "total_tokens")?,
        input_cost: get(row, "input_cost")?,
        output_cost: get(row, "output_cost")?,
        total_cost: get(row, "total_cost")?,
        prompt_hash: get(row, "prompt_hash")?,
        status_code,
        was_blocked: get(row, "was_blocked")?,
        block_reason: get(row, "block_reason")?,
        created_at: parse_datetime(&get::<String>(row, "created_at")?)?,
        prompt_chars: get_u32(row, "prompt_chars")?,
        prompt_preview: get(row, "prompt_preview")?,
        request_id: get(row, "request_id")?,
    })
}

fn user_from_row(row: &SqliteRow) -> AuditorResult<User> {
    Ok(User {
        id: get(row, "id")?,
        email: get(row, "email")?,
        password_hash: get(row, "password_hash")?,
        full_name: get(row, "full_name")?,
        is_admin: get(row, "is_admin")?,
        is_active: get(row, "is_active")?,
        created_at: parse_datetime(&get::<String>(row, "created_at")?)?,
    })
}

fn organization_from_row(row: &SqliteRow) -> AuditorResult<Organization> {
    Ok(Organization {
        id: get(row, "id")?,
        name: get(row, "name")?,
        created_at: parse_datetime(&get::<String>(row, "created_at")?)?,
    })
}

/// Append the filter's WHERE clause to a query that already ends in `WHERE 1 = 1`.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &UsageFilter) {
    if let Some(ids) = &filter.virtual_key_ids {
        if ids.is_empty() {
            qb.push(" AND 0 = 1");
        } else {
            qb.push(" AND virtual_key_id IN (");
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
        }
    }
    if let Some(since) = filter.since {
        qb.push(" AND created_at >= ");
        qb.push_bind(format_datetime(since));
    }
    if let Some(until) = filter.until {
        qb.push(" AND created_at <= ");
        qb.push_bind(format_datetime(until));
    }
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Durable implementation of every repository trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> AuditorResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AuditorError::storage(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        // Every connection to `:memory:` opens its own database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AuditorError::storage(format!("Failed to connect to SQLite: {e}")))?;

        debug!(max_connections, "SQLite pool opened");
        Ok(Self { pool })
    }

    /// Open a private in-memory database and migrate it
    pub async fn in_memory() -> AuditorResult<Self> {
        let store = Self::connect("sqlite::memory:", 1).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Apply pending migrations; returns the versions applied
    pub async fn migrate(&self) -> AuditorResult<Vec<i64>> {
        sqlx::query(MIGRATIONS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let applied: HashMap<i64, String> = sqlx::query("SELECT version, checksum FROM _migrations")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(|row| -> AuditorResult<(i64, String)> {
                Ok((get(row, "version")?, get(row, "checksum")?))
            })
            .collect::<AuditorResult<_>>()?;

        let mut newly_applied = Vec::new();
        for migration in MIGRATIONS {
            let checksum = migration.checksum();
            if let Some(recorded) = applied.get(&migration.version) {
                if *recorded != checksum {
                    return Err(AuditorError::storage(format!(
                        "Checksum mismatch for migration {}: expected {recorded}, got {checksum}",
                        migration.version
                    )));
                }
                continue;
            }

            let mut tx = self.pool.begin().await.map_err(db_err)?;
            for statement in migration.statements {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        AuditorError::storage(format!(
                            "Migration {} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
            sqlx::query(
                "INSERT INTO _migrations (version, name, checksum, applied_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(migration.version)
            .bind(migration.name)
            .bind(&checksum)
            .bind(format_datetime(Utc::now()))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;

            info!(version = migration.version, name = migration.name, "Migration applied");
            newly_applied.push(migration.version);
        }

        Ok(newly_applied)
    }

    async fn fetch_key(&self, id: i64) -> AuditorResult<Option<VirtualKey>> {
        sqlx::query(&format!("SELECT {KEY_COLUMNS} FROM virtual_keys WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(key_from_row)
            .transpose()
    }

    async fn fetch_event(&self, id: i64) -> AuditorResult<UsageEvent> {
        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM usage_events WHERE id = ?1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        event_from_row(&row)
    }
}

#[async_trait]
impl KeyRepository for SqliteStore {
    async fn insert_key(&self, key: NewVirtualKey) -> AuditorResult<VirtualKey> {
        let id = sqlx::query(
            "INSERT INTO virtual_keys (key_hash, key_prefix, name, team_id, project_id, user_email, \
             cost_centre, environment, agent_name, monthly_budget_cap, max_tokens_per_request, \
             max_reasoning_tokens, is_active, created_by, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, ?14)",
        )
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(&key.name)
        .bind(key.team_id)
        .bind(key.project_id)
        .bind(&key.user_email)
        .bind(&key.cost_centre)
        .bind(&key.environment)
        .bind(&key.agent_name)
        .bind(key.limits.monthly_budget_cap)
        .bind(key.limits.max_tokens_per_request.map(i64::from))
        .bind(key.limits.max_reasoning_tokens.map(i64::from))
        .bind(key.created_by)
        .bind(format_datetime(key.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err(e, "virtual key"))?
        .last_insert_rowid();

        self.fetch_key(id)
            .await?
            .ok_or_else(|| AuditorError::not_found("Virtual key", id))
    }

    async fn get_key(&self, id: i64) -> AuditorResult<Option<VirtualKey>> {
        self.fetch_key(id).await
    }

    async fn find_key_by_hash(&self, key_hash: &str) -> AuditorResult<Option<VirtualKey>> {
        sqlx::query(&format!("SELECT {KEY_COLUMNS} FROM virtual_keys WHERE key_hash = ?1"))
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(key_from_row)
            .transpose()
    }

    async fn find_keys_by_prefix(&self, key_prefix: &str) -> AuditorResult<Vec<VirtualKey>> {
        sqlx::query(&format!(
            "SELECT {KEY_COLUMNS} FROM virtual_keys WHERE key_prefix = ?1 ORDER BY id"
        ))
        .bind(key_prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .iter()
        .map(key_from_row)
        .collect()
    }

    async fn list_keys(&self, owner_email: Option<&str>) -> AuditorResult<Vec<VirtualKey>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {KEY_COLUMNS} FROM virtual_keys"));
        if let Some(email) = owner_email {
            qb.push(" WHERE user_email = ");
            qb.push_bind(email.to_string());
        }
        qb.push(" ORDER BY created_at DESC, id DESC");

        qb.build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(key_from_row)
            .collect()
    }

    async fn update_key_limits(&self, id: i64, limits: &KeyLimits) -> AuditorResult<VirtualKey> {
        let result = sqlx::query(
            "UPDATE virtual_keys SET monthly_budget_cap = ?1, max_tokens_per_request = ?2, \
             max_reasoning_tokens = ?3 WHERE id = ?4",
        )
        .bind(limits.monthly_budget_cap)
        .bind(limits.max_tokens_per_request.map(i64::from))
        .bind(limits.max_reasoning_tokens.map(i64::from))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AuditorError::not_found("Virtual key", id));
        }
        self.fetch_key(id)
            .await?
            .ok_or_else(|| AuditorError::not_found("Virtual key", id))
    }

    async fn set_key_active(&self, id: i64, active: bool) -> AuditorResult<VirtualKey> {
        let result = sqlx::query("UPDATE virtual_keys SET is_active = ?1 WHERE id = ?2")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AuditorError::not_found("Virtual key", id));
        }
        self.fetch_key(id)
            .await?
            .ok_or_else(|| AuditorError::not_found("Virtual key", id))
    }
}

#[async_trait]
impl UsageRepository for SqliteStore {
    async fn append_event(&self, event: NewUsageEvent) -> AuditorResult<UsageEvent> {
        if self.fetch_key(event.virtual_key_id).await?.is_none() {
            return Err(AuditorError::validation(
                format!("virtual key {} does not exist", event.virtual_key_id),
                Some("virtual_key_id"),
            ));
        }

        let id = sqlx::query(
            "INSERT INTO usage_events (virtual_key_id, user_id, provider, model, input_tokens, \
             output_tokens, total_tokens, input_cost, output_cost, total_cost, prompt_hash, \
             prompt_chars, prompt_preview, request_id, status_code, was_blocked, block_reason, \
             created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        )
        .bind(event.virtual_key_id)
        .bind(event.user_id)
        .bind(&event.provider)
        .bind(&event.model)
        .bind(event.input_tokens as i64)
        .bind(event.output_tokens as i64)
        .bind(event.total_tokens as i64)
        .bind(event.input_cost)
        .bind(event.output_cost)
        .bind(event.total_cost)
        .bind(&event.prompt_hash)
        .bind(event.prompt_chars.map(i64::from))
        .bind(&event.prompt_preview)
        .bind(&event.request_id)
        .bind(event.status_code.map(i64::from))
        .bind(event.was_blocked)
        .bind(&event.block_reason)
        .bind(format_datetime(event.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err(e, "usage event"))?
        .last_insert_rowid();

        self.fetch_event(id).await
    }

    async fn query_events(
        &self,
        filter: &UsageFilter,
        limit: Option<usize>,
    ) -> AuditorResult<Vec<UsageEvent>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM usage_events WHERE 1 = 1"
        ));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }

        qb.build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(event_from_row)
            .collect()
    }

    async fn sum_usage(&self, filter: &UsageFilter) -> AuditorResult<UsageTotals> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COALESCE(SUM(total_cost), 0.0) AS total_cost, COUNT(*) AS request_count, \
             COALESCE(SUM(total_tokens), 0) AS total_tokens FROM usage_events WHERE 1 = 1",
        );
        push_filter(&mut qb, filter);

        let row = qb.build().fetch_one(&self.pool).await.map_err(db_err)?;
        Ok(UsageTotals {
            total_cost: get(&row, "total_cost")?,
            request_count: get_u64(&row, "request_count")?,
            total_tokens: get_u64(&row, "total_tokens")?,
        })
    }
}

#[async_trait]
impl DirectoryRepository for SqliteStore {
    async fn insert_user(&self, user: NewUser) -> AuditorResult<User> {
        let id = sqlx::query(
            "INSERT INTO users (email, password_hash, full_name, is_admin, is_active, created_at) \
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.is_admin)
        .bind(format_datetime(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err(e, "user"))?
        .last_insert_rowid();

        self.get_user(id)
            .await?
            .ok_or_else(|| AuditorError::not_found("User", id))
    }

    async fn find_user_by_email(&self, email: &str) -> AuditorResult<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn get_user(&self, id: i64) -> AuditorResult<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn insert_organization(&self, name: &str) -> AuditorResult<Organization> {
        let created_at = format_datetime(Utc::now());
        let id = sqlx::query("INSERT INTO organizations (name, created_at) VALUES (?1, ?2)")
            .bind(name)
            .bind(&created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_err(e, "organization"))?
            .last_insert_rowid();

        Ok(Organization {
            id,
            name: name.to_string(),
            created_at: parse_datetime(&created_at)?,
        })
    }

    async fn find_organization_by_name(&self, name: &str) -> AuditorResult<Option<Organization>> {
        sqlx::query("SELECT * FROM organizations WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(organization_from_row)
            .transpose()
    }

    async fn insert_team(&self, team: NewTeam) -> AuditorResult<Team> {
        let created_at = format_datetime(Utc::now());
        let id = sqlx::query("INSERT INTO teams (name, organization_id, created_at) VALUES (?1, ?2, ?3)")
            .bind(&team.name)
            .bind(team.organization_id)
            .bind(&created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_err(e, "team"))?
            .last_insert_rowid();

        Ok(Team {
            id,
            name: team.name,
            organization_id: team.organization_id,
            created_at: parse_datetime(&created_at)?,
        })
    }

    async fn list_teams(&self) -> AuditorResult<Vec<Team>> {
        sqlx::query("SELECT * FROM teams ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(|row| -> AuditorResult<Team> {
                Ok(Team {
                    id: get(row, "id")?,
                    name: get(row, "name")?,
                    organization_id: get(row, "organization_id")?,
                    created_at: parse_datetime(&get::<String>(row, "created_at")?)?,
                })
            })
            .collect()
    }

    async fn insert_project(&self, project: NewProject) -> AuditorResult<Project> {
        let created_at = format_datetime(Utc::now());
        let id = sqlx::query(
            "INSERT INTO projects (name, organization_id, team_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&project.name)
        .bind(project.organization_id)
        .bind(project.team_id)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err(e, "project"))?
        .last_insert_rowid();

        Ok(Project {
            id,
            name: project.name,
            organization_id: project.organization_id,
            team_id: project.team_id,
            created_at: parse_datetime(&created_at)?,
        })
    }

    async fn list_projects(&self) -> AuditorResult<Vec<Project>> {
        sqlx::query("SELECT * FROM projects ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(|row| -> AuditorResult<Project> {
                Ok(Project {
                    id: get(row, "id")?,
                    name: get(row, "name")?,
                    organization_id: get(row, "organization_id")?,
                    team_id: get(row, "team_id")?,
                    created_at: parse_datetime(&get::<String>(row, "created_at")?)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = SqliteStore::connect("sqlite::memory:", 1).await.unwrap();
        let first = store.migrate().await.unwrap();
        assert_eq!(first.len(), MIGRATIONS.len());

        let second = store.migrate().await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("auditor.db").display());

        {
            let store = SqliteStore::connect(&url, 2).await.unwrap();
            store.migrate().await.unwrap();
            store.insert_organization("Acme").await.unwrap();
        }

        let store = SqliteStore::connect(&url, 2).await.unwrap();
        assert!(store.migrate().await.unwrap().is_empty());
        let org = store.find_organization_by_name("Acme").await.unwrap();
        assert!(org.is_some());
    }

    #[tokio::test]
    async fn test_usage_events_are_append_only() {
        let store = SqliteStore::in_memory().await.unwrap();
        let key = store
            .insert_key(NewVirtualKey {
                key_hash: "h".to_string(),
                key_prefix: "vk_abc".to_string(),
                name: "k".to_string(),
                team_id: None,
                project_id: None,
                user_email: None,
                cost_centre: None,
                environment: None,
                agent_name: None,
                limits: KeyLimits::default(),
                created_by: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .append_event(NewUsageEvent::new(key.id, "openai", "gpt-4o"))
            .await
            .unwrap();

        let update = sqlx::query("UPDATE usage_events SET total_cost = 99")
            .execute(&store.pool)
            .await;
        assert!(update.is_err());
        let delete = sqlx::query("DELETE FROM virtual_keys").execute(&store.pool).await;
        assert!(delete.is_err());
    }

    #[test]
    fn test_datetime_format_is_fixed_width() {
        use chrono::TimeZone;
        let a = format_datetime(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(a, "2024-01-01T00:00:00.000000Z");
        assert_eq!(parse_datetime(&a).unwrap().timestamp(), 1_704_067_200);
    }
}
