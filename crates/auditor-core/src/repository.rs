//! Persistence seams.
//!
//! The accounting layer talks to storage only through these traits, so the
//! in-memory and SQLite backends are interchangeable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AuditorResult;
use crate::types::{
    KeyLimits, NewProject, NewTeam, NewUsageEvent, NewUser, NewVirtualKey, Organization, Project,
    Team, UsageEvent, User, VirtualKey,
};

/// Selects ledger rows.
///
/// Bounds are inclusive on both ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageFilter {
    /// Restrict to these keys; `None` means every key
    pub virtual_key_ids: Option<Vec<i64>>,
    /// Lower bound on `created_at`
    pub since: Option<DateTime<Utc>>,
    /// Upper bound on `created_at`
    pub until: Option<DateTime<Utc>>,
}

impl UsageFilter {
    /// Filter matching every event
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a single key
    #[must_use]
    pub fn for_key(virtual_key_id: i64) -> Self {
        Self {
            virtual_key_ids: Some(vec![virtual_key_id]),
            ..Self::default()
        }
    }

    /// Restrict to a set of keys
    #[must_use]
    pub fn with_keys(mut self, ids: Vec<i64>) -> Self {
        self.virtual_key_ids = Some(ids);
        self
    }

    /// Set the lower bound
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Set the upper bound
    #[must_use]
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Whether an event falls inside the filter
    #[must_use]
    pub fn matches(&self, event: &UsageEvent) -> bool {
        self.virtual_key_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&event.virtual_key_id))
            && self.since.map_or(true, |since| event.created_at >= since)
            && self.until.map_or(true, |until| event.created_at <= until)
    }
}

/// Sums over a filtered slice of the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTotals {
    /// Sum of `total_cost`
    pub total_cost: f64,
    /// Number of events
    pub request_count: u64,
    /// Sum of `total_tokens`
    pub total_tokens: u64,
}

/// Virtual key storage.
#[async_trait]
pub trait KeyRepository: Send + Sync {
    /// Insert a key; fails with `Conflict` on a duplicate digest
    async fn insert_key(&self, key: NewVirtualKey) -> AuditorResult<VirtualKey>;

    /// Look up a key by id
    async fn get_key(&self, id: i64) -> AuditorResult<Option<VirtualKey>>;

    /// Look up a key by the SHA-256 digest of its plaintext
    async fn find_key_by_hash(&self, key_hash: &str) -> AuditorResult<Option<VirtualKey>>;

    /// Keys sharing a display prefix, oldest first
    async fn find_keys_by_prefix(&self, key_prefix: &str) -> AuditorResult<Vec<VirtualKey>>;

    /// List keys newest first, optionally restricted to one owner email
    async fn list_keys(&self, owner_email: Option<&str>) -> AuditorResult<Vec<VirtualKey>>;

    /// Replace a key's limits
    async fn update_key_limits(&self, id: i64, limits: &KeyLimits) -> AuditorResult<VirtualKey>;

    /// Activate or deactivate a key
    async fn set_key_active(&self, id: i64, active: bool) -> AuditorResult<VirtualKey>;
}

/// Append-only usage ledger storage.
#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Append one event atomically
    async fn append_event(&self, event: NewUsageEvent) -> AuditorResult<UsageEvent>;

    /// Events matching the filter, newest first (`created_at` desc, then id desc)
    async fn query_events(
        &self,
        filter: &UsageFilter,
        limit: Option<usize>,
    ) -> AuditorResult<Vec<UsageEvent>>;

    /// Cost, count, and token sums for events matching the filter
    async fn sum_usage(&self, filter: &UsageFilter) -> AuditorResult<UsageTotals>;
}

/// Users, organizations, teams, and projects.
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    /// Insert a user; fails with `Conflict` on a duplicate email
    async fn insert_user(&self, user: NewUser) -> AuditorResult<User>;

    /// Look up a user by email
    async fn find_user_by_email(&self, email: &str) -> AuditorResult<Option<User>>;

    /// Look up a user by id
    async fn get_user(&self, id: i64) -> AuditorResult<Option<User>>;

    /// Insert an organization; fails with `Conflict` on a duplicate name
    async fn insert_organization(&self, name: &str) -> AuditorResult<Organization>;

    /// Look up an organization by name
    async fn find_organization_by_name(&self, name: &str) -> AuditorResult<Option<Organization>>;

    /// Insert a team
    async fn insert_team(&self, team: NewTeam) -> AuditorResult<Team>;

    /// All teams, by id
    async fn list_teams(&self) -> AuditorResult<Vec<Team>>;

    /// Insert a project
    async fn insert_project(&self, project: NewProject) -> AuditorResult<Project>;

    /// All projects, by id
    async fn list_projects(&self) -> AuditorResult<Vec<Project>>;
}

/// Everything the auditor persists.
pub trait AuditStore: KeyRepository + UsageRepository + DirectoryRepository {}

impl<T> AuditStore for T where T: KeyRepository + UsageRepository + DirectoryRepository {}
