//! In-memory store.
//!
//! Everything lives behind a single lock, so each write is atomic and
//! visible to the next read. Data is lost when the store is dropped. All
//! queries are linear scans.

use async_trait::async_trait;
use auditor_core::types::mask_key;
use auditor_core::{
    AuditorError, AuditorResult, DirectoryRepository, KeyLimits, KeyRepository, NewProject,
    NewTeam, NewUsageEvent, NewUser, NewVirtualKey, Organization, Project, Team, UsageEvent,
    UsageFilter, UsageRepository, UsageTotals, User, VirtualKey,
};
use chrono::Utc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    users: Vec<User>,
    organizations: Vec<Organization>,
    teams: Vec<Team>,
    projects: Vec<Project>,
    keys: Vec<VirtualKey>,
    events: Vec<UsageEvent>,
    last_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn key_mut(&mut self, id: i64) -> AuditorResult<&mut VirtualKey> {
        self.keys
            .iter_mut()
            .find(|k| k.id == id)
            .ok_or_else(|| AuditorError::not_found("Virtual key", id))
    }
}

/// Process-local implementation of every repository trait.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> (chrono::DateTime<Utc>, i64),
{
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl KeyRepository for MemoryStore {
    async fn insert_key(&self, key: NewVirtualKey) -> AuditorResult<VirtualKey> {
        let mut state = self.state.write().await;
        if state.keys.iter().any(|k| k.key_hash == key.key_hash) {
            return Err(AuditorError::Conflict("virtual key already exists".to_string()));
        }

        let id = state.next_id();
        let record = VirtualKey {
            id,
            key: mask_key(&key.key_prefix),
            name: key.name,
            team_id: key.team_id,
            project_id: key.project_id,
            user_email: key.user_email,
            cost_centre: key.cost_centre,
            environment: key.environment,
            agent_name: key.agent_name,
            monthly_budget_cap: key.limits.monthly_budget_cap,
            max_tokens_per_request: key.limits.max_tokens_per_request,
            max_reasoning_tokens: key.limits.max_reasoning_tokens,
            is_active: true,
            created_at: key.created_at,
            key_hash: key.key_hash,
            created_by: key.created_by,
        };
        state.keys.push(record.clone());
        Ok(record)
    }

    async fn get_key(&self, id: i64) -> AuditorResult<Option<VirtualKey>> {
        let state = self.state.read().await;
        Ok(state.keys.iter().find(|k| k.id == id).cloned())
    }

    async fn find_key_by_hash(&self, key_hash: &str) -> AuditorResult<Option<VirtualKey>> {
        let state = self.state.read().await;
        Ok(state.keys.iter().find(|k| k.key_hash == key_hash).cloned())
    }

    async fn find_keys_by_prefix(&self, key_prefix: &str) -> AuditorResult<Vec<VirtualKey>> {
        let masked = mask_key(key_prefix);
        let state = self.state.read().await;
        Ok(state.keys.iter().filter(|k| k.key == masked).cloned().collect())
    }

    async fn list_keys(&self, owner_email: Option<&str>) -> AuditorResult<Vec<VirtualKey>> {
        let state = self.state.read().await;
        let mut keys: Vec<VirtualKey> = state
            .keys
            .iter()
            .filter(|k| owner_email.map_or(true, |email| k.user_email.as_deref() == Some(email)))
            .cloned()
            .collect();
        newest_first(&mut keys, |k| (k.created_at, k.id));
        Ok(keys)
    }

    async fn update_key_limits(&self, id: i64, limits: &KeyLimits) -> AuditorResult<VirtualKey> {
        let mut state = self.state.write().await;
        let key = state.key_mut(id)?;
        key.monthly_budget_cap = limits.monthly_budget_cap;
        key.max_tokens_per_request = limits.max_tokens_per_request;
        key.max_reasoning_tokens = limits.max_reasoning_tokens;
        Ok(key.clone())
    }

    async fn set_key_active(&self, id: i64, active: bool) -> AuditorResult<VirtualKey> {
        let mut state = self.state.write().await;
        let key = state.key_mut(id)?;
        key.is_active = active;
        Ok(key.clone())
    }
}

#[async_trait]
impl UsageRepository for MemoryStore {
    async fn append_event(&self, event: NewUsageEvent) -> AuditorResult<UsageEvent> {
        let mut state = self.state.write().await;
        if !state.keys.iter().any(|k| k.id == event.virtual_key_id) {
            return Err(AuditorError::validation(
                format!("virtual key {} does not exist", event.virtual_key_id),
                Some("virtual_key_id"),
            ));
        }

        let id = state.next_id();
        let record = UsageEvent {
            id,
            virtual_key_id: event.virtual_key_id,
            user_id: event.user_id,
            provider: event.provider,
            model: event.model,
            input_tokens: event.input_tokens,
            output_tokens: event.output_tokens,
            total_tokens: event.total_tokens,
            input_cost: event.input_cost,
            output_cost: event.output_cost,
            total_cost: event.total_cost,
            prompt_hash: event.prompt_hash,
            status_code: event.status_code,
            was_blocked: event.was_blocked,
            block_reason: event.block_reason,
            created_at: event.created_at,
            prompt_chars: event.prompt_chars,
            prompt_preview: event.prompt_preview,
            request_id: event.request_id,
        };
        state.events.push(record.clone());
        Ok(record)
    }

    async fn query_events(
        &self,
        filter: &UsageFilter,
        limit: Option<usize>,
    ) -> AuditorResult<Vec<UsageEvent>> {
        let state = self.state.read().await;
        let mut events: Vec<UsageEvent> = state
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        newest_first(&mut events, |e| (e.created_at, e.id));
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    async fn sum_usage(&self, filter: &UsageFilter) -> AuditorResult<UsageTotals> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .fold(UsageTotals::default(), |mut totals, e| {
                totals.total_cost += e.total_cost;
                totals.request_count += 1;
                totals.total_tokens += e.total_tokens;
                totals
            }))
    }
}

#[async_trait]
impl DirectoryRepository for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> AuditorResult<User> {
        let mut state = self.state.write().await;
        if state.users.iter().any(|u| u.email == user.email) {
            return Err(AuditorError::Conflict(format!(
                "user {} already exists",
                user.email
            )));
        }

        let id = state.next_id();
        let record = User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            full_name: user.full_name,
            is_admin: user.is_admin,
            is_active: true,
            created_at: Utc::now(),
        };
        state.users.push(record.clone());
        Ok(record)
    }

    async fn find_user_by_email(&self, email: &str) -> AuditorResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.iter().find(|u| u.email == email).cloned())
    }

    async fn get_user(&self, id: i64) -> AuditorResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn insert_organization(&self, name: &str) -> AuditorResult<Organization> {
        let mut state = self.state.write().await;
        if state.organizations.iter().any(|o| o.name == name) {
            return Err(AuditorError::Conflict(format!(
                "organization {name} already exists"
            )));
        }

        let id = state.next_id();
        let record = Organization {
            id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state.organizations.push(record.clone());
        Ok(record)
    }

    async fn find_organization_by_name(&self, name: &str) -> AuditorResult<Option<Organization>> {
        let state = self.state.read().await;
        Ok(state.organizations.iter().find(|o| o.name == name).cloned())
    }

    async fn insert_team(&self, team: NewTeam) -> AuditorResult<Team> {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let record = Team {
            id,
            name: team.name,
            organization_id: team.organization_id,
            created_at: Utc::now(),
        };
        state.teams.push(record.clone());
        Ok(record)
    }

    async fn list_teams(&self) -> AuditorResult<Vec<Team>> {
        Ok(self.state.read().await.teams.clone())
    }

    async fn insert_project(&self, project: NewProject) -> AuditorResult<Project> {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let record = Project {
            id,
            name: project.name,
            organization_id: project.organization_id,
            team_id: project.team_id,
            created_at: Utc::now(),
        };
        state.projects.push(record.clone());
        Ok(record)
    }

    async fn list_projects(&self) -> AuditorResult<Vec<Project>> {
        Ok(self.state.read().await.projects.clone())
    }
}
