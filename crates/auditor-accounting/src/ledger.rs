//! Append-only usage ledger.

use std::sync::Arc;

use auditor_config::AccountingConfig;
use auditor_core::{
    AuditStore, AuditorError, AuditorResult, NewUsageEvent, Principal, UsageEvent, UsageFilter,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

/// Parameters of a ledger read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageQuery {
    /// Restrict to one key
    #[serde(default)]
    pub virtual_key_id: Option<i64>,
    /// Maximum number of events; the configured default when absent
    #[serde(default)]
    pub limit: Option<i64>,
    /// Inclusive lower bound on `created_at`
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl UsageQuery {
    /// Events of one key
    #[must_use]
    pub fn for_key(virtual_key_id: i64) -> Self {
        Self {
            virtual_key_id: Some(virtual_key_id),
            ..Self::default()
        }
    }

    /// Set the limit
    #[must_use]
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Records proxied calls and serves scoped reads of them.
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn AuditStore>,
    default_limit: usize,
    max_limit: usize,
}

impl UsageLedger {
    /// Create a ledger with explicit limits
    pub fn new(store: Arc<dyn AuditStore>, default_limit: usize, max_limit: usize) -> Self {
        Self {
            store,
            default_limit: default_limit.min(max_limit),
            max_limit,
        }
    }

    /// Create a ledger from the accounting configuration
    pub fn from_config(store: Arc<dyn AuditStore>, config: &AccountingConfig) -> Self {
        Self::new(
            store,
            config.default_usage_query_limit,
            config.max_usage_query_limit,
        )
    }

    /// Validate and append one event
    pub async fn record(&self, event: NewUsageEvent) -> AuditorResult<UsageEvent> {
        event.validate()?;
        let recorded = self.store.append_event(event).await?;

        if recorded.was_blocked {
            info!(
                event_id = recorded.id,
                virtual_key_id = recorded.virtual_key_id,
                provider = %recorded.provider,
                model = %recorded.model,
                reason = recorded.block_reason.as_deref().unwrap_or_default(),
                "Blocked request recorded"
            );
        } else {
            debug!(
                event_id = recorded.id,
                virtual_key_id = recorded.virtual_key_id,
                provider = %recorded.provider,
                model = %recorded.model,
                total_tokens = recorded.total_tokens,
                total_cost = recorded.total_cost,
                "Usage recorded"
            );
        }
        Ok(recorded)
    }

    /// Newest-first events visible to the caller
    pub async fn query(
        &self,
        principal: &Principal,
        query: &UsageQuery,
    ) -> AuditorResult<Vec<UsageEvent>> {
        let limit = self.effective_limit(query.limit)?;

        if let (Some(since), Some(until)) = (query.since, query.until) {
            if since > until {
                return Err(AuditorError::validation(
                    "since must not be after until",
                    Some("since"),
                ));
            }
        }

        let mut filter = self.scope(principal, query.virtual_key_id).await?;
        if let Some(since) = query.since {
            filter = filter.since(since);
        }
        if let Some(until) = query.until {
            filter = filter.until(until);
        }

        self.store.query_events(&filter, Some(limit)).await
    }

    fn effective_limit(&self, requested: Option<i64>) -> AuditorResult<usize> {
        match requested {
            None => Ok(self.default_limit),
            Some(limit) if limit <= 0 => Err(AuditorError::validation(
                format!("limit must be positive, got {limit}"),
                Some("limit"),
            )),
            Some(limit) => Ok(usize::try_from(limit)
                .map_or(self.max_limit, |limit| limit.min(self.max_limit))),
        }
    }

    async fn scope(
        &self,
        principal: &Principal,
        virtual_key_id: Option<i64>,
    ) -> AuditorResult<UsageFilter> {
        if principal.is_admin {
            return Ok(virtual_key_id.map_or_else(UsageFilter::all, UsageFilter::for_key));
        }

        let owned: Vec<i64> = self
            .store
            .list_keys(Some(&principal.email))
            .await?
            .into_iter()
            .map(|key| key.id)
            .collect();

        match virtual_key_id {
            Some(id) if owned.contains(&id) => Ok(UsageFilter::for_key(id)),
            Some(id) => Err(AuditorError::forbidden(format!(
                "usage of virtual key {id} is not visible to this user"
            ))),
            None => Ok(UsageFilter::all().with_keys(owned)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::KeyRegistry;
    use auditor_core::{VirtualKey, VirtualKeyCreate};
    use auditor_storage::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn admin() -> Principal {
        Principal::admin(1, "admin@example.com")
    }

    async fn setup() -> (UsageLedger, VirtualKey, VirtualKey) {
        let store: Arc<dyn AuditStore> = Arc::new(MemoryStore::new());
        let registry = KeyRegistry::new(store.clone());
        let alice = registry
            .create(
                &admin(),
                VirtualKeyCreate::new("alice").with_user_email("alice@example.com"),
            )
            .await
            .unwrap();
        let bob = registry
            .create(
                &admin(),
                VirtualKeyCreate::new("bob").with_user_email("bob@example.com"),
            )
            .await
            .unwrap();
        (UsageLedger::new(store, 100, 1000), alice, bob)
    }

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[tokio::test]
    async fn test_record_is_immediately_visible() {
        let (ledger, alice, _) = setup().await;
        let recorded = ledger
            .record(
                NewUsageEvent::new(alice.id, "openai", "gpt-4o")
                    .with_tokens(10, 5)
                    .with_costs(0.001, 0.002),
            )
            .await
            .unwrap();
        assert_eq!(recorded.total_tokens, 15);

        let events = ledger.query(&admin(), &UsageQuery::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, recorded.id);
    }

    #[tokio::test]
    async fn test_record_rejects_invalid_events() {
        let (ledger, alice, _) = setup().await;

        let unknown_key = ledger.record(NewUsageEvent::new(9999, "openai", "gpt-4o")).await;
        assert!(matches!(unknown_key, Err(AuditorError::Validation { .. })));

        let mut inconsistent = NewUsageEvent::new(alice.id, "openai", "gpt-4o").with_tokens(1, 1);
        inconsistent.total_tokens = 5;
        assert!(ledger.record(inconsistent).await.is_err());

        let mut negative = NewUsageEvent::new(alice.id, "openai", "gpt-4o");
        negative.input_cost = -1.0;
        assert!(ledger.record(negative).await.is_err());
    }

    #[tokio::test]
    async fn test_query_limit_rules() {
        let (ledger, alice, _) = setup().await;
        for i in 0..5 {
            ledger
                .record(NewUsageEvent::new(alice.id, "openai", "gpt-4o").at(t(i)))
                .await
                .unwrap();
        }

        let two = ledger
            .query(&admin(), &UsageQuery::default().with_limit(2))
            .await
            .unwrap();
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].created_at, t(4));

        for bad in [0, -3] {
            let err = ledger
                .query(&admin(), &UsageQuery::default().with_limit(bad))
                .await
                .unwrap_err();
            assert!(matches!(err, AuditorError::Validation { .. }));
        }

        let clamped = ledger
            .query(&admin(), &UsageQuery::default().with_limit(1_000_000))
            .await
            .unwrap();
        assert_eq!(clamped.len(), 5);
    }

    #[tokio::test]
    async fn test_query_time_bounds() {
        let (ledger, alice, _) = setup().await;
        for i in 0..5 {
            ledger
                .record(NewUsageEvent::new(alice.id, "openai", "gpt-4o").at(t(i)))
                .await
                .unwrap();
        }

        let query = UsageQuery {
            since: Some(t(1)),
            until: Some(t(3)),
            ..UsageQuery::default()
        };
        assert_eq!(ledger.query(&admin(), &query).await.unwrap().len(), 3);

        let inverted = UsageQuery {
            since: Some(t(3)),
            until: Some(t(1)),
            ..UsageQuery::default()
        };
        assert!(matches!(
            ledger.query(&admin(), &inverted).await,
            Err(AuditorError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_member_scope() {
        let (ledger, alice, bob) = setup().await;
        ledger
            .record(NewUsageEvent::new(alice.id, "openai", "gpt-4o").at(t(0)))
            .await
            .unwrap();
        ledger
            .record(NewUsageEvent::new(bob.id, "openai", "gpt-4o").at(t(1)))
            .await
            .unwrap();

        let member = Principal::member(5, "alice@example.com");
        let own = ledger.query(&member, &UsageQuery::default()).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].virtual_key_id, alice.id);

        let foreign = ledger.query(&member, &UsageQuery::for_key(bob.id)).await;
        assert!(matches!(foreign, Err(AuditorError::Forbidden(_))));

        let stranger = Principal::member(6, "carol@example.com");
        assert!(ledger
            .query(&stranger, &UsageQuery::default())
            .await
            .unwrap()
            .is_empty());

        let all = ledger.query(&admin(), &UsageQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(ledger
            .query(&admin(), &UsageQuery::for_key(9999))
            .await
            .unwrap()
            .is_empty());
    }
}
