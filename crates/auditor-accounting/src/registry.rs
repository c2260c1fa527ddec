//! Virtual key registry.
//!
//! Keys are `vk_` followed by the unpadded base64url encoding of 32 bytes from
//! the OS random source. Only the SHA-256 digest and a short display prefix
//! are stored; the plaintext leaves the registry exactly once, in the
//! response to [`KeyRegistry::create`].

use std::sync::Arc;

use auditor_core::time::start_of_month;
use auditor_core::{
    AuditStore, AuditorError, AuditorResult, NewVirtualKey, Principal, UsageFilter, VirtualKey,
    VirtualKeyCreate, VirtualKeyUpdate,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::budget::BudgetDecision;

/// Prefix of every issued key
pub const KEY_PREFIX: &str = "vk_";

/// Random bytes per key (256 bits)
pub const KEY_ENTROPY_BYTES: usize = 32;

/// Characters of the plaintext kept for display
const DISPLAY_PREFIX_LEN: usize = 12;

/// Generate a fresh plaintext key
#[must_use]
pub fn generate_key() -> String {
    let mut bytes = [0u8; KEY_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// SHA-256 hex digest of a plaintext key
#[must_use]
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn display_prefix(key: &str) -> String {
    key.chars().take(DISPLAY_PREFIX_LEN).collect()
}

/// Issues, looks up, and authenticates virtual keys.
#[derive(Clone)]
pub struct KeyRegistry {
    store: Arc<dyn AuditStore>,
}

impl KeyRegistry {
    /// Create a registry over a store
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Issue a new key. Returns the record with the plaintext key.
    pub async fn create(
        &self,
        principal: &Principal,
        spec: VirtualKeyCreate,
    ) -> AuditorResult<VirtualKey> {
        principal.require_admin()?;
        let limits = spec.validate()?;

        let plaintext = generate_key();
        let record = NewVirtualKey {
            key_hash: hash_key(&plaintext),
            key_prefix: display_prefix(&plaintext),
            name: spec.name.trim().to_string(),
            team_id: spec.team_id,
            project_id: spec.project_id,
            user_email: spec.user_email,
            cost_centre: spec.cost_centre,
            environment: spec.environment,
            agent_name: spec.agent_name,
            limits,
            created_by: Some(principal.user_id),
            created_at: Utc::now(),
        };

        let key = self.store.insert_key(record).await?;
        info!(
            virtual_key_id = key.id,
            name = %key.name,
            created_by = principal.user_id,
            "Virtual key created"
        );
        Ok(key.with_plaintext(plaintext))
    }

    /// All keys visible to the caller, newest first
    pub async fn list(&self, principal: &Principal) -> AuditorResult<Vec<VirtualKey>> {
        self.store.list_keys(principal.owner_filter()).await
    }

    /// One key, if the caller may see it
    pub async fn get(&self, principal: &Principal, id: i64) -> AuditorResult<VirtualKey> {
        let key = self
            .store
            .get_key(id)
            .await?
            .ok_or_else(|| AuditorError::not_found("Virtual key", id))?;

        if !principal.can_view(&key) {
            return Err(AuditorError::forbidden(format!(
                "virtual key {id} belongs to another user"
            )));
        }
        Ok(key)
    }

    /// Resolve a plaintext key to its active record
    pub async fn authenticate(&self, plaintext: &str) -> AuditorResult<VirtualKey> {
        if !plaintext.starts_with(KEY_PREFIX) {
            return Err(AuditorError::auth("Invalid virtual key"));
        }

        // Candidates are found by the non-secret display prefix; the digest
        // itself is only ever compared in constant time.
        let digest = hash_key(plaintext);
        let key = self
            .store
            .find_keys_by_prefix(&display_prefix(plaintext))
            .await?
            .into_iter()
            .find(|candidate| bool::from(candidate.key_hash.as_bytes().ct_eq(digest.as_bytes())))
            .ok_or_else(|| AuditorError::auth("Invalid virtual key"))?;

        if !key.is_active {
            debug!(virtual_key_id = key.id, "Rejected inactive virtual key");
            return Err(AuditorError::auth("Virtual key is inactive"));
        }
        Ok(key)
    }

    /// Whether a charge of `projected_cost` fits in the key's monthly cap.
    ///
    /// Denies when a cap is set and month-to-date spend plus the projected
    /// cost exceeds it.
    pub async fn check_budget(
        &self,
        id: i64,
        projected_cost: f64,
        now: DateTime<Utc>,
    ) -> AuditorResult<BudgetDecision> {
        validate_projected_cost(projected_cost)?;

        let key = self
            .store
            .get_key(id)
            .await?
            .ok_or_else(|| AuditorError::not_found("Virtual key", id))?;

        let Some(cap) = key.monthly_budget_cap else {
            return Ok(BudgetDecision::Allow);
        };

        let spend = spend_mtd(self.store.as_ref(), id, now).await?;
        Ok(BudgetDecision::evaluate(spend, projected_cost, cap))
    }

    /// Change a key's budget and token limits
    pub async fn update_limits(
        &self,
        principal: &Principal,
        id: i64,
        patch: VirtualKeyUpdate,
    ) -> AuditorResult<VirtualKey> {
        principal.require_admin()?;
        let current = self
            .store
            .get_key(id)
            .await?
            .ok_or_else(|| AuditorError::not_found("Virtual key", id))?;

        let limits = patch.apply(current.limits())?;
        let key = self.store.update_key_limits(id, &limits).await?;
        info!(
            virtual_key_id = id,
            monthly_budget_cap = ?limits.monthly_budget_cap,
            max_tokens_per_request = ?limits.max_tokens_per_request,
            "Virtual key limits updated"
        );
        Ok(key)
    }

    /// Deactivate a key. Keys are never deleted.
    pub async fn revoke(&self, principal: &Principal, id: i64) -> AuditorResult<VirtualKey> {
        principal.require_admin()?;
        let key = self.store.set_key_active(id, false).await?;
        warn!(virtual_key_id = id, revoked_by = principal.user_id, "Virtual key revoked");
        Ok(key)
    }
}

pub(crate) fn validate_projected_cost(projected_cost: f64) -> AuditorResult<()> {
    if projected_cost.is_finite() && projected_cost >= 0.0 {
        Ok(())
    } else {
        Err(AuditorError::validation(
            format!("projected_cost must be a non-negative number, got {projected_cost}"),
            Some("projected_cost"),
        ))
    }
}

/// Month-to-date spend of one key
pub(crate) async fn spend_mtd(
    store: &dyn AuditStore,
    virtual_key_id: i64,
    now: DateTime<Utc>,
) -> AuditorResult<f64> {
    let filter = UsageFilter::for_key(virtual_key_id)
        .since(start_of_month(now))
        .until(now);
    Ok(store.sum_usage(&filter).await?.total_cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditor_core::{KeyLimits, NewUsageEvent};
    use auditor_storage::MemoryStore;

    fn admin() -> Principal {
        Principal::admin(1, "admin@example.com")
    }

    fn registry() -> (KeyRegistry, Arc<dyn AuditStore>) {
        let store: Arc<dyn AuditStore> = Arc::new(MemoryStore::new());
        (KeyRegistry::new(store.clone()), store)
    }

    #[test]
    fn test_generated_keys() {
        let a = generate_key();
        let b = generate_key();
        assert_ne!(a, b);
        assert!(a.starts_with(KEY_PREFIX));
        // 32 bytes -> 43 unpadded base64 characters
        assert_eq!(a.len(), KEY_PREFIX.len() + 43);
        assert!(!a.contains('='));
        assert!(a[KEY_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn test_create_returns_plaintext_once() {
        let (registry, _) = registry();
        let created = registry
            .create(&admin(), VirtualKeyCreate::new("ci-bot"))
            .await
            .unwrap();
        assert!(created.key.starts_with(KEY_PREFIX));
        assert!(!created.key.ends_with("..."));

        let fetched = registry.get(&admin(), created.id).await.unwrap();
        assert_eq!(fetched.key, format!("{}...", &created.key[..DISPLAY_PREFIX_LEN]));

        let listed = registry.list(&admin()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_ne!(listed[0].key, created.key);
    }

    #[tokio::test]
    async fn test_create_validates_and_requires_admin() {
        let (registry, _) = registry();
        let empty = registry.create(&admin(), VirtualKeyCreate::new("")).await;
        assert!(matches!(empty, Err(AuditorError::Validation { .. })));

        let negative = registry
            .create(&admin(), VirtualKeyCreate::new("k").with_budget_cap(-5.0))
            .await;
        assert!(matches!(negative, Err(AuditorError::Validation { .. })));

        let member = Principal::member(2, "dev@example.com");
        let forbidden = registry.create(&member, VirtualKeyCreate::new("k")).await;
        assert!(matches!(forbidden, Err(AuditorError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (registry, _) = registry();
        let created = registry
            .create(&admin(), VirtualKeyCreate::new("svc"))
            .await
            .unwrap();

        let key = registry.authenticate(&created.key).await.unwrap();
        assert_eq!(key.id, created.id);

        let mut tampered = created.key.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        assert!(matches!(
            registry.authenticate(&tampered).await,
            Err(AuditorError::Auth(_))
        ));
        assert!(matches!(
            registry.authenticate("sk-not-a-virtual-key").await,
            Err(AuditorError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_among_shared_prefix() {
        let (registry, store) = registry();
        let created = registry
            .create(&admin(), VirtualKeyCreate::new("svc"))
            .await
            .unwrap();
        let prefix = display_prefix(&created.key);

        let decoy = store
            .insert_key(NewVirtualKey {
                key_hash: hash_key("vk_decoy"),
                key_prefix: prefix.clone(),
                name: "decoy".to_string(),
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
        assert_eq!(store.find_keys_by_prefix(&prefix).await.unwrap().len(), 2);

        let key = registry.authenticate(&created.key).await.unwrap();
        assert_eq!(key.id, created.id);
        assert_ne!(key.id, decoy.id);
    }

    #[tokio::test]
    async fn test_revoked_key_fails_authentication() {
        let (registry, _) = registry();
        let created = registry
            .create(&admin(), VirtualKeyCreate::new("svc"))
            .await
            .unwrap();
        registry.revoke(&admin(), created.id).await.unwrap();

        assert!(matches!(
            registry.authenticate(&created.key).await,
            Err(AuditorError::Auth(_))
        ));
        let listed = registry.list(&admin()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_active);
    }

    #[tokio::test]
    async fn test_get_scoping() {
        let (registry, _) = registry();
        let alice_key = registry
            .create(
                &admin(),
                VirtualKeyCreate::new("alice").with_user_email("alice@example.com"),
            )
            .await
            .unwrap();

        let alice = Principal::member(2, "alice@example.com");
        let bob = Principal::member(3, "bob@example.com");

        assert!(registry.get(&alice, alice_key.id).await.is_ok());
        assert!(matches!(
            registry.get(&bob, alice_key.id).await,
            Err(AuditorError::Forbidden(_))
        ));
        assert!(matches!(
            registry.get(&alice, 9999).await,
            Err(AuditorError::NotFound { .. })
        ));
        assert!(registry.list(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_budget() {
        let (registry, store) = registry();
        let now = Utc::now();
        let key = registry
            .create(&admin(), VirtualKeyCreate::new("capped").with_budget_cap(1.0))
            .await
            .unwrap();
        store
            .append_event(
                NewUsageEvent::new(key.id, "openai", "gpt-4o")
                    .with_costs(0.4, 0.5)
                    .at(now),
            )
            .await
            .unwrap();

        assert_eq!(
            registry.check_budget(key.id, 0.1, now).await.unwrap(),
            BudgetDecision::Allow
        );
        match registry.check_budget(key.id, 0.2, now).await.unwrap() {
            BudgetDecision::Deny {
                current_spend,
                cap,
                ..
            } => {
                assert!((current_spend - 0.9).abs() < 1e-9);
                assert!((cap - 1.0).abs() < f64::EPSILON);
            }
            BudgetDecision::Allow => panic!("Expected denial"),
        }

        assert!(registry.check_budget(key.id, -1.0, now).await.is_err());
        assert!(registry.check_budget(key.id, f64::NAN, now).await.is_err());
    }

    #[tokio::test]
    async fn test_update_limits() {
        let (registry, _) = registry();
        let key = registry
            .create(&admin(), VirtualKeyCreate::new("k").with_budget_cap(10.0))
            .await
            .unwrap();

        let patch = VirtualKeyUpdate {
            monthly_budget_cap: Some(None),
            max_tokens_per_request: Some(Some(2048)),
            max_reasoning_tokens: None,
        };
        let updated = registry.update_limits(&admin(), key.id, patch).await.unwrap();
        assert_eq!(updated.monthly_budget_cap, None);
        assert_eq!(updated.max_tokens_per_request, Some(2048));

        let member = Principal::member(2, "dev@example.com");
        let denied = registry
            .update_limits(&member, key.id, VirtualKeyUpdate::default())
            .await;
        assert!(matches!(denied, Err(AuditorError::Forbidden(_))));
    }
}
