//! Domain records: virtual keys, usage events, and the identity directory.
//!
//! Field names and nullability of the serialized forms match the admin
//! dashboard's wire contract. Fields marked `#[serde(skip)]` are persisted
//! but never leave the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AuditorError, AuditorResult};

/// Tolerance used when checking `total_cost == input_cost + output_cost`.
pub const COST_EPSILON: f64 = 1e-9;

/// Maximum length of free-text identifiers (name, email, cost centre, ...)
const MAX_TEXT_LEN: usize = 255;

// =============================================================================
// Virtual keys
// =============================================================================

/// A proxy-scoped credential with attribution and budget attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualKey {
    /// Registry identifier
    pub id: i64,
    /// Plaintext key in the create response, masked prefix everywhere else
    pub key: String,
    /// Display name
    pub name: String,
    /// Owning team
    pub team_id: Option<i64>,
    /// Owning project
    pub project_id: Option<i64>,
    /// Email of the user the key is issued to
    pub user_email: Option<String>,
    /// Cost centre for chargeback
    pub cost_centre: Option<String>,
    /// Deployment environment (dev, staging, prod)
    pub environment: Option<String>,
    /// Agent the key is bound to
    pub agent_name: Option<String>,
    /// Monthly spend cap in USD
    pub monthly_budget_cap: Option<f64>,
    /// Upper bound on estimated prompt tokens per request
    pub max_tokens_per_request: Option<u32>,
    /// Advisory upper bound on output/reasoning tokens
    pub max_reasoning_tokens: Option<u32>,
    /// False once revoked
    pub is_active: bool,
    /// Issue time
    pub created_at: DateTime<Utc>,
    /// SHA-256 hex digest of the plaintext key
    #[serde(skip)]
    pub key_hash: String,
    /// Administrator who issued the key
    #[serde(skip)]
    pub created_by: Option<i64>,
}

impl VirtualKey {
    /// Current budget and token limits
    #[must_use]
    pub fn limits(&self) -> KeyLimits {
        KeyLimits {
            monthly_budget_cap: self.monthly_budget_cap,
            max_tokens_per_request: self.max_tokens_per_request,
            max_reasoning_tokens: self.max_reasoning_tokens,
        }
    }

    /// Replace the masked key with the plaintext (create response only)
    #[must_use]
    pub fn with_plaintext(mut self, plaintext: impl Into<String>) -> Self {
        self.key = plaintext.into();
        self
    }
}

/// Masked form of a key, built from its stored display prefix
#[must_use]
pub fn mask_key(prefix: &str) -> String {
    format!("{prefix}...")
}

/// Budget and token limits attached to a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyLimits {
    /// Monthly spend cap in USD
    pub monthly_budget_cap: Option<f64>,
    /// Upper bound on estimated prompt tokens per request
    pub max_tokens_per_request: Option<u32>,
    /// Advisory upper bound on output tokens
    pub max_reasoning_tokens: Option<u32>,
}

/// Payload for `POST /api/admin/virtual-keys`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualKeyCreate {
    /// Display name (required, non-empty)
    pub name: String,
    /// Owning team
    #[serde(default)]
    pub team_id: Option<i64>,
    /// Owning project
    #[serde(default)]
    pub project_id: Option<i64>,
    /// Email of the user the key is issued to
    #[serde(default)]
    pub user_email: Option<String>,
    /// Cost centre
    #[serde(default)]
    pub cost_centre: Option<String>,
    /// Environment
    #[serde(default)]
    pub environment: Option<String>,
    /// Agent name
    #[serde(default)]
    pub agent_name: Option<String>,
    /// Monthly spend cap in USD (>= 0)
    #[serde(default)]
    pub monthly_budget_cap: Option<f64>,
    /// Per-request token limit (> 0)
    #[serde(default)]
    pub max_tokens_per_request: Option<i64>,
    /// Reasoning token limit (> 0)
    #[serde(default)]
    pub max_reasoning_tokens: Option<i64>,
}

impl VirtualKeyCreate {
    /// Create a payload with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the owning user
    #[must_use]
    pub fn with_user_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }

    /// Set the owning project
    #[must_use]
    pub fn with_project(mut self, project_id: i64) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Set the monthly budget cap
    #[must_use]
    pub fn with_budget_cap(mut self, cap: f64) -> Self {
        self.monthly_budget_cap = Some(cap);
        self
    }

    /// Set the per-request token limit
    #[must_use]
    pub fn with_max_tokens(mut self, max: i64) -> Self {
        self.max_tokens_per_request = Some(max);
        self
    }

    /// Validate the payload and resolve its limits
    ///
    /// # Errors
    /// Returns a validation error for an empty name or out-of-range limits
    pub fn validate(&self) -> AuditorResult<KeyLimits> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AuditorError::validation(
                "name must not be empty",
                Some("name"),
            ));
        }
        if name.len() > MAX_TEXT_LEN {
            return Err(AuditorError::validation(
                format!("name must be at most {MAX_TEXT_LEN} characters"),
                Some("name"),
            ));
        }

        for (field, value) in [
            ("user_email", &self.user_email),
            ("cost_centre", &self.cost_centre),
            ("environment", &self.environment),
            ("agent_name", &self.agent_name),
        ] {
            if value.as_deref().is_some_and(|v| v.len() > MAX_TEXT_LEN) {
                return Err(AuditorError::validation(
                    format!("{field} must be at most {MAX_TEXT_LEN} characters"),
                    Some(field),
                ));
            }
        }

        Ok(KeyLimits {
            monthly_budget_cap: validate_budget_cap(self.monthly_budget_cap)?,
            max_tokens_per_request: validate_token_limit(
                self.max_tokens_per_request,
                "max_tokens_per_request",
            )?,
            max_reasoning_tokens: validate_token_limit(
                self.max_reasoning_tokens,
                "max_reasoning_tokens",
            )?,
        })
    }
}

/// Payload for `PATCH /api/admin/virtual-keys/{id}`.
///
/// An absent field leaves the limit unchanged; an explicit `null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualKeyUpdate {
    /// New monthly budget cap
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub monthly_budget_cap: Option<Option<f64>>,
    /// New per-request token limit
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_request: Option<Option<i64>>,
    /// New reasoning token limit
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub max_reasoning_tokens: Option<Option<i64>>,
}

impl VirtualKeyUpdate {
    /// Apply the patch on top of the current limits
    ///
    /// # Errors
    /// Returns a validation error for out-of-range limits
    pub fn apply(&self, current: KeyLimits) -> AuditorResult<KeyLimits> {
        let mut limits = current;
        if let Some(cap) = self.monthly_budget_cap {
            limits.monthly_budget_cap = validate_budget_cap(cap)?;
        }
        if let Some(max) = self.max_tokens_per_request {
            limits.max_tokens_per_request = validate_token_limit(max, "max_tokens_per_request")?;
        }
        if let Some(max) = self.max_reasoning_tokens {
            limits.max_reasoning_tokens = validate_token_limit(max, "max_reasoning_tokens")?;
        }
        Ok(limits)
    }
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn validate_budget_cap(cap: Option<f64>) -> AuditorResult<Option<f64>> {
    match cap {
        Some(cap) if !cap.is_finite() || cap < 0.0 => Err(AuditorError::validation(
            format!("monthly_budget_cap must be a non-negative number, got {cap}"),
            Some("monthly_budget_cap"),
        )),
        other => Ok(other),
    }
}

fn validate_token_limit(limit: Option<i64>, field: &str) -> AuditorResult<Option<u32>> {
    limit
        .map(|value| {
            u32::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| {
                    AuditorError::validation(
                        format!("{field} must be a positive integer, got {value}"),
                        Some(field),
                    )
                })
        })
        .transpose()
}

/// Insert record for a new key; the repository assigns the id.
#[derive(Debug, Clone)]
pub struct NewVirtualKey {
    /// SHA-256 hex digest of the plaintext key
    pub key_hash: String,
    /// Display prefix of the plaintext key
    pub key_prefix: String,
    /// Display name (trimmed)
    pub name: String,
    /// Owning team
    pub team_id: Option<i64>,
    /// Owning project
    pub project_id: Option<i64>,
    /// Owning user email
    pub user_email: Option<String>,
    /// Cost centre
    pub cost_centre: Option<String>,
    /// Environment
    pub environment: Option<String>,
    /// Agent name
    pub agent_name: Option<String>,
    /// Validated limits
    pub limits: KeyLimits,
    /// Issuing administrator
    pub created_by: Option<i64>,
    /// Issue time
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Usage events
// =============================================================================

/// One completed or blocked LLM call. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Ledger identifier
    pub id: i64,
    /// Key the call was made with
    pub virtual_key_id: i64,
    /// User the call is attributed to
    pub user_id: Option<i64>,
    /// Upstream provider (openai, anthropic)
    pub provider: String,
    /// Model name as requested
    pub model: String,
    /// Prompt tokens
    pub input_tokens: u64,
    /// Completion tokens
    pub output_tokens: u64,
    /// `input_tokens + output_tokens`
    pub total_tokens: u64,
    /// Prompt cost in USD
    pub input_cost: f64,
    /// Completion cost in USD
    pub output_cost: f64,
    /// `input_cost + output_cost`
    pub total_cost: f64,
    /// Prompt fingerprint
    pub prompt_hash: Option<String>,
    /// Upstream (or gateway) HTTP status
    pub status_code: Option<u16>,
    /// Rejected before reaching the upstream
    pub was_blocked: bool,
    /// Why the call was rejected
    pub block_reason: Option<String>,
    /// Completion time
    pub created_at: DateTime<Utc>,
    /// Prompt length in characters
    #[serde(skip)]
    pub prompt_chars: Option<u32>,
    /// First characters of the prompt
    #[serde(skip)]
    pub prompt_preview: Option<String>,
    /// Gateway request id
    #[serde(skip)]
    pub request_id: Option<String>,
}

/// Insert record for the usage ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUsageEvent {
    /// Key the call was made with
    pub virtual_key_id: i64,
    /// User the call is attributed to
    pub user_id: Option<i64>,
    /// Upstream provider
    pub provider: String,
    /// Model name
    pub model: String,
    /// Prompt tokens
    pub input_tokens: u64,
    /// Completion tokens
    pub output_tokens: u64,
    /// Must equal `input_tokens + output_tokens`
    pub total_tokens: u64,
    /// Prompt cost
    pub input_cost: f64,
    /// Completion cost
    pub output_cost: f64,
    /// Must equal `input_cost + output_cost`
    pub total_cost: f64,
    /// Prompt fingerprint
    pub prompt_hash: Option<String>,
    /// Prompt length in characters
    pub prompt_chars: Option<u32>,
    /// First characters of the prompt
    pub prompt_preview: Option<String>,
    /// Gateway request id
    pub request_id: Option<String>,
    /// HTTP status
    pub status_code: Option<u16>,
    /// Rejected before reaching the upstream
    pub was_blocked: bool,
    /// Why the call was rejected
    pub block_reason: Option<String>,
    /// Completion time
    pub created_at: DateTime<Utc>,
}

impl NewUsageEvent {
    /// Create an empty event for a key, timestamped now
    pub fn new(virtual_key_id: i64, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            virtual_key_id,
            user_id: None,
            provider: provider.into(),
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            input_cost: 0.0,
            output_cost: 0.0,
            total_cost: 0.0,
            prompt_hash: None,
            prompt_chars: None,
            prompt_preview: None,
            request_id: None,
            status_code: None,
            was_blocked: false,
            block_reason: None,
            created_at: Utc::now(),
        }
    }

    /// Set token counts; the total is derived
    #[must_use]
    pub fn with_tokens(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.total_tokens = input_tokens + output_tokens;
        self
    }

    /// Set costs; the total is derived
    #[must_use]
    pub fn with_costs(mut self, input_cost: f64, output_cost: f64) -> Self {
        self.input_cost = input_cost;
        self.output_cost = output_cost;
        self.total_cost = input_cost + output_cost;
        self
    }

    /// Attach the prompt fingerprint
    #[must_use]
    pub fn with_prompt_hash(mut self, hash: impl Into<String>) -> Self {
        self.prompt_hash = Some(hash.into());
        self
    }

    /// Attach the prompt preview and length
    #[must_use]
    pub fn with_prompt_preview(mut self, preview: impl Into<String>, chars: u32) -> Self {
        self.prompt_preview = Some(preview.into());
        self.prompt_chars = Some(chars);
        self
    }

    /// Set the HTTP status
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Set the gateway request id
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attribute the call to a user
    #[must_use]
    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Override the timestamp
    #[must_use]
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Mark the call as blocked. Blocked calls carry zero tokens and zero cost.
    #[must_use]
    pub fn blocked(mut self, reason: impl Into<String>) -> Self {
        self.was_blocked = true;
        self.block_reason = Some(reason.into());
        self.with_tokens(0, 0).with_costs(0.0, 0.0)
    }

    /// Check the ledger invariants
    ///
    /// # Errors
    /// Returns a validation error when totals don't add up, a cost is
    /// negative, or a blocked event has no reason
    pub fn validate(&self) -> AuditorResult<()> {
        if self.provider.trim().is_empty() {
            return Err(AuditorError::validation("provider must not be empty", Some("provider")));
        }
        if self.model.trim().is_empty() {
            return Err(AuditorError::validation("model must not be empty", Some("model")));
        }

        if self.input_tokens.checked_add(self.output_tokens) != Some(self.total_tokens) {
            return Err(AuditorError::validation(
                format!(
                    "total_tokens ({}) must equal input_tokens ({}) + output_tokens ({})",
                    self.total_tokens, self.input_tokens, self.output_tokens
                ),
                Some("total_tokens"),
            ));
        }

        for (field, value) in [
            ("input_cost", self.input_cost),
            ("output_cost", self.output_cost),
            ("total_cost", self.total_cost),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AuditorError::validation(
                    format!("{field} must be a non-negative number, got {value}"),
                    Some(field),
                ));
            }
        }

        if (self.total_cost - (self.input_cost + self.output_cost)).abs() > COST_EPSILON {
            return Err(AuditorError::validation(
                format!(
                    "total_cost ({}) must equal input_cost ({}) + output_cost ({})",
                    self.total_cost, self.input_cost, self.output_cost
                ),
                Some("total_cost"),
            ));
        }

        if self.was_blocked && self.block_reason.as_deref().map_or(true, |r| r.trim().is_empty()) {
            return Err(AuditorError::validation(
                "blocked events must carry a block_reason",
                Some("block_reason"),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Identity directory
// =============================================================================

/// Dashboard user, including the stored password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// User id
    pub id: i64,
    /// Login email (unique)
    pub email: String,
    /// Argon2 PHC string
    pub password_hash: String,
    /// Display name
    pub full_name: Option<String>,
    /// Can manage keys and see every tenant's usage
    pub is_admin: bool,
    /// Disabled users cannot log in
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Public view of a user (`GET /api/auth/me`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User id
    pub id: i64,
    /// Login email
    pub email: String,
    /// Display name
    pub full_name: Option<String>,
    /// Administrator flag
    pub is_admin: bool,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            is_admin: user.is_admin,
        }
    }
}

/// Insert record for a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Login email
    pub email: String,
    /// Argon2 PHC string
    pub password_hash: String,
    /// Display name
    pub full_name: Option<String>,
    /// Administrator flag
    pub is_admin: bool,
}

/// Top-level tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Organization id
    pub id: i64,
    /// Unique name
    pub name: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Team within an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Team id
    pub id: i64,
    /// Name
    pub name: String,
    /// Parent organization
    pub organization_id: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Insert record for a team.
#[derive(Debug, Clone)]
pub struct NewTeam {
    /// Name
    pub name: String,
    /// Parent organization
    pub organization_id: i64,
}

/// Project that keys (and therefore spend) are attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project id
    pub id: i64,
    /// Name
    pub name: String,
    /// Parent organization
    pub organization_id: i64,
    /// Owning team
    pub team_id: Option<i64>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Insert record for a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    /// Name
    pub name: String,
    /// Parent organization
    pub organization_id: i64,
    /// Owning team
    pub team_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_empty_name() {
        let err = VirtualKeyCreate::new("").validate().unwrap_err();
        assert!(matches!(err, AuditorError::Validation { .. }));

        let err = VirtualKeyCreate::new("   ").validate().unwrap_err();
        assert!(matches!(err, AuditorError::Validation { .. }));
    }

    #[test]
    fn test_create_rejects_negative_budget() {
        let err = VirtualKeyCreate::new("ci-bot")
            .with_budget_cap(-5.0)
            .validate()
            .unwrap_err();
        match err {
            AuditorError::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("monthly_budget_cap"));
            }
            other => panic!("Expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_create_rejects_non_positive_token_limits() {
        assert!(VirtualKeyCreate::new("k").with_max_tokens(0).validate().is_err());
        assert!(VirtualKeyCreate::new("k").with_max_tokens(-1).validate().is_err());

        let limits = VirtualKeyCreate::new("k")
            .with_max_tokens(4096)
            .with_budget_cap(0.0)
            .validate()
            .unwrap();
        assert_eq!(limits.max_tokens_per_request, Some(4096));
        assert_eq!(limits.monthly_budget_cap, Some(0.0));
    }

    #[test]
    fn test_update_patch_semantics() {
        let current = KeyLimits {
            monthly_budget_cap: Some(100.0),
            max_tokens_per_request: Some(1000),
            max_reasoning_tokens: None,
        };

        let patch: VirtualKeyUpdate =
            serde_json::from_str(r#"{"monthly_budget_cap": null, "max_reasoning_tokens": 500}"#)
                .unwrap();
        let limits = patch.apply(current).unwrap();

        assert_eq!(limits.monthly_budget_cap, None);
        assert_eq!(limits.max_tokens_per_request, Some(1000));
        assert_eq!(limits.max_reasoning_tokens, Some(500));

        let patch: VirtualKeyUpdate =
            serde_json::from_str(r#"{"monthly_budget_cap": -1}"#).unwrap();
        assert!(patch.apply(current).is_err());
    }

    #[test]
    fn test_usage_event_totals_are_derived() {
        let event = NewUsageEvent::new(1, "openai", "gpt-4o")
            .with_tokens(120, 30)
            .with_costs(0.0003, 0.0003);
        assert_eq!(event.total_tokens, 150);
        assert!((event.total_cost - 0.0006).abs() < COST_EPSILON);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_usage_event_rejects_inconsistent_totals() {
        let mut event = NewUsageEvent::new(1, "openai", "gpt-4o").with_tokens(10, 5);
        event.total_tokens = 14;
        assert!(event.validate().is_err());

        let mut event = NewUsageEvent::new(1, "openai", "gpt-4o").with_costs(0.5, 0.5);
        event.total_cost = 1.5;
        assert!(event.validate().is_err());

        let event = NewUsageEvent::new(1, "openai", "gpt-4o").with_costs(-0.1, 0.2);
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_blocked_event_requires_reason() {
        let event = NewUsageEvent::new(1, "openai", "gpt-4o").blocked("budget");
        assert!(event.validate().is_ok());
        assert_eq!(event.total_tokens, 0);
        assert!(event.total_cost.abs() < f64::EPSILON);

        let mut event = NewUsageEvent::new(1, "openai", "gpt-4o");
        event.was_blocked = true;
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_virtual_key_hides_internal_fields() {
        let key = VirtualKey {
            id: 7,
            key: mask_key("vk_abcdefghi"),
            name: "ci".to_string(),
            team_id: None,
            project_id: None,
            user_email: None,
            cost_centre: None,
            environment: Some("prod".to_string()),
            agent_name: None,
            monthly_budget_cap: None,
            max_tokens_per_request: None,
            max_reasoning_tokens: None,
            is_active: true,
            created_at: Utc::now(),
            key_hash: "deadbeef".to_string(),
            created_by: Some(1),
        };

        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["key"], "vk_abcdefghi...");
        assert!(json.get("key_hash").is_none());
        assert!(json.get("created_by").is_none());
        assert!(json["monthly_budget_cap"].is_null());
    }
}
