//! Budget decisions and the per-key budget gate.
//!
//! The gate serializes check-and-reserve per virtual key: while one request
//! is reading month-to-date spend for a key, no other request for that key
//! can reserve. Outstanding reservations count as spent until their
//! [`Reservation`] is dropped.

use std::sync::Arc;

use auditor_core::{AuditStore, AuditorError, AuditorResult, VirtualKey};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::registry::{spend_mtd, validate_projected_cost};

/// Outcome of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum BudgetDecision {
    /// The charge fits
    Allow,
    /// The charge would exceed the cap
    Deny {
        /// Month-to-date spend (plus outstanding reservations, for the gate)
        current_spend: f64,
        /// Cost of the proposed call
        projected_cost: f64,
        /// Monthly cap
        cap: f64,
    },
}

impl BudgetDecision {
    /// Deny iff `current_spend + projected_cost > cap`
    #[must_use]
    pub fn evaluate(current_spend: f64, projected_cost: f64, cap: f64) -> Self {
        if current_spend + projected_cost > cap {
            Self::Deny {
                current_spend,
                projected_cost,
                cap,
            }
        } else {
            Self::Allow
        }
    }

    /// Gate rule: like [`Self::evaluate`], and a non-zero cap that is
    /// already fully committed admits nothing, whatever the projection
    #[must_use]
    pub fn evaluate_reservation(committed: f64, projected_cost: f64, cap: f64) -> Self {
        if cap > 0.0 && committed >= cap {
            return Self::Deny {
                current_spend: committed,
                projected_cost,
                cap,
            };
        }
        Self::evaluate(committed, projected_cost, cap)
    }

    /// Whether the charge may proceed
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Convert a denial into [`AuditorError::BudgetExceeded`]
    pub fn into_result(self, virtual_key_id: i64) -> AuditorResult<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny {
                current_spend,
                projected_cost,
                cap,
            } => Err(AuditorError::BudgetExceeded {
                virtual_key_id,
                current_spend,
                projected_cost,
                cap,
            }),
        }
    }
}

#[derive(Default)]
struct KeyBudget {
    check: tokio::sync::Mutex<()>,
    reserved: parking_lot::Mutex<f64>,
}

impl KeyBudget {
    fn release(&self, amount: f64) {
        let mut reserved = self.reserved.lock();
        *reserved = (*reserved - amount).max(0.0);
    }
}

/// Projected cost held against a key while its upstream call is in flight.
///
/// Released when dropped.
#[must_use = "dropping a reservation releases it immediately"]
pub struct Reservation {
    virtual_key_id: i64,
    amount: f64,
    budget: Option<Arc<KeyBudget>>,
}

impl Reservation {
    /// Key the reservation is held against
    pub fn virtual_key_id(&self) -> i64 {
        self.virtual_key_id
    }

    /// Reserved amount in USD
    pub fn amount(&self) -> f64 {
        self.amount
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("virtual_key_id", &self.virtual_key_id)
            .field("amount", &self.amount)
            .field("tracked", &self.budget.is_some())
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(budget) = self.budget.take() {
            budget.release(self.amount);
            debug!(
                virtual_key_id = self.virtual_key_id,
                amount = self.amount,
                "Budget reservation released"
            );
        }
    }
}

/// Serialized check-and-reserve against monthly caps.
pub struct BudgetGate {
    store: Arc<dyn AuditStore>,
    budgets: DashMap<i64, Arc<KeyBudget>>,
}

impl BudgetGate {
    /// Create a gate over a store
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            budgets: DashMap::new(),
        }
    }

    /// Reserve `projected_cost` against the key's monthly cap.
    ///
    /// Keys without a cap always succeed with an untracked reservation.
    pub async fn reserve(
        &self,
        key: &VirtualKey,
        projected_cost: f64,
        now: DateTime<Utc>,
    ) -> AuditorResult<Reservation> {
        validate_projected_cost(projected_cost)?;

        let Some(cap) = key.monthly_budget_cap else {
            return Ok(Reservation {
                virtual_key_id: key.id,
                amount: projected_cost,
                budget: None,
            });
        };

        let budget = Arc::clone(&*self.budgets.entry(key.id).or_default());
        let check = budget.check.lock().await;

        let spent = spend_mtd(self.store.as_ref(), key.id, now).await?;
        let outstanding = *budget.reserved.lock();

        if let Err(err) =
            BudgetDecision::evaluate_reservation(spent + outstanding, projected_cost, cap)
                .into_result(key.id)
        {
            warn!(
                virtual_key_id = key.id,
                spent,
                outstanding,
                projected_cost,
                cap,
                "Budget cap would be exceeded"
            );
            return Err(err);
        }

        *budget.reserved.lock() += projected_cost;
        debug!(
            virtual_key_id = key.id,
            projected_cost,
            outstanding = outstanding + projected_cost,
            "Budget reserved"
        );
        drop(check);

        Ok(Reservation {
            virtual_key_id: key.id,
            amount: projected_cost,
            budget: Some(budget),
        })
    }

    /// Sum of outstanding reservations for a key
    pub fn outstanding(&self, virtual_key_id: i64) -> f64 {
        self.budgets
            .get(&virtual_key_id)
            .map_or(0.0, |budget| *budget.reserved.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::KeyRegistry;
    use auditor_core::{NewUsageEvent, Principal, VirtualKeyCreate};
    use auditor_storage::MemoryStore;

    async fn setup(cap: Option<f64>) -> (Arc<BudgetGate>, Arc<dyn AuditStore>, VirtualKey) {
        let store: Arc<dyn AuditStore> = Arc::new(MemoryStore::new());
        let registry = KeyRegistry::new(store.clone());
        let mut spec = VirtualKeyCreate::new("budgeted");
        if let Some(cap) = cap {
            spec = spec.with_budget_cap(cap);
        }
        let key = registry
            .create(&Principal::admin(1, "admin@example.com"), spec)
            .await
            .unwrap();
        (Arc::new(BudgetGate::new(store.clone())), store, key)
    }

    #[test]
    fn test_decision_boundary() {
        assert!(BudgetDecision::evaluate(0.5, 0.5, 1.0).is_allowed());
        assert!(!BudgetDecision::evaluate(0.5, 0.51, 1.0).is_allowed());
        assert!(BudgetDecision::evaluate(0.0, 0.0, 0.0).is_allowed());
        assert!(!BudgetDecision::evaluate(0.0, 0.01, 0.0).is_allowed());

        let err = BudgetDecision::evaluate(2.0, 1.0, 2.5)
            .into_result(7)
            .unwrap_err();
        assert!(matches!(
            err,
            AuditorError::BudgetExceeded {
                virtual_key_id: 7,
                ..
            }
        ));
    }

    #[test]
    fn test_reservation_rule_denies_exhausted_cap() {
        assert!(!BudgetDecision::evaluate_reservation(1.0, 0.0, 1.0).is_allowed());
        assert!(!BudgetDecision::evaluate_reservation(1.2, 0.0, 1.0).is_allowed());
        assert!(BudgetDecision::evaluate_reservation(0.5, 0.25, 1.0).is_allowed());
        assert!(BudgetDecision::evaluate_reservation(0.0, 0.0, 0.0).is_allowed());
        assert!(!BudgetDecision::evaluate_reservation(0.0, 0.01, 0.0).is_allowed());
    }

    #[tokio::test]
    async fn test_zero_projection_denied_at_cap() {
        let (gate, store, key) = setup(Some(1.0)).await;
        let now = Utc::now();
        store
            .append_event(
                NewUsageEvent::new(key.id, "openai", "gpt-4o")
                    .with_costs(0.4, 0.6)
                    .at(now),
            )
            .await
            .unwrap();

        assert!(matches!(
            gate.reserve(&key, 0.0, now).await,
            Err(AuditorError::BudgetExceeded { .. })
        ));
        assert!(gate.outstanding(key.id).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_uncapped_key_always_reserves() {
        let (gate, _, key) = setup(None).await;
        let reservation = gate.reserve(&key, 1_000.0, Utc::now()).await.unwrap();
        assert!((reservation.amount() - 1_000.0).abs() < f64::EPSILON);
        assert!(gate.outstanding(key.id).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_reservations_count_until_dropped() {
        let (gate, _, key) = setup(Some(1.0)).await;
        let now = Utc::now();

        let first = gate.reserve(&key, 0.6, now).await.unwrap();
        assert!((gate.outstanding(key.id) - 0.6).abs() < 1e-9);

        let second = gate.reserve(&key, 0.6, now).await;
        assert!(matches!(second, Err(AuditorError::BudgetExceeded { .. })));

        drop(first);
        assert!(gate.outstanding(key.id).abs() < 1e-9);
        assert!(gate.reserve(&key, 0.6, now).await.is_ok());
    }

    #[tokio::test]
    async fn test_recorded_spend_counts() {
        let (gate, store, key) = setup(Some(1.0)).await;
        let now = Utc::now();
        store
            .append_event(
                NewUsageEvent::new(key.id, "openai", "gpt-4o")
                    .with_costs(0.5, 0.3)
                    .at(now),
            )
            .await
            .unwrap();

        assert!(gate.reserve(&key, 0.2, now).await.is_ok());
        assert!(gate.reserve(&key, 0.21, now).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_admit_only_what_fits() {
        let (gate, _, key) = setup(Some(1.0)).await;
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                gate.reserve(&key, 0.3, now).await.ok()
            }));
        }

        let mut held = Vec::new();
        for handle in handles {
            if let Some(reservation) = handle.await.unwrap() {
                held.push(reservation);
            }
        }

        assert_eq!(held.len(), 3);
        assert!((gate.outstanding(key.id) - 0.9).abs() < 1e-9);
        drop(held);
        assert!(gate.outstanding(key.id).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_invalid_projection() {
        let (gate, _, key) = setup(Some(1.0)).await;
        assert!(matches!(
            gate.reserve(&key, -0.1, Utc::now()).await,
            Err(AuditorError::Validation { .. })
        ));
    }
}
