//! Dashboard overview assembly.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use auditor_config::AccountingConfig;
use auditor_core::time::trailing_window;
use auditor_core::{
    AuditStore, AuditorResult, MetricsOverview, Principal, TopProject, TopUser, UsageEvent,
    UsageFilter,
};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::aggregator::CostAggregator;
use crate::waste::WasteDetector;

#[derive(Default)]
struct Tally {
    total_cost: f64,
    request_count: u64,
}

/// Sum cost and count per label, then rank: cost desc, count desc, label asc.
fn rank<'a>(
    events: &[UsageEvent],
    label: impl Fn(&UsageEvent) -> Option<&'a str>,
    top_n: usize,
) -> Vec<(&'a str, Tally)> {
    let mut tallies: HashMap<&str, Tally> = HashMap::new();
    for event in events {
        if let Some(name) = label(event) {
            let tally = tallies.entry(name).or_default();
            tally.total_cost += event.total_cost;
            tally.request_count += 1;
        }
    }

    let mut ranked: Vec<(&str, Tally)> = tallies.into_iter().collect();
    ranked.sort_by(|(a_name, a), (b_name, b)| {
        b.total_cost
            .partial_cmp(&a.total_cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.request_count.cmp(&a.request_count))
            .then_with(|| a_name.cmp(b_name))
    });
    ranked.truncate(top_n);
    ranked
}

/// Composes spend windows, top spenders, and waste into one read view.
#[derive(Clone)]
pub struct MetricsAssembler {
    store: Arc<dyn AuditStore>,
    aggregator: CostAggregator,
    detector: WasteDetector,
    top_window_days: u32,
    top_n: usize,
}

impl MetricsAssembler {
    /// Create an assembler from the accounting configuration
    pub fn new(store: Arc<dyn AuditStore>, config: &AccountingConfig) -> Self {
        Self {
            aggregator: CostAggregator::new(store.clone()),
            detector: WasteDetector::from_config(store.clone(), config),
            store,
            top_window_days: config.top_window_days,
            top_n: config.top_n,
        }
    }

    /// Overview as of `now`.
    ///
    /// Administrators see every key. Other users see only their own keys and
    /// an empty `top_users` list.
    pub async fn overview(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> AuditorResult<MetricsOverview> {
        let keys = self.store.list_keys(principal.owner_filter()).await?;
        let scope = if principal.is_admin {
            UsageFilter::all()
        } else {
            UsageFilter::all().with_keys(keys.iter().map(|key| key.id).collect())
        };

        let cost = self.aggregator.overview(&scope, now).await?;
        let waste = self.detector.detect(&scope, now).await?;

        let window = scope
            .clone()
            .since(trailing_window(now, self.top_window_days))
            .until(now);
        let events = self.store.query_events(&window, None).await?;

        let projects: HashMap<i64, String> = self
            .store
            .list_projects()
            .await?
            .into_iter()
            .map(|project| (project.id, project.name))
            .collect();

        let owner_of: HashMap<i64, &str> = keys
            .iter()
            .filter_map(|key| key.user_email.as_deref().map(|email| (key.id, email)))
            .collect();
        let project_of: HashMap<i64, &str> = keys
            .iter()
            .filter_map(|key| {
                key.project_id
                    .and_then(|id| projects.get(&id))
                    .map(|name| (key.id, name.as_str()))
            })
            .collect();

        let top_users = if principal.is_admin {
            rank(&events, |e| owner_of.get(&e.virtual_key_id).copied(), self.top_n)
                .into_iter()
                .map(|(email, tally)| TopUser {
                    user_email: email.to_string(),
                    total_cost: tally.total_cost,
                    request_count: tally.request_count,
                })
                .collect()
        } else {
            Vec::new()
        };

        let top_projects = rank(&events, |e| project_of.get(&e.virtual_key_id).copied(), self.top_n)
            .into_iter()
            .map(|(name, tally)| TopProject {
                project_name: name.to_string(),
                total_cost: tally.total_cost,
                request_count: tally.request_count,
            })
            .collect();

        debug!(
            user_id = principal.user_id,
            is_admin = principal.is_admin,
            keys = keys.len(),
            window_events = events.len(),
            "Metrics overview assembled"
        );

        Ok(MetricsOverview {
            cost,
            top_users,
            top_projects,
            waste,
        })
    }
}
