//! Prompt-repetition waste detection.
//!
//! Events are grouped by prompt fingerprint. In each group the earliest
//! occurrence (lower id on equal timestamps) is the legitimate baseline and
//! every later occurrence counts as waste.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use auditor_config::AccountingConfig;
use auditor_core::time::trailing_window;
use auditor_core::{
    AuditStore, AuditorResult, RepeatedPrompt, UsageEvent, UsageFilter, WasteMetrics,
};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::fingerprint::display_hash;

struct Group<'a> {
    hash: &'a str,
    count: u64,
    waste: f64,
}

impl<'a> Group<'a> {
    fn new(hash: &'a str, mut occurrences: Vec<&'a UsageEvent>) -> Self {
        occurrences.sort_by_key(|event| (event.created_at, event.id));
        Self {
            hash,
            count: occurrences.len() as u64,
            waste: occurrences.iter().skip(1).map(|event| event.total_cost).sum(),
        }
    }
}

/// Waste summary over a set of events.
///
/// Deterministic for a given set of events regardless of their order.
#[must_use]
pub fn detect_waste(events: &[UsageEvent], top_n: usize) -> WasteMetrics {
    let mut by_hash: HashMap<&str, Vec<&UsageEvent>> = HashMap::new();
    for event in events {
        if let Some(hash) = event.prompt_hash.as_deref().filter(|h| !h.is_empty()) {
            by_hash.entry(hash).or_default().push(event);
        }
    }

    let mut repeated: Vec<Group<'_>> = by_hash
        .into_iter()
        .filter(|(_, occurrences)| occurrences.len() >= 2)
        .map(|(hash, occurrences)| Group::new(hash, occurrences))
        .collect();
    repeated.sort_by(|a, b| {
        b.waste
            .partial_cmp(&a.waste)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.count.cmp(&a.count))
            .then_with(|| a.hash.cmp(b.hash))
    });

    let estimated_waste = repeated.iter().map(|group| group.waste).sum();

    WasteMetrics {
        repeated_prompts_count: repeated.len() as u64,
        estimated_waste,
        top_repeated_hashes: repeated
            .iter()
            .take(top_n)
            .map(|group| RepeatedPrompt {
                hash: display_hash(group.hash),
                count: group.count,
                estimated_waste: group.waste,
                full_hash: group.hash.to_string(),
            })
            .collect(),
    }
}

/// Runs [`detect_waste`] over a trailing ledger window.
#[derive(Clone)]
pub struct WasteDetector {
    store: Arc<dyn AuditStore>,
    window_days: u32,
    top_n: usize,
}

impl WasteDetector {
    /// Create a detector
    pub fn new(store: Arc<dyn AuditStore>, window_days: u32, top_n: usize) -> Self {
        Self {
            store,
            window_days,
            top_n,
        }
    }

    /// Create a detector from the accounting configuration
    pub fn from_config(store: Arc<dyn AuditStore>, config: &AccountingConfig) -> Self {
        Self::new(store, config.waste_window_days, config.top_n)
    }

    /// Waste among the keys selected by `scope` over the trailing window
    pub async fn detect(
        &self,
        scope: &UsageFilter,
        now: DateTime<Utc>,
    ) -> AuditorResult<WasteMetrics> {
        let filter = scope
            .clone()
            .since(trailing_window(now, self.window_days))
            .until(now);
        let events = self.store.query_events(&filter, None).await?;
        let metrics = detect_waste(&events, self.top_n);

        debug!(
            events = events.len(),
            repeated = metrics.repeated_prompts_count,
            estimated_waste = metrics.estimated_waste,
            "Waste detection complete"
        );
        Ok(metrics)
    }
}
