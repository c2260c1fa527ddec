//! Spend windows and month-end forecast.

use std::sync::Arc;

use auditor_core::time::{
    days_elapsed_in_month, days_in_month, start_of_day, start_of_month, start_of_year,
};
use auditor_core::{AuditStore, AuditorResult, CostOverview, UsageFilter};
use chrono::{DateTime, Utc};

/// Linear run-rate projection of month-end spend.
///
/// `days_elapsed` counts today, so it is at least 1.
#[must_use]
pub fn forecast_month_end(spend_mtd: f64, days_elapsed: u32, days_in_month: u32) -> f64 {
    spend_mtd / f64::from(days_elapsed.max(1)) * f64::from(days_in_month)
}

/// Sums ledger spend over the today, month-to-date, and year-to-date windows.
#[derive(Clone)]
pub struct CostAggregator {
    store: Arc<dyn AuditStore>,
}

impl CostAggregator {
    /// Create an aggregator over a store
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Cost overview for the keys selected by `scope`, as of `now`.
    ///
    /// Any time bounds already on `scope` are replaced by the windows.
    pub async fn overview(
        &self,
        scope: &UsageFilter,
        now: DateTime<Utc>,
    ) -> AuditorResult<CostOverview> {
        let window = |start| scope.clone().since(start).until(now);

        let today = self.store.sum_usage(&window(start_of_day(now))).await?;
        let mtd = self.store.sum_usage(&window(start_of_month(now))).await?;
        let ytd = self.store.sum_usage(&window(start_of_year(now))).await?;

        Ok(CostOverview {
            spend_today: today.total_cost,
            spend_mtd: mtd.total_cost,
            spend_ytd: ytd.total_cost,
            forecasted_month_end: forecast_month_end(
                mtd.total_cost,
                days_elapsed_in_month(now),
                days_in_month(now),
            ),
            total_requests: mtd.request_count,
            total_tokens: mtd.total_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::KeyRegistry;
    use auditor_core::{NewUsageEvent, Principal, VirtualKeyCreate};
    use auditor_storage::MemoryStore;
    use chrono::{Duration, TimeZone};

    async fn seeded(events: &[(DateTime<Utc>, f64, u64)]) -> (CostAggregator, i64, i64) {
        let store: Arc<dyn AuditStore> = Arc::new(MemoryStore::new());
        let registry = KeyRegistry::new(store.clone());
        let admin = Principal::admin(1, "admin@example.com");
        let a = registry.create(&admin, VirtualKeyCreate::new("a")).await.unwrap();
        let b = registry.create(&admin, VirtualKeyCreate::new("b")).await.unwrap();

        for (at, cost, tokens) in events {
            store
                .append_event(
                    NewUsageEvent::new(a.id, "openai", "gpt-4o")
                        .with_tokens(*tokens, 0)
                        .with_costs(*cost, 0.0)
                        .at(*at),
                )
                .await
                .unwrap();
        }
        (CostAggregator::new(store), a.id, b.id)
    }

    #[test]
    fn test_forecast() {
        assert!((forecast_month_end(10.0, 1, 31) - 310.0).abs() < 1e-9);
        assert!((forecast_month_end(15.0, 15, 30) - 30.0).abs() < 1e-9);
        assert!(forecast_month_end(0.0, 0, 30).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_windows() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let (aggregator, _, _) = seeded(&[
            (now - Duration::hours(1), 1.0, 100),
            (Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap(), 0.5, 10),
            (Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap(), 2.0, 20),
            (Utc.with_ymd_and_hms(2024, 1, 20, 9, 0, 0).unwrap(), 4.0, 40),
            (Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap(), 8.0, 80),
            (now + Duration::hours(1), 16.0, 160),
        ])
        .await;

        let overview = aggregator.overview(&UsageFilter::all(), now).await.unwrap();
        assert!((overview.spend_today - 1.5).abs() < 1e-9);
        assert!((overview.spend_mtd - 3.5).abs() < 1e-9);
        assert!((overview.spend_ytd - 7.5).abs() < 1e-9);
        assert_eq!(overview.total_requests, 3);
        assert_eq!(overview.total_tokens, 130);
        assert!((overview.forecasted_month_end - 3.5 / 15.0 * 31.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_first_of_month_forecast() {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 6, 0, 0).unwrap();
        let (aggregator, _, _) = seeded(&[(now - Duration::hours(2), 3.0, 1)]).await;

        let overview = aggregator.overview(&UsageFilter::all(), now).await.unwrap();
        assert!((overview.forecasted_month_end - 90.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_scope_restricts_keys() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let (aggregator, a, b) = seeded(&[(now, 1.0, 1)]).await;

        let own = aggregator.overview(&UsageFilter::for_key(a), now).await.unwrap();
        assert!((own.spend_mtd - 1.0).abs() < 1e-9);

        let other = aggregator.overview(&UsageFilter::for_key(b), now).await.unwrap();
        assert_eq!(other, CostOverview::default());
    }
}
