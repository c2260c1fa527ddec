//! Derived metrics served by `/api/metrics/overview`.
//!
//! These are computed on demand and never stored. Monetary values are kept at
//! full precision and rounded to cents only when serialized.

use serde::{Deserialize, Serialize, Serializer};

/// Round a USD amount to cents
#[must_use]
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_cents<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_cents(*value))
}

/// Spend windows and MTD volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostOverview {
    /// Spend since 00:00 UTC today
    #[serde(serialize_with = "serialize_cents")]
    pub spend_today: f64,
    /// Spend since the first of the month
    #[serde(serialize_with = "serialize_cents")]
    pub spend_mtd: f64,
    /// Spend since January 1
    #[serde(serialize_with = "serialize_cents")]
    pub spend_ytd: f64,
    /// Linear run-rate projection of month-end spend
    #[serde(serialize_with = "serialize_cents")]
    pub forecasted_month_end: f64,
    /// Requests in the MTD window
    pub total_requests: u64,
    /// Tokens in the MTD window
    pub total_tokens: u64,
}

/// Spend attributed to a key owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopUser {
    /// Key owner email
    pub user_email: String,
    /// Spend in the window
    #[serde(serialize_with = "serialize_cents")]
    pub total_cost: f64,
    /// Requests in the window
    pub request_count: u64,
}

/// Spend attributed to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopProject {
    /// Project name
    pub project_name: String,
    /// Spend in the window
    #[serde(serialize_with = "serialize_cents")]
    pub total_cost: f64,
    /// Requests in the window
    pub request_count: u64,
}

/// One fingerprint group with at least two occurrences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatedPrompt {
    /// Truncated fingerprint for display
    pub hash: String,
    /// Occurrences in the window
    pub count: u64,
    /// Cost of every occurrence after the baseline
    #[serde(serialize_with = "serialize_cents")]
    pub estimated_waste: f64,
    /// Full fingerprint
    #[serde(skip)]
    pub full_hash: String,
}

/// Prompt-repetition waste summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WasteMetrics {
    /// Distinct fingerprints seen at least twice
    pub repeated_prompts_count: u64,
    /// Waste summed over every repeated group
    #[serde(serialize_with = "serialize_cents")]
    pub estimated_waste: f64,
    /// Highest-waste groups
    pub top_repeated_hashes: Vec<RepeatedPrompt>,
}

/// The dashboard's single read view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsOverview {
    /// Spend windows
    pub cost: CostOverview,
    /// Highest-spending key owners
    pub top_users: Vec<TopUser>,
    /// Highest-spending projects
    pub top_projects: Vec<TopProject>,
    /// Repeated-prompt waste
    pub waste: WasteMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_cents() {
        assert!((round_cents(0.044_999) - 0.04).abs() < 1e-12);
        assert!((round_cents(1.005_1) - 1.01).abs() < 1e-12);
        assert!(round_cents(0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_money_is_rounded_on_the_wire_only() {
        let cost = CostOverview {
            spend_today: 0.123_456,
            spend_mtd: 10.0 / 3.0,
            spend_ytd: 99.999,
            forecasted_month_end: 0.0,
            total_requests: 3,
            total_tokens: 900,
        };
        assert!((cost.spend_mtd - 10.0 / 3.0).abs() < f64::EPSILON);

        let json = serde_json::to_value(cost).unwrap();
        assert_eq!(json["spend_today"], 0.12);
        assert_eq!(json["spend_mtd"], 3.33);
        assert_eq!(json["spend_ytd"], 100.0);
        assert_eq!(json["total_requests"], 3);
    }

    #[test]
    fn test_repeated_prompt_hides_full_hash() {
        let group = RepeatedPrompt {
            hash: "abc123abc123abc1...".to_string(),
            count: 3,
            estimated_waste: 0.04,
            full_hash: "abc123abc123abc1ffff".to_string(),
        };
        let json = serde_json::to_value(&group).unwrap();
        assert!(json.get("full_hash").is_none());
        assert_eq!(json["count"], 3);
    }
}
