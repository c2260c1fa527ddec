//! # Auditor Accounting
//!
//! Accounting services for the AI Cost Auditor.
//!
//! - [`KeyRegistry`]: issues and authenticates virtual keys
//! - [`UsageLedger`]: append-only record of proxied calls
//! - [`CostAggregator`]: spend windows and month-end forecast
//! - [`WasteDetector`]: repeated-prompt waste
//! - [`MetricsAssembler`]: the dashboard overview
//! - [`BudgetGate`]: per-key check-and-reserve for in-flight calls
//! - [`PricingTable`] and [`PromptFingerprint`]: cost and fingerprint inputs

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregator;
pub mod budget;
pub mod fingerprint;
pub mod ledger;
pub mod overview;
pub mod pricing;
pub mod registry;
pub mod waste;

pub use aggregator::{forecast_month_end, CostAggregator};
pub use budget::{BudgetDecision, BudgetGate, Reservation};
pub use fingerprint::{display_hash, estimate_tokens, fingerprint, message_content, PromptFingerprint};
pub use ledger::{UsageLedger, UsageQuery};
pub use overview::MetricsAssembler;
pub use pricing::{Cost, PricingTable, PROVIDER_ANTHROPIC, PROVIDER_OPENAI};
pub use registry::{generate_key, hash_key, KeyRegistry, KEY_PREFIX};
pub use waste::{detect_waste, WasteDetector};
