//! # Auditor Core
//!
//! Core types, traits, and error handling for the AI Cost Auditor.
//!
//! This crate provides the foundational types used throughout the auditor:
//! - Virtual keys, usage events, and identity records
//! - Derived metrics shapes served to the dashboard
//! - Repository traits implemented by the storage backends
//! - Error types and handling
//! - UTC calendar windows used by aggregation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod metrics;
pub mod principal;
pub mod repository;
pub mod time;
pub mod types;

// Re-export commonly used types
pub use error::{AuditorError, AuditorResult};
pub use metrics::{
    round_cents, CostOverview, MetricsOverview, RepeatedPrompt, TopProject, TopUser, WasteMetrics,
};
pub use principal::Principal;
pub use repository::{
    AuditStore, DirectoryRepository, KeyRepository, UsageFilter, UsageRepository, UsageTotals,
};
pub use types::{
    mask_key, KeyLimits, NewProject, NewTeam, NewUsageEvent, NewUser, NewVirtualKey, Organization, Project,
    Team, UsageEvent, User, UserProfile, VirtualKey, VirtualKeyCreate, VirtualKeyUpdate,
    COST_EPSILON,
};
