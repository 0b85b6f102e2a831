//! Quota Resolution and Usage Tracking
//!
//! Computes the single effective quota for a (subject, feature) pair from
//! layered sources and enforces it against windowed usage counters.
//!
//! # Precedence
//!
//! ```text
//! UserOverride > SubscriptionPlan > GlobalGuestDefault > SystemDefault
//! ```
//!
//! Users never see guest defaults and guests never see subscription plans.
//! Every registered feature has a system default, so resolution of a known
//! feature always produces a definition.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Usage Tracker                           │
//! │        try_consume / reset_usage / admin operations          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      Quota Resolver                          │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐     │
//! │  │ Override │→ │ Plan     │→ │ Guest    │→ │ System   │     │
//! │  │          │  │ (cached) │  │ default  │  │ default  │     │
//! │  └──────────┘  └──────────┘  └──────────┘  └──────────┘     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │     Quota Storage (atomic conditional consume)      │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod cache;
pub mod clock;
pub mod dashboard;
pub mod error;
pub mod guest;
pub mod period;
pub mod providers;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod store;
pub mod tracker;
pub mod types;

// Property-based tests module
#[cfg(test)]
mod proptests;

pub use audit::{AdminAction, AdminActionKind, AuditLog};
pub use cache::PlanCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use dashboard::{DashboardBuilder, DashboardData, SubjectOverview};
pub use error::{QuotaError, QuotaResult};
pub use guest::GuestIdentity;
pub use period::ResetPeriod;
pub use providers::QuotaProvider;
pub use registry::{FeatureRegistry, FeatureSpec};
pub use resolver::QuotaResolver;
pub use service::{QuotaService, ServiceOptions};
pub use store::{MemoryStore, QuotaStorage};
pub use tracker::{
    AdminContext, GuestDefaultRequest, OverrideRequest, PlanAssignmentRequest, UsageTracker,
};
pub use types::{
    ConsumeResult, EffectiveQuota, GuestQuota, PlanAssignment, PlanFeature, PlanStatus,
    QuotaDefinition, QuotaLimit, QuotaOverride, QuotaSource, Subject, SubjectKind,
    SubscriptionPlan, UsageRecord,
};
