//! Admin Dashboard Support
//!
//! Aggregates effective quotas, usage and the audit trail into views for
//! an admin dashboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::audit::AdminAction;
use super::error::QuotaResult;
use super::period::ResetPeriod;
use super::tracker::UsageTracker;
use super::types::{EffectiveQuota, GuestQuota, QuotaLimit, QuotaOverride, Subject, SubjectKind};

/// Audit entries included in a dashboard
const RECENT_ACTIONS: usize = 100;

/// Dashboard data for admin interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardData {
    /// Timestamp of data generation
    pub timestamp: DateTime<Utc>,

    /// Summary statistics
    pub summary: QuotaSummary,

    /// Per-feature statistics, ordered by key
    pub features: Vec<FeatureStats>,

    /// Configured global guest defaults
    pub guest_defaults: Vec<GuestQuota>,

    /// Most recent admin actions, newest first
    pub recent_actions: Vec<AdminAction>,
}

/// Usage across all tracked subjects
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaSummary {
    /// Distinct users with at least one usage record
    pub total_users: usize,

    /// Distinct guests with at least one usage record
    pub total_guests: usize,

    /// Units consumed in current windows
    pub total_consumed: u64,

    /// Usage records whose effective quota is used up
    pub exhausted_count: usize,

    /// Mean utilization over limited, non-zero quotas
    pub avg_utilization_percent: f64,
}

/// Statistics for a single feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStats {
    pub feature: String,
    pub display_name: Option<String>,
    pub default_limit: QuotaLimit,
    pub default_period: ResetPeriod,

    /// Subjects with a usage record for this feature
    pub tracked_subjects: usize,

    /// Units consumed in current windows
    pub total_consumed: u64,
}

/// Everything an admin needs about one subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectOverview {
    pub subject: Subject,
    pub quotas: Vec<EffectiveQuota>,
    pub overrides: Vec<QuotaOverride>,
    pub recent_actions: Vec<AdminAction>,
}

/// Dashboard builder for constructing dashboard data
pub struct DashboardBuilder<'a> {
    tracker: &'a UsageTracker,
}

impl<'a> DashboardBuilder<'a> {
    pub fn new(tracker: &'a UsageTracker) -> Self {
        Self { tracker }
    }

    /// Build store-wide dashboard data
    pub async fn build(&self) -> QuotaResult<DashboardData> {
        let resolver = self.tracker.resolver();
        let records = resolver.observe(resolver.storage().list_usage().await)?;

        let mut features: BTreeMap<String, FeatureStats> = resolver
            .registry()
            .features()
            .map(|spec| {
                (
                    spec.key.clone(),
                    FeatureStats {
                        feature: spec.key.clone(),
                        display_name: spec.display_name.clone(),
                        default_limit: spec.default_limit,
                        default_period: spec.default_period,
                        tracked_subjects: 0,
                        total_consumed: 0,
                    },
                )
            })
            .collect();

        let mut users = HashSet::new();
        let mut guests = HashSet::new();
        let mut summary = QuotaSummary::default();
        let mut total_utilization = 0.0;
        let mut quota_count = 0usize;

        for record in records {
            // Records for features removed from the registry are skipped
            let Some(stats) = features.get_mut(&record.feature) else {
                continue;
            };
            let quota = resolver.resolve(&record.subject, &record.feature).await?;

            match record.subject.kind() {
                SubjectKind::User => users.insert(record.subject.clone()),
                SubjectKind::Guest => guests.insert(record.subject.clone()),
            };

            stats.tracked_subjects += 1;
            stats.total_consumed += quota.consumed;
            summary.total_consumed += quota.consumed;
            if quota.is_exhausted() {
                summary.exhausted_count += 1;
            }
            if let Some(limit) = quota.limit.value().filter(|l| *l > 0) {
                total_utilization += quota.consumed as f64 / limit as f64 * 100.0;
                quota_count += 1;
            }
        }

        summary.total_users = users.len();
        summary.total_guests = guests.len();
        summary.avg_utilization_percent = if quota_count > 0 {
            total_utilization / quota_count as f64
        } else {
            0.0
        };

        Ok(DashboardData {
            timestamp: resolver.clock().now(),
            summary,
            features: features.into_values().collect(),
            guest_defaults: self.tracker.list_guest_defaults().await?,
            recent_actions: self.tracker.audit().recent(RECENT_ACTIONS).await,
        })
    }

    /// Effective quotas, overrides and audit trail for one subject
    pub async fn subject(&self, subject: &Subject) -> QuotaResult<SubjectOverview> {
        let mut recent_actions = self.tracker.audit().for_subject(subject).await;
        recent_actions.reverse();
        recent_actions.truncate(RECENT_ACTIONS);

        Ok(SubjectOverview {
            subject: subject.clone(),
            quotas: self.tracker.resolver().resolve_all(subject).await?,
            overrides: self.tracker.list_overrides(subject).await?,
            recent_actions,
        })
    }
}
