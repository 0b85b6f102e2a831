//! Quota Types
//!
//! Subjects, limits, definitions and usage records shared by the resolver,
//! the usage tracker and the storage collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use super::error::QuotaError;
use super::period::ResetPeriod;

/// Identity a quota is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Subject {
    /// Authenticated user
    User(String),
    /// Unauthenticated visitor, keyed by a device-derived id
    Guest(String),
}

impl Subject {
    /// Create a user subject
    pub fn user(id: impl Into<String>) -> Self {
        Subject::User(id.into())
    }

    /// Create a guest subject
    pub fn guest(id: impl Into<String>) -> Self {
        Subject::Guest(id.into())
    }

    /// Raw identifier without the kind prefix
    pub fn id(&self) -> &str {
        match self {
            Subject::User(id) | Subject::Guest(id) => id,
        }
    }

    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::User(_) => SubjectKind::User,
            Subject::Guest(_) => SubjectKind::Guest,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Subject::Guest(_))
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::User(id) => write!(f, "user:{}", id),
            Subject::Guest(id) => write!(f, "guest:{}", id),
        }
    }
}

impl FromStr for Subject {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| QuotaError::InvalidSubject(s.to_string()))?;
        if id.trim().is_empty() {
            return Err(QuotaError::InvalidSubject(s.to_string()));
        }
        match kind {
            "user" => Ok(Subject::User(id.to_string())),
            "guest" => Ok(Subject::Guest(id.to_string())),
            _ => Err(QuotaError::InvalidSubject(s.to_string())),
        }
    }
}

impl TryFrom<String> for Subject {
    type Error = QuotaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.to_string()
    }
}

/// Kind of subject, used by providers to declare applicability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Guest,
}

/// Layer a quota definition came from, in descending precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaSource {
    UserOverride,
    SubscriptionPlan,
    #[serde(rename = "global_guest")]
    GlobalGuestDefault,
    SystemDefault,
}

impl QuotaSource {
    /// All sources, highest precedence first
    pub const PRECEDENCE: [QuotaSource; 4] = [
        QuotaSource::UserOverride,
        QuotaSource::SubscriptionPlan,
        QuotaSource::GlobalGuestDefault,
        QuotaSource::SystemDefault,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QuotaSource::UserOverride => "user_override",
            QuotaSource::SubscriptionPlan => "subscription_plan",
            QuotaSource::GlobalGuestDefault => "global_guest",
            QuotaSource::SystemDefault => "system_default",
        }
    }
}

impl std::fmt::Display for QuotaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum consumption per window
///
/// Accepts a non-negative integer, `-1` (legacy unlimited marker) or the
/// string `"unlimited"` when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "LimitRepr", into = "LimitRepr")]
pub enum QuotaLimit {
    Limited(u64),
    Unlimited,
}

impl QuotaLimit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, QuotaLimit::Unlimited)
    }

    /// Whether `amount` more units fit on top of `consumed`
    pub fn allows(&self, consumed: u64, amount: u64) -> bool {
        match self {
            QuotaLimit::Unlimited => true,
            QuotaLimit::Limited(limit) => consumed
                .checked_add(amount)
                .is_some_and(|total| total <= *limit),
        }
    }

    /// Units left in the window, `None` when unlimited
    pub fn remaining(&self, consumed: u64) -> Option<u64> {
        match self {
            QuotaLimit::Unlimited => None,
            QuotaLimit::Limited(limit) => Some(limit.saturating_sub(consumed)),
        }
    }

    /// Numeric limit, `None` when unlimited
    pub fn value(&self) -> Option<u64> {
        match self {
            QuotaLimit::Unlimited => None,
            QuotaLimit::Limited(limit) => Some(*limit),
        }
    }
}

impl std::fmt::Display for QuotaLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaLimit::Unlimited => f.write_str("unlimited"),
            QuotaLimit::Limited(limit) => write!(f, "{}", limit),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Count(i64),
    Keyword(String),
}

impl TryFrom<LimitRepr> for QuotaLimit {
    type Error = QuotaError;

    fn try_from(repr: LimitRepr) -> Result<Self, Self::Error> {
        match repr {
            LimitRepr::Count(-1) => Ok(QuotaLimit::Unlimited),
            LimitRepr::Count(n) if n >= 0 => Ok(QuotaLimit::Limited(n as u64)),
            LimitRepr::Count(n) => Err(QuotaError::InvalidLimit(n.to_string())),
            LimitRepr::Keyword(word) if word.eq_ignore_ascii_case("unlimited") => {
                Ok(QuotaLimit::Unlimited)
            }
            LimitRepr::Keyword(word) => word
                .parse::<u64>()
                .map(QuotaLimit::Limited)
                .map_err(|_| QuotaError::InvalidLimit(word)),
        }
    }
}

impl From<QuotaLimit> for LimitRepr {
    fn from(limit: QuotaLimit) -> Self {
        match limit {
            QuotaLimit::Unlimited => LimitRepr::Keyword("unlimited".to_string()),
            QuotaLimit::Limited(n) => match i64::try_from(n) {
                Ok(n) => LimitRepr::Count(n),
                Err(_) => LimitRepr::Keyword(n.to_string()),
            },
        }
    }
}

impl FromStr for QuotaLimit {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<i64>() {
            Ok(n) => LimitRepr::Count(n).try_into(),
            Err(_) => LimitRepr::Keyword(s.to_string()).try_into(),
        }
    }
}

/// A limit contributed by one source layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDefinition {
    /// Subject the definition is scoped to, `None` for global layers
    pub subject: Option<Subject>,
    pub feature: String,
    pub limit: QuotaLimit,
    pub period: ResetPeriod,
    pub source: QuotaSource,
}

/// Administrative per-subject limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaOverride {
    pub subject: Subject,
    pub feature: String,
    pub limit: QuotaLimit,
    pub period: ResetPeriod,
    /// Why the override was granted
    pub reason: Option<String>,
    /// Admin that created or last updated the override
    pub created_by: Option<String>,
    /// Inactive overrides are kept but ignored by the resolver
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl QuotaOverride {
    pub fn definition(&self) -> QuotaDefinition {
        QuotaDefinition {
            subject: Some(self.subject.clone()),
            feature: self.feature.clone(),
            limit: self.limit,
            period: self.period,
            source: QuotaSource::UserOverride,
        }
    }
}

/// Limit applied to every guest for a feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestQuota {
    pub feature: String,
    pub limit: QuotaLimit,
    #[serde(default)]
    pub period: ResetPeriod,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl GuestQuota {
    pub fn definition(&self) -> QuotaDefinition {
        QuotaDefinition {
            subject: None,
            feature: self.feature.clone(),
            limit: self.limit,
            period: self.period,
            source: QuotaSource::GlobalGuestDefault,
        }
    }
}

/// Per-feature entry of a subscription plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFeature {
    /// Explicit plan limit; the registry default applies when absent
    #[serde(default)]
    pub limit: Option<QuotaLimit>,
    #[serde(default)]
    pub period: ResetPeriod,
}

/// Subscription plan from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub name: String,
    /// Higher sort order wins when a user holds several plans
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub features: HashMap<String, PlanFeature>,
}

/// Lifecycle state of a plan assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Trialing,
    Canceled,
    Expired,
}

/// A user's subscription to a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAssignment {
    pub user_id: String,
    pub plan: String,
    pub status: PlanStatus,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PlanAssignment {
    /// Whether the assignment currently grants its plan's quotas
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, PlanStatus::Active | PlanStatus::Trialing)
            && self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// Composite key of a usage record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageKey {
    pub subject: Subject,
    pub feature: String,
}

impl UsageKey {
    pub fn new(subject: Subject, feature: impl Into<String>) -> Self {
        Self {
            subject,
            feature: feature.into(),
        }
    }
}

/// Consumption counter for one (subject, feature) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub subject: Subject,
    pub feature: String,
    pub consumed: u64,
    pub window_start: DateTime<Utc>,
    pub last_reset: DateTime<Utc>,
}

impl UsageRecord {
    /// Fresh record with an empty window opened at `now`
    pub fn new(key: &UsageKey, period: ResetPeriod, now: DateTime<Utc>) -> Self {
        Self {
            subject: key.subject.clone(),
            feature: key.feature.clone(),
            consumed: 0,
            window_start: period.window_start(now),
            last_reset: now,
        }
    }

    /// Roll the window if its reset boundary has passed; returns whether it rolled
    pub fn roll_if_elapsed(&mut self, period: ResetPeriod, now: DateTime<Utc>) -> bool {
        if period.has_elapsed(self.last_reset, now) {
            self.consumed = 0;
            self.window_start = period.window_start(now);
            self.last_reset = now;
            true
        } else {
            false
        }
    }

    /// Consumption as seen at `now`, treating an expired window as empty
    pub fn consumed_at(&self, period: ResetPeriod, now: DateTime<Utc>) -> u64 {
        if period.has_elapsed(self.last_reset, now) {
            0
        } else {
            self.consumed
        }
    }
}

/// The single limit in force for a subject and feature, with usage state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveQuota {
    pub subject: Subject,
    pub feature: String,
    pub limit: QuotaLimit,
    pub consumed: u64,
    /// `None` when unlimited
    pub remaining: Option<u64>,
    pub source: QuotaSource,
    pub period: ResetPeriod,
    /// `None` when the period never resets
    pub reset_at: Option<DateTime<Utc>>,
}

impl EffectiveQuota {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Outcome of a consumption attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeResult {
    pub allowed: bool,
    pub consumed: u64,
    /// `None` when unlimited
    pub remaining: Option<u64>,
    pub limit: QuotaLimit,
    pub source: QuotaSource,
    pub reset_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_parse_and_display() {
        let subject: Subject = "user:42".parse().unwrap();
        assert_eq!(subject, Subject::user("42"));
        assert_eq!(subject.to_string(), "user:42");

        let guest: Subject = "guest:abc:def".parse().unwrap();
        assert_eq!(guest, Subject::guest("abc:def"));
        assert!(guest.is_guest());
    }

    #[test]
    fn test_subject_parse_rejects_bad_input() {
        assert!("42".parse::<Subject>().is_err());
        assert!("user:".parse::<Subject>().is_err());
        assert!("admin:1".parse::<Subject>().is_err());
    }

    #[test]
    fn test_subject_serializes_as_string() {
        let json = serde_json::to_string(&Subject::guest("fp-1")).unwrap();
        assert_eq!(json, "\"guest:fp-1\"");
    }

    #[test]
    fn test_limit_allows() {
        let limit = QuotaLimit::Limited(5);
        assert!(limit.allows(4, 1));
        assert!(!limit.allows(5, 1));
        assert!(!limit.allows(u64::MAX, 1));
        assert!(QuotaLimit::Unlimited.allows(u64::MAX, 1));
        assert!(!QuotaLimit::Limited(0).allows(0, 1));
    }

    #[test]
    fn test_limit_remaining_saturates() {
        assert_eq!(QuotaLimit::Limited(3).remaining(5), Some(0));
        assert_eq!(QuotaLimit::Unlimited.remaining(5), None);
    }

    #[test]
    fn test_limit_deserialization_forms() {
        let limit: QuotaLimit = serde_json::from_str("10").unwrap();
        assert_eq!(limit, QuotaLimit::Limited(10));
        let limit: QuotaLimit = serde_json::from_str("-1").unwrap();
        assert_eq!(limit, QuotaLimit::Unlimited);
        let limit: QuotaLimit = serde_json::from_str("\"unlimited\"").unwrap();
        assert_eq!(limit, QuotaLimit::Unlimited);
        assert!(serde_json::from_str::<QuotaLimit>("-5").is_err());
        assert!(serde_json::from_str::<QuotaLimit>("\"lots\"").is_err());
    }

    #[test]
    fn test_zero_limit_is_not_unlimited() {
        let limit: QuotaLimit = "0".parse().unwrap();
        assert_eq!(limit, QuotaLimit::Limited(0));
    }

    #[test]
    fn test_source_serialization() {
        let json = serde_json::to_string(&QuotaSource::GlobalGuestDefault).unwrap();
        assert_eq!(json, "\"global_guest\"");
        let json = serde_json::to_string(&QuotaSource::UserOverride).unwrap();
        assert_eq!(json, "\"user_override\"");
    }

    #[test]
    fn test_plan_assignment_is_current() {
        let now = Utc::now();
        let mut assignment = PlanAssignment {
            user_id: "1".to_string(),
            plan: "pro".to_string(),
            status: PlanStatus::Trialing,
            expires_at: None,
        };
        assert!(assignment.is_current(now));

        assignment.expires_at = Some(now);
        assert!(!assignment.is_current(now));

        assignment.expires_at = None;
        assignment.status = PlanStatus::Canceled;
        assert!(!assignment.is_current(now));
    }
}
