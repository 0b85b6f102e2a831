//! Quota Store
//!
//! The storage collaborator contract and its in-memory implementation.
//!
//! The only write path for usage counters is [`QuotaStorage::consume_if_within`],
//! a conditional update that rolls an expired window, checks the limit and
//! increments in one step. Implementations must make it atomic per key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::QuotaResult;
use super::period::ResetPeriod;
use super::types::{
    GuestQuota, PlanAssignment, QuotaLimit, QuotaOverride, Subject, SubscriptionPlan, UsageKey,
    UsageRecord,
};

/// Result of a conditional consume against the persisted counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOutcome {
    /// Whether the counter was incremented
    pub allowed: bool,

    /// Record state after the operation
    pub record: UsageRecord,

    /// Whether the window rolled over during this call
    pub rolled: bool,
}

/// Keyed storage for quota definitions and usage records
#[async_trait]
pub trait QuotaStorage: Send + Sync + std::fmt::Debug {
    async fn get_override(&self, subject: &Subject, feature: &str)
        -> QuotaResult<Option<QuotaOverride>>;

    /// Insert or replace an override, returning the previous one
    async fn put_override(&self, record: QuotaOverride) -> QuotaResult<Option<QuotaOverride>>;

    async fn delete_override(&self, subject: &Subject, feature: &str)
        -> QuotaResult<Option<QuotaOverride>>;

    async fn list_overrides(&self, subject: &Subject) -> QuotaResult<Vec<QuotaOverride>>;

    async fn get_guest_quota(&self, feature: &str) -> QuotaResult<Option<GuestQuota>>;

    async fn put_guest_quota(&self, quota: GuestQuota) -> QuotaResult<Option<GuestQuota>>;

    async fn delete_guest_quota(&self, feature: &str) -> QuotaResult<Option<GuestQuota>>;

    async fn list_guest_quotas(&self) -> QuotaResult<Vec<GuestQuota>>;

    async fn get_plan(&self, name: &str) -> QuotaResult<Option<SubscriptionPlan>>;

    async fn put_plan(&self, plan: SubscriptionPlan) -> QuotaResult<()>;

    /// Insert or replace the assignment of `assignment.plan` to its user
    async fn put_assignment(&self, assignment: PlanAssignment) -> QuotaResult<()>;

    async fn delete_assignment(&self, user_id: &str, plan: &str) -> QuotaResult<bool>;

    async fn assignments(&self, user_id: &str) -> QuotaResult<Vec<PlanAssignment>>;

    async fn get_usage(&self, key: &UsageKey) -> QuotaResult<Option<UsageRecord>>;

    /// Atomically roll an elapsed window and increment by `amount` iff the
    /// result stays within `limit`. Creates the record on first use.
    async fn consume_if_within(
        &self,
        key: &UsageKey,
        amount: u64,
        limit: QuotaLimit,
        period: ResetPeriod,
        now: DateTime<Utc>,
    ) -> QuotaResult<ConsumeOutcome>;

    /// Zero the counter and restart the window at `now`; returns the previous count
    async fn reset_usage(&self, key: &UsageKey, now: DateTime<Utc>) -> QuotaResult<u64>;

    async fn list_usage(&self) -> QuotaResult<Vec<UsageRecord>>;
}

/// In-memory quota store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// Overrides keyed by (subject, feature)
    overrides: Arc<RwLock<HashMap<UsageKey, QuotaOverride>>>,

    /// Global guest quotas keyed by feature
    guest_quotas: Arc<RwLock<HashMap<String, GuestQuota>>>,

    /// Plan catalog keyed by plan name
    plans: Arc<RwLock<HashMap<String, SubscriptionPlan>>>,

    /// Plan assignments keyed by user id
    assignments: Arc<RwLock<HashMap<String, Vec<PlanAssignment>>>>,

    /// Usage counters
    usage: Arc<RwLock<HashMap<UsageKey, UsageRecord>>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of usage records currently held
    pub async fn usage_count(&self) -> usize {
        self.usage.read().await.len()
    }

    /// Drop every usage record
    pub async fn clear_usage(&self) {
        self.usage.write().await.clear();
    }
}

#[async_trait]
impl QuotaStorage for MemoryStore {
    async fn get_override(
        &self,
        subject: &Subject,
        feature: &str,
    ) -> QuotaResult<Option<QuotaOverride>> {
        let key = UsageKey::new(subject.clone(), feature);
        Ok(self.overrides.read().await.get(&key).cloned())
    }

    async fn put_override(&self, record: QuotaOverride) -> QuotaResult<Option<QuotaOverride>> {
        let key = UsageKey::new(record.subject.clone(), record.feature.clone());
        Ok(self.overrides.write().await.insert(key, record))
    }

    async fn delete_override(
        &self,
        subject: &Subject,
        feature: &str,
    ) -> QuotaResult<Option<QuotaOverride>> {
        let key = UsageKey::new(subject.clone(), feature);
        Ok(self.overrides.write().await.remove(&key))
    }

    async fn list_overrides(&self, subject: &Subject) -> QuotaResult<Vec<QuotaOverride>> {
        let overrides = self.overrides.read().await;
        let mut list: Vec<QuotaOverride> = overrides
            .values()
            .filter(|o| &o.subject == subject)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.feature.cmp(&b.feature));
        Ok(list)
    }

    async fn get_guest_quota(&self, feature: &str) -> QuotaResult<Option<GuestQuota>> {
        Ok(self.guest_quotas.read().await.get(feature).cloned())
    }

    async fn put_guest_quota(&self, quota: GuestQuota) -> QuotaResult<Option<GuestQuota>> {
        Ok(self
            .guest_quotas
            .write()
            .await
            .insert(quota.feature.clone(), quota))
    }

    async fn delete_guest_quota(&self, feature: &str) -> QuotaResult<Option<GuestQuota>> {
        Ok(self.guest_quotas.write().await.remove(feature))
    }

    async fn list_guest_quotas(&self) -> QuotaResult<Vec<GuestQuota>> {
        let quotas = self.guest_quotas.read().await;
        let mut list: Vec<GuestQuota> = quotas.values().cloned().collect();
        list.sort_by(|a, b| a.feature.cmp(&b.feature));
        Ok(list)
    }

    async fn get_plan(&self, name: &str) -> QuotaResult<Option<SubscriptionPlan>> {
        Ok(self.plans.read().await.get(name).cloned())
    }

    async fn put_plan(&self, plan: SubscriptionPlan) -> QuotaResult<()> {
        self.plans.write().await.insert(plan.name.clone(), plan);
        Ok(())
    }

    async fn put_assignment(&self, assignment: PlanAssignment) -> QuotaResult<()> {
        let mut assignments = self.assignments.write().await;
        let held = assignments.entry(assignment.user_id.clone()).or_default();
        held.retain(|a| a.plan != assignment.plan);
        held.push(assignment);
        Ok(())
    }

    async fn delete_assignment(&self, user_id: &str, plan: &str) -> QuotaResult<bool> {
        let mut assignments = self.assignments.write().await;
        let Some(held) = assignments.get_mut(user_id) else {
            return Ok(false);
        };
        let before = held.len();
        held.retain(|a| a.plan != plan);
        let removed = held.len() != before;
        if held.is_empty() {
            assignments.remove(user_id);
        }
        Ok(removed)
    }

    async fn assignments(&self, user_id: &str) -> QuotaResult<Vec<PlanAssignment>> {
        Ok(self
            .assignments
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_usage(&self, key: &UsageKey) -> QuotaResult<Option<UsageRecord>> {
        Ok(self.usage.read().await.get(key).cloned())
    }

    async fn consume_if_within(
        &self,
        key: &UsageKey,
        amount: u64,
        limit: QuotaLimit,
        period: ResetPeriod,
        now: DateTime<Utc>,
    ) -> QuotaResult<ConsumeOutcome> {
        // Single write-lock acquisition: roll, check and increment cannot interleave.
        let mut usage = self.usage.write().await;
        let record = usage
            .entry(key.clone())
            .or_insert_with(|| UsageRecord::new(key, period, now));

        let rolled = record.roll_if_elapsed(period, now);
        let allowed = limit.allows(record.consumed, amount);
        if allowed {
            record.consumed = record.consumed.saturating_add(amount);
        }

        Ok(ConsumeOutcome {
            allowed,
            record: record.clone(),
            rolled,
        })
    }

    async fn reset_usage(&self, key: &UsageKey, now: DateTime<Utc>) -> QuotaResult<u64> {
        let mut usage = self.usage.write().await;
        let record = usage
            .entry(key.clone())
            .or_insert_with(|| UsageRecord::new(key, ResetPeriod::None, now));
        let previous = record.consumed;
        record.consumed = 0;
        record.window_start = now;
        record.last_reset = now;
        Ok(previous)
    }

    async fn list_usage(&self) -> QuotaResult<Vec<UsageRecord>> {
        Ok(self.usage.read().await.values().cloned().collect())
    }
}
