//! Quota Usage Tracker
//!
//! Enforces effective quotas by consuming against usage counters, and hosts
//! the administrative operations that change limits or counters.
//!
//! The check-then-increment happens inside a single storage call, so two
//! concurrent consumes on the same (subject, feature) can never both pass a
//! limit that only has room for one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::audit::{AdminAction, AdminActionKind, AuditLog};
use super::cache::PlanCache;
use super::error::{QuotaError, QuotaResult};
use super::period::ResetPeriod;
use super::resolver::QuotaResolver;
use super::types::{
    ConsumeResult, GuestQuota, PlanAssignment, PlanStatus, QuotaLimit, QuotaOverride, Subject,
    UsageKey,
};

fn default_true() -> bool {
    true
}

/// Who is acting and why
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminContext {
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl AdminContext {
    pub fn by(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            reason: None,
        }
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Body of an override upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub limit: QuotaLimit,
    #[serde(default)]
    pub period: ResetPeriod,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(flatten)]
    pub context: AdminContext,
}

impl OverrideRequest {
    pub fn new(limit: QuotaLimit, period: ResetPeriod) -> Self {
        Self {
            limit,
            period,
            active: true,
            context: AdminContext::default(),
        }
    }
}

/// Body of a global guest default upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDefaultRequest {
    pub limit: QuotaLimit,
    #[serde(default)]
    pub period: ResetPeriod,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(flatten)]
    pub context: AdminContext,
}

/// Body of a plan assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAssignmentRequest {
    pub plan: String,
    #[serde(default = "default_plan_status")]
    pub status: PlanStatus,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub context: AdminContext,
}

fn default_plan_status() -> PlanStatus {
    PlanStatus::Active
}

/// Usage tracker and admin operations
#[derive(Debug, Clone)]
pub struct UsageTracker {
    resolver: QuotaResolver,
    plan_cache: Arc<PlanCache>,
    audit: AuditLog,
}

impl UsageTracker {
    /// `plan_cache` must be the cache shared with the resolver's plan provider
    pub fn new(resolver: QuotaResolver, plan_cache: Arc<PlanCache>, audit: AuditLog) -> Self {
        Self {
            resolver,
            plan_cache,
            audit,
        }
    }

    pub fn resolver(&self) -> &QuotaResolver {
        &self.resolver
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn now(&self) -> DateTime<Utc> {
        self.resolver.clock().now()
    }

    async fn audit_action(&self, action: AdminAction) {
        self.resolver
            .metrics()
            .record_admin_action(action.kind.as_str());
        self.audit.record(action).await;
    }

    /// Consume `amount` units if the effective limit allows it
    pub async fn try_consume(
        &self,
        subject: &Subject,
        feature: &str,
        amount: u64,
    ) -> QuotaResult<ConsumeResult> {
        if amount == 0 {
            return Err(QuotaError::InvalidAmount(amount));
        }

        // one instant for plan currency and window rollover
        let now = self.now();
        let definition = self
            .resolver
            .resolve_definition_at(subject, feature, now)
            .await?;
        let key = UsageKey::new(subject.clone(), feature);

        let outcome = self.resolver.observe(
            self.resolver
                .storage()
                .consume_if_within(&key, amount, definition.limit, definition.period, now)
                .await,
        )?;

        let metrics = self.resolver.metrics();
        if outcome.rolled {
            metrics.record_reset("window");
            debug!(subject = %subject, feature, "Usage window rolled over");
        }
        metrics.record_consume(feature, outcome.allowed);

        let consumed = outcome.record.consumed;
        if !outcome.allowed {
            debug!(
                subject = %subject,
                feature,
                consumed,
                amount,
                limit = %definition.limit,
                "Quota denied"
            );
        }

        Ok(ConsumeResult {
            allowed: outcome.allowed,
            consumed,
            remaining: definition.limit.remaining(consumed),
            limit: definition.limit,
            source: definition.source,
            reset_at: definition.period.next_reset(outcome.record.last_reset),
        })
    }

    /// Like [`try_consume`](Self::try_consume), but a denial is an error
    pub async fn consume_or_deny(
        &self,
        subject: &Subject,
        feature: &str,
        amount: u64,
    ) -> QuotaResult<ConsumeResult> {
        let result = self.try_consume(subject, feature, amount).await?;
        if result.allowed {
            Ok(result)
        } else {
            Err(QuotaError::QuotaExceeded {
                feature: feature.to_string(),
                consumed: result.consumed,
                limit: result.limit.value().unwrap_or(u64::MAX),
            })
        }
    }

    /// Zero the counter and restart its window; returns the discarded count
    pub async fn reset_usage(
        &self,
        subject: &Subject,
        feature: &str,
        context: AdminContext,
    ) -> QuotaResult<u64> {
        self.resolver.registry().require(feature)?;
        let now = self.now();
        let key = UsageKey::new(subject.clone(), feature);
        let previous = self
            .resolver
            .observe(self.resolver.storage().reset_usage(&key, now).await)?;

        self.resolver.metrics().record_reset("admin");
        info!(
            subject = %subject,
            feature,
            previous,
            actor = context.actor.as_deref().unwrap_or("unknown"),
            "Usage reset"
        );
        self.audit_action(
            AdminAction::new(AdminActionKind::UsageReset, now)
                .subject(subject.clone())
                .feature(feature)
                .actor(context.actor)
                .reason(context.reason)
                .previous_usage(previous),
        )
        .await;

        Ok(previous)
    }

    /// Upsert a per-subject override; usage counters are left untouched
    pub async fn set_override(
        &self,
        subject: &Subject,
        feature: &str,
        request: OverrideRequest,
    ) -> QuotaResult<QuotaOverride> {
        self.resolver.registry().require(feature)?;
        let now = self.now();
        let record = QuotaOverride {
            subject: subject.clone(),
            feature: feature.to_string(),
            limit: request.limit,
            period: request.period,
            reason: request.context.reason.clone(),
            created_by: request.context.actor.clone(),
            active: request.active,
            updated_at: now,
        };

        let previous = self
            .resolver
            .observe(self.resolver.storage().put_override(record.clone()).await)?;

        info!(
            subject = %subject,
            feature,
            limit = %record.limit,
            period = %record.period,
            replaced = previous.is_some(),
            "Quota override set"
        );
        self.audit_action(
            AdminAction::new(AdminActionKind::OverrideSet, now)
                .subject(subject.clone())
                .feature(feature)
                .actor(request.context.actor)
                .reason(request.context.reason)
                .detail(format!("limit={} period={}", record.limit, record.period)),
        )
        .await;

        Ok(record)
    }

    /// Delete an override; returns whether one existed
    pub async fn remove_override(
        &self,
        subject: &Subject,
        feature: &str,
        context: AdminContext,
    ) -> QuotaResult<bool> {
        let removed = self
            .resolver
            .observe(self.resolver.storage().delete_override(subject, feature).await)?;

        if removed.is_some() {
            info!(subject = %subject, feature, "Quota override removed");
            self.audit_action(
                AdminAction::new(AdminActionKind::OverrideRemoved, self.now())
                    .subject(subject.clone())
                    .feature(feature)
                    .actor(context.actor)
                    .reason(context.reason),
            )
            .await;
        }

        Ok(removed.is_some())
    }

    pub async fn list_overrides(&self, subject: &Subject) -> QuotaResult<Vec<QuotaOverride>> {
        self.resolver
            .observe(self.resolver.storage().list_overrides(subject).await)
    }

    /// Upsert the limit every guest gets for a feature
    pub async fn set_guest_default(
        &self,
        feature: &str,
        request: GuestDefaultRequest,
    ) -> QuotaResult<GuestQuota> {
        self.resolver.registry().require(feature)?;
        let quota = GuestQuota {
            feature: feature.to_string(),
            limit: request.limit,
            period: request.period,
            description: request.description,
            active: request.active,
        };

        self.resolver
            .observe(self.resolver.storage().put_guest_quota(quota.clone()).await)?;

        info!(feature, limit = %quota.limit, period = %quota.period, "Guest default set");
        self.audit_action(
            AdminAction::new(AdminActionKind::GuestDefaultSet, self.now())
                .feature(feature)
                .actor(request.context.actor)
                .reason(request.context.reason)
                .detail(format!("limit={} period={}", quota.limit, quota.period)),
        )
        .await;

        Ok(quota)
    }

    pub async fn remove_guest_default(
        &self,
        feature: &str,
        context: AdminContext,
    ) -> QuotaResult<bool> {
        let removed = self
            .resolver
            .observe(self.resolver.storage().delete_guest_quota(feature).await)?;

        if removed.is_some() {
            info!(feature, "Guest default removed");
            self.audit_action(
                AdminAction::new(AdminActionKind::GuestDefaultRemoved, self.now())
                    .feature(feature)
                    .actor(context.actor)
                    .reason(context.reason),
            )
            .await;
        }

        Ok(removed.is_some())
    }

    pub async fn list_guest_defaults(&self) -> QuotaResult<Vec<GuestQuota>> {
        self.resolver
            .observe(self.resolver.storage().list_guest_quotas().await)
    }

    /// Grant a catalog plan to a user
    pub async fn assign_plan(
        &self,
        user_id: &str,
        request: PlanAssignmentRequest,
    ) -> QuotaResult<PlanAssignment> {
        if user_id.trim().is_empty() {
            return Err(QuotaError::InvalidSubject(user_id.to_string()));
        }

        let storage = self.resolver.storage();
        if self.resolver.observe(storage.get_plan(&request.plan).await)?.is_none() {
            return Err(QuotaError::UnknownPlan(request.plan));
        }

        let assignment = PlanAssignment {
            user_id: user_id.to_string(),
            plan: request.plan,
            status: request.status,
            expires_at: request.expires_at,
        };
        self.resolver
            .observe(storage.put_assignment(assignment.clone()).await)?;
        self.invalidate_plans(user_id);

        info!(user_id, plan = %assignment.plan, status = ?assignment.status, "Plan assigned");
        self.audit_action(
            AdminAction::new(AdminActionKind::PlanAssigned, self.now())
                .subject(Subject::user(user_id))
                .actor(request.context.actor)
                .reason(request.context.reason)
                .detail(assignment.plan.clone()),
        )
        .await;

        Ok(assignment)
    }

    /// Remove a user's assignment to a plan; returns whether one existed
    pub async fn revoke_plan(
        &self,
        user_id: &str,
        plan: &str,
        context: AdminContext,
    ) -> QuotaResult<bool> {
        let removed = self
            .resolver
            .observe(self.resolver.storage().delete_assignment(user_id, plan).await)?;
        self.invalidate_plans(user_id);

        if removed {
            info!(user_id, plan, "Plan revoked");
            self.audit_action(
                AdminAction::new(AdminActionKind::PlanRevoked, self.now())
                    .subject(Subject::user(user_id))
                    .actor(context.actor)
                    .reason(context.reason)
                    .detail(plan),
            )
            .await;
        }

        Ok(removed)
    }

    fn invalidate_plans(&self, user_id: &str) {
        self.plan_cache.invalidate_user(user_id);
    }
}
