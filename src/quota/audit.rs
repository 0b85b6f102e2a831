//! Admin Audit Trail
//!
//! Bounded in-memory log of administrative quota actions. Usage resets keep
//! the consumption they discarded so they can be reviewed later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::Subject;

/// Entries kept before the oldest are dropped
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// Kind of administrative action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminActionKind {
    OverrideSet,
    OverrideRemoved,
    UsageReset,
    GuestDefaultSet,
    GuestDefaultRemoved,
    PlanAssigned,
    PlanRevoked,
}

impl AdminActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AdminActionKind::OverrideSet => "override_set",
            AdminActionKind::OverrideRemoved => "override_removed",
            AdminActionKind::UsageReset => "usage_reset",
            AdminActionKind::GuestDefaultSet => "guest_default_set",
            AdminActionKind::GuestDefaultRemoved => "guest_default_removed",
            AdminActionKind::PlanAssigned => "plan_assigned",
            AdminActionKind::PlanRevoked => "plan_revoked",
        }
    }
}

/// One audited action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAction {
    pub id: Uuid,
    pub kind: AdminActionKind,
    pub at: DateTime<Utc>,

    /// Who performed the action, when known
    pub actor: Option<String>,
    pub subject: Option<Subject>,
    pub feature: Option<String>,
    pub reason: Option<String>,

    /// Consumption discarded by a usage reset
    pub previous_usage: Option<u64>,

    /// Free-form detail, e.g. the new limit or plan name
    pub detail: Option<String>,
}

impl AdminAction {
    pub fn new(kind: AdminActionKind, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            at,
            actor: None,
            subject: None,
            feature: None,
            reason: None,
            previous_usage: None,
            detail: None,
        }
    }

    pub fn actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn previous_usage(mut self, previous: u64) -> Self {
        self.previous_usage = Some(previous);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Bounded audit log
#[derive(Debug, Clone)]
pub struct AuditLog {
    entries: Arc<RwLock<Vec<AdminAction>>>,
    capacity: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, action: AdminAction) {
        let mut entries = self.entries.write().await;
        entries.push(action);

        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(0..excess);
        }
    }

    /// Most recent entries, newest first
    pub async fn recent(&self, limit: usize) -> Vec<AdminAction> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Entries concerning one subject, oldest first
    pub async fn for_subject(&self, subject: &Subject) -> Vec<AdminAction> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|a| a.subject.as_ref() == Some(subject))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_is_bounded() {
        let log = AuditLog::with_capacity(3);
        for i in 0..5 {
            log.record(AdminAction::new(AdminActionKind::UsageReset, Utc::now()).previous_usage(i))
                .await;
        }

        assert_eq!(log.len().await, 3);
        let recent = log.recent(10).await;
        assert_eq!(recent[0].previous_usage, Some(4));
        assert_eq!(recent[2].previous_usage, Some(2));
    }

    #[tokio::test]
    async fn test_for_subject_filters() {
        let log = AuditLog::new();
        log.record(
            AdminAction::new(AdminActionKind::OverrideSet, Utc::now())
                .subject(Subject::user("1"))
                .feature("api-calls"),
        )
        .await;
        log.record(AdminAction::new(AdminActionKind::GuestDefaultSet, Utc::now()).feature("api-calls"))
            .await;

        let entries = log.for_subject(&Subject::user("1")).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, AdminActionKind::OverrideSet);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&AdminActionKind::GuestDefaultRemoved).unwrap();
        assert_eq!(json, format!("\"{}\"", AdminActionKind::GuestDefaultRemoved.as_str()));
    }
}
