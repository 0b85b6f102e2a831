//! Quota Source Providers
//!
//! Each precedence layer is a provider that may or may not have a definition
//! for a (subject, feature) pair. The resolver walks an ordered list of
//! providers and takes the first definition it finds, so precedence is data
//! rather than branching.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use super::cache::PlanCache;
use super::error::QuotaResult;
use super::registry::FeatureSpec;
use super::store::QuotaStorage;
use super::types::{QuotaDefinition, QuotaSource, Subject, SubjectKind};

/// One layer of the precedence chain
#[async_trait]
pub trait QuotaProvider: Send + Sync + std::fmt::Debug {
    /// Source tag attached to definitions from this provider
    fn source(&self) -> QuotaSource;

    /// Whether this layer is consulted for the given subject kind
    fn applies_to(&self, kind: SubjectKind) -> bool;

    /// Definition for the pair, if this layer has one
    async fn lookup(
        &self,
        subject: &Subject,
        feature: &FeatureSpec,
        now: DateTime<Utc>,
    ) -> QuotaResult<Option<QuotaDefinition>>;
}

/// Per-subject administrative overrides
#[derive(Debug)]
pub struct UserOverrideProvider {
    storage: Arc<dyn QuotaStorage>,
}

impl UserOverrideProvider {
    pub fn new(storage: Arc<dyn QuotaStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl QuotaProvider for UserOverrideProvider {
    fn source(&self) -> QuotaSource {
        QuotaSource::UserOverride
    }

    fn applies_to(&self, _kind: SubjectKind) -> bool {
        true
    }

    async fn lookup(
        &self,
        subject: &Subject,
        feature: &FeatureSpec,
        _now: DateTime<Utc>,
    ) -> QuotaResult<Option<QuotaDefinition>> {
        let record = self.storage.get_override(subject, &feature.key).await?;
        Ok(record.filter(|o| o.active).map(|o| o.definition()))
    }
}

/// Limits granted by the user's current subscription plans
#[derive(Debug)]
pub struct SubscriptionPlanProvider {
    storage: Arc<dyn QuotaStorage>,
    cache: Arc<PlanCache>,
}

impl SubscriptionPlanProvider {
    pub fn new(storage: Arc<dyn QuotaStorage>, cache: Arc<PlanCache>) -> Self {
        Self { storage, cache }
    }

    /// Winning plan definition plus the earliest expiry among the current
    /// assignments it was chosen from
    async fn load(
        &self,
        user_id: &str,
        subject: &Subject,
        feature: &FeatureSpec,
        now: DateTime<Utc>,
    ) -> QuotaResult<(Option<QuotaDefinition>, Option<DateTime<Utc>>)> {
        let mut best: Option<(i32, QuotaDefinition)> = None;
        let mut earliest_expiry: Option<DateTime<Utc>> = None;

        for assignment in self.storage.assignments(user_id).await? {
            if !assignment.is_current(now) {
                continue;
            }
            if let Some(expires_at) = assignment.expires_at {
                earliest_expiry = Some(earliest_expiry.map_or(expires_at, |e| e.min(expires_at)));
            }
            let Some(plan) = self.storage.get_plan(&assignment.plan).await? else {
                debug!(plan = %assignment.plan, user_id, "Assigned plan missing from catalog");
                continue;
            };
            let Some(entry) = plan.features.get(&feature.key) else {
                continue;
            };
            if best.as_ref().is_some_and(|(order, _)| *order >= plan.sort_order) {
                continue;
            }

            let definition = QuotaDefinition {
                subject: Some(subject.clone()),
                feature: feature.key.clone(),
                limit: entry.limit.unwrap_or(feature.default_limit),
                period: entry.period,
                source: QuotaSource::SubscriptionPlan,
            };
            best = Some((plan.sort_order, definition));
        }

        Ok((best.map(|(_, definition)| definition), earliest_expiry))
    }
}

#[async_trait]
impl QuotaProvider for SubscriptionPlanProvider {
    fn source(&self) -> QuotaSource {
        QuotaSource::SubscriptionPlan
    }

    fn applies_to(&self, kind: SubjectKind) -> bool {
        kind == SubjectKind::User
    }

    async fn lookup(
        &self,
        subject: &Subject,
        feature: &FeatureSpec,
        now: DateTime<Utc>,
    ) -> QuotaResult<Option<QuotaDefinition>> {
        let Subject::User(user_id) = subject else {
            return Ok(None);
        };

        if let Some(cached) = self.cache.get(user_id, &feature.key, now) {
            return Ok(cached);
        }

        let generation = self.cache.generation();
        let (definition, expires_at) = self.load(user_id, subject, feature, now).await?;
        self.cache.fill(
            user_id,
            &feature.key,
            definition.clone(),
            expires_at,
            now,
            generation,
        );
        Ok(definition)
    }
}

/// Limits applied to every guest
#[derive(Debug)]
pub struct GlobalGuestProvider {
    storage: Arc<dyn QuotaStorage>,
}

impl GlobalGuestProvider {
    pub fn new(storage: Arc<dyn QuotaStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl QuotaProvider for GlobalGuestProvider {
    fn source(&self) -> QuotaSource {
        QuotaSource::GlobalGuestDefault
    }

    fn applies_to(&self, kind: SubjectKind) -> bool {
        kind == SubjectKind::Guest
    }

    async fn lookup(
        &self,
        _subject: &Subject,
        feature: &FeatureSpec,
        _now: DateTime<Utc>,
    ) -> QuotaResult<Option<QuotaDefinition>> {
        let quota = self.storage.get_guest_quota(&feature.key).await?;
        Ok(quota.filter(|q| q.active).map(|q| q.definition()))
    }
}

/// Registry defaults; always has a definition for a registered feature
#[derive(Debug, Default)]
pub struct SystemDefaultProvider;

#[async_trait]
impl QuotaProvider for SystemDefaultProvider {
    fn source(&self) -> QuotaSource {
        QuotaSource::SystemDefault
    }

    fn applies_to(&self, _kind: SubjectKind) -> bool {
        true
    }

    async fn lookup(
        &self,
        _subject: &Subject,
        feature: &FeatureSpec,
        _now: DateTime<Utc>,
    ) -> QuotaResult<Option<QuotaDefinition>> {
        Ok(Some(feature.system_default()))
    }
}

/// The standard four-layer chain, highest precedence first
pub fn default_chain(
    storage: Arc<dyn QuotaStorage>,
    plan_cache: Arc<PlanCache>,
) -> Vec<Arc<dyn QuotaProvider>> {
    vec![
        Arc::new(UserOverrideProvider::new(Arc::clone(&storage))),
        Arc::new(SubscriptionPlanProvider::new(Arc::clone(&storage), plan_cache)),
        Arc::new(GlobalGuestProvider::new(storage)),
        Arc::new(SystemDefaultProvider),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::period::ResetPeriod;
    use crate::quota::store::MemoryStore;
    use crate::quota::types::{
        GuestQuota, PlanAssignment, PlanFeature, PlanStatus, QuotaLimit, SubscriptionPlan,
    };
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn cache() -> Arc<PlanCache> {
        Arc::new(PlanCache::new(std::time::Duration::from_secs(60), 100))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap()
    }

    fn feature() -> FeatureSpec {
        FeatureSpec::new("api-calls", QuotaLimit::Limited(100), ResetPeriod::Daily)
    }

    fn plan(name: &str, sort_order: i32, limit: Option<QuotaLimit>) -> SubscriptionPlan {
        let mut features = HashMap::new();
        features.insert(
            "api-calls".to_string(),
            PlanFeature {
                limit,
                period: ResetPeriod::Monthly,
            },
        );
        SubscriptionPlan {
            name: name.to_string(),
            sort_order,
            features,
        }
    }

    fn assignment(plan: &str, status: PlanStatus) -> PlanAssignment {
        PlanAssignment {
            user_id: "1".to_string(),
            plan: plan.to_string(),
            status,
            expires_at: None,
        }
    }

    fn plan_provider(store: &MemoryStore) -> SubscriptionPlanProvider {
        SubscriptionPlanProvider::new(Arc::new(store.clone()), cache())
    }

    #[tokio::test]
    async fn test_highest_sort_order_plan_wins() {
        let store = MemoryStore::new();
        store.put_plan(plan("basic", 1, Some(QuotaLimit::Limited(10)))).await.unwrap();
        store.put_plan(plan("pro", 5, Some(QuotaLimit::Limited(50)))).await.unwrap();
        store.put_assignment(assignment("basic", PlanStatus::Active)).await.unwrap();
        store.put_assignment(assignment("pro", PlanStatus::Trialing)).await.unwrap();

        let definition = plan_provider(&store)
            .lookup(&Subject::user("1"), &feature(), now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(definition.limit, QuotaLimit::Limited(50));
        assert_eq!(definition.period, ResetPeriod::Monthly);
        assert_eq!(definition.source, QuotaSource::SubscriptionPlan);
    }

    #[tokio::test]
    async fn test_plan_without_limit_uses_registry_default() {
        let store = MemoryStore::new();
        store.put_plan(plan("basic", 1, None)).await.unwrap();
        store.put_assignment(assignment("basic", PlanStatus::Active)).await.unwrap();

        let definition = plan_provider(&store)
            .lookup(&Subject::user("1"), &feature(), now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(definition.limit, QuotaLimit::Limited(100));
    }

    #[tokio::test]
    async fn test_canceled_and_expired_assignments_ignored() {
        let store = MemoryStore::new();
        store.put_plan(plan("basic", 1, Some(QuotaLimit::Limited(10)))).await.unwrap();
        store.put_plan(plan("pro", 5, Some(QuotaLimit::Limited(50)))).await.unwrap();
        store.put_assignment(assignment("basic", PlanStatus::Canceled)).await.unwrap();
        let mut pro = assignment("pro", PlanStatus::Active);
        pro.expires_at = Some(now() - Duration::hours(1));
        store.put_assignment(pro).await.unwrap();

        let definition = plan_provider(&store)
            .lookup(&Subject::user("1"), &feature(), now())
            .await
            .unwrap();
        assert!(definition.is_none());
    }

    #[tokio::test]
    async fn test_plan_lookup_is_cached_until_invalidated() {
        let store = MemoryStore::new();
        let cache = cache();
        let provider = SubscriptionPlanProvider::new(Arc::new(store.clone()), Arc::clone(&cache));

        let subject = Subject::user("1");
        assert!(provider.lookup(&subject, &feature(), now()).await.unwrap().is_none());

        store.put_plan(plan("pro", 5, Some(QuotaLimit::Limited(50)))).await.unwrap();
        store.put_assignment(assignment("pro", PlanStatus::Active)).await.unwrap();
        assert!(provider.lookup(&subject, &feature(), now()).await.unwrap().is_none());

        cache.invalidate_user("1");
        assert!(provider.lookup(&subject, &feature(), now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cached_plan_dropped_at_assignment_expiry() {
        let store = MemoryStore::new();
        let provider = plan_provider(&store);
        store.put_plan(plan("pro", 5, Some(QuotaLimit::Limited(50)))).await.unwrap();
        let mut pro = assignment("pro", PlanStatus::Active);
        pro.expires_at = Some(now() + Duration::seconds(30));
        store.put_assignment(pro).await.unwrap();

        let subject = Subject::user("1");
        let before = provider.lookup(&subject, &feature(), now()).await.unwrap();
        assert_eq!(before.unwrap().limit, QuotaLimit::Limited(50));

        let after = provider
            .lookup(&subject, &feature(), now() + Duration::seconds(30))
            .await
            .unwrap();
        assert!(after.is_none());
    }

    #[tokio::test]
    async fn test_expiry_of_losing_assignment_still_bounds_cache() {
        let store = MemoryStore::new();
        let provider = plan_provider(&store);
        store.put_plan(plan("basic", 1, Some(QuotaLimit::Limited(10)))).await.unwrap();
        store.put_plan(plan("pro", 5, Some(QuotaLimit::Limited(50)))).await.unwrap();
        store.put_assignment(assignment("basic", PlanStatus::Active)).await.unwrap();
        let mut pro = assignment("pro", PlanStatus::Active);
        pro.expires_at = Some(now() + Duration::seconds(10));
        store.put_assignment(pro).await.unwrap();

        let subject = Subject::user("1");
        let first = provider.lookup(&subject, &feature(), now()).await.unwrap().unwrap();
        assert_eq!(first.limit, QuotaLimit::Limited(50));

        let later = provider
            .lookup(&subject, &feature(), now() + Duration::seconds(11))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(later.limit, QuotaLimit::Limited(10));
    }

    #[tokio::test]
    async fn test_inactive_guest_quota_ignored() {
        let store = MemoryStore::new();
        store
            .put_guest_quota(GuestQuota {
                feature: "api-calls".to_string(),
                limit: QuotaLimit::Limited(3),
                period: ResetPeriod::Daily,
                description: None,
                active: false,
            })
            .await
            .unwrap();

        let provider = GlobalGuestProvider::new(Arc::new(store));
        let definition = provider
            .lookup(&Subject::guest("g"), &feature(), now())
            .await
            .unwrap();
        assert!(definition.is_none());
    }

    #[test]
    fn test_default_chain_order() {
        let store: Arc<dyn QuotaStorage> = Arc::new(MemoryStore::new());
        let sources: Vec<QuotaSource> = default_chain(store, cache())
            .iter()
            .map(|p| p.source())
            .collect();
        assert_eq!(sources, QuotaSource::PRECEDENCE.to_vec());
    }

    #[test]
    fn test_applicability() {
        let store: Arc<dyn QuotaStorage> = Arc::new(MemoryStore::new());
        let chain = default_chain(store, cache());
        assert!(!chain[1].applies_to(SubjectKind::Guest));
        assert!(!chain[2].applies_to(SubjectKind::User));
        assert!(chain[0].applies_to(SubjectKind::Guest));
        assert!(chain[3].applies_to(SubjectKind::User));
    }
}
