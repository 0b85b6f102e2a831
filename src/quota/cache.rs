//! Plan Lookup Cache
//!
//! Caches the subscription-plan definition resolved for a (user, feature)
//! pair. Backed by `moka::sync::Cache` for capacity-bounded storage and
//! wall-clock expiry; each entry additionally carries a `valid_until`
//! instant checked against the service clock, so a cached plan never
//! outlives the earliest `expires_at` of the assignments it was built from.
//!
//! Invalidation bumps a generation counter. A fill that started before an
//! invalidation drops its own entry again, so a slow lookup cannot re-cache
//! a plan that was just assigned or revoked.

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::types::QuotaDefinition;

/// Longest accepted time-to-live for cached plan lookups
pub const MAX_PLAN_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

type PlanKey = (String, String);

#[derive(Debug, Clone)]
struct CachedPlan {
    definition: Option<QuotaDefinition>,
    /// Service-clock instant after which the entry is stale
    valid_until: DateTime<Utc>,
    /// Wall-clock lifetime handed to moka
    lifetime: Duration,
}

/// Per-entry lifetime, capped by the entry's own validity
struct PlanExpiry;

impl Expiry<PlanKey, CachedPlan> for PlanExpiry {
    fn expire_after_create(
        &self,
        _key: &PlanKey,
        value: &CachedPlan,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.lifetime)
    }

    fn expire_after_update(
        &self,
        _key: &PlanKey,
        value: &CachedPlan,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.lifetime)
    }
}

/// Cache of plan lookups keyed by (user id, feature)
pub struct PlanCache {
    entries: Option<Cache<PlanKey, CachedPlan>>,
    ttl: Duration,
    generation: AtomicU64,
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCache")
            .field("enabled", &self.entries.is_some())
            .field("ttl", &self.ttl)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

impl PlanCache {
    /// Create a cache; a zero `ttl` or `max_entries` disables caching.
    /// `ttl` is clamped to [`MAX_PLAN_CACHE_TTL`].
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let ttl = ttl.min(MAX_PLAN_CACHE_TTL);
        let entries = (!ttl.is_zero() && max_entries > 0).then(|| {
            Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .expire_after(PlanExpiry)
                .support_invalidation_closures()
                .build()
        });

        Self {
            entries,
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    /// Cache that never stores anything
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Token to pass to [`fill`](Self::fill) for a lookup starting now
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cached definition, `None` on a miss or once `now` reaches the entry's validity bound
    pub fn get(
        &self,
        user_id: &str,
        feature: &str,
        now: DateTime<Utc>,
    ) -> Option<Option<QuotaDefinition>> {
        let entries = self.entries.as_ref()?;
        let key = (user_id.to_string(), feature.to_string());
        let cached = entries.get(&key)?;
        if now < cached.valid_until {
            Some(cached.definition)
        } else {
            entries.invalidate(&key);
            None
        }
    }

    /// Store a lookup result.
    ///
    /// `expires_at` bounds the entry's validity (the earliest assignment
    /// expiry that fed the result). Nothing is stored if the result is
    /// already stale, and the entry is dropped again if an invalidation ran
    /// since `generation` was taken.
    pub fn fill(
        &self,
        user_id: &str,
        feature: &str,
        definition: Option<QuotaDefinition>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        generation: u64,
    ) {
        let Some(entries) = self.entries.as_ref() else {
            return;
        };

        let ttl_bound = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let valid_until = expires_at.map_or(ttl_bound, |expires| expires.min(ttl_bound));

        let lifetime = match (valid_until - now).to_std() {
            Ok(lifetime) if !lifetime.is_zero() => lifetime.min(self.ttl),
            _ => return,
        };

        let key = (user_id.to_string(), feature.to_string());
        entries.insert(
            key.clone(),
            CachedPlan {
                definition,
                valid_until,
                lifetime,
            },
        );

        if self.generation() != generation {
            entries.invalidate(&key);
        }
    }

    /// Drop every cached lookup for a user
    pub fn invalidate_user(&self, user_id: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let Some(entries) = self.entries.as_ref() else {
            return;
        };

        let user_id = user_id.to_string();
        if entries
            .invalidate_entries_if(move |(user, _), _| *user == user_id)
            .is_err()
        {
            entries.invalidate_all();
        }
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(entries) = self.entries.as_ref() {
            entries.invalidate_all();
        }
    }

    /// Approximate number of cached lookups
    pub fn entry_count(&self) -> u64 {
        self.entries.as_ref().map_or(0, |entries| {
            entries.run_pending_tasks();
            entries.entry_count()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::period::ResetPeriod;
    use crate::quota::types::{QuotaLimit, QuotaSource, Subject};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn definition(limit: u64) -> Option<QuotaDefinition> {
        Some(QuotaDefinition {
            subject: Some(Subject::user("u1")),
            feature: "x".to_string(),
            limit: QuotaLimit::Limited(limit),
            period: ResetPeriod::Daily,
            source: QuotaSource::SubscriptionPlan,
        })
    }

    fn cache() -> PlanCache {
        PlanCache::new(Duration::from_secs(60), 100)
    }

    #[test]
    fn test_entry_served_until_ttl() {
        let cache = cache();
        cache.fill("u1", "x", definition(5), None, t0(), cache.generation());

        assert_eq!(
            cache.get("u1", "x", t0() + chrono::Duration::seconds(59)),
            Some(definition(5))
        );
        assert_eq!(cache.get("u1", "x", t0() + chrono::Duration::seconds(60)), None);
    }

    #[test]
    fn test_entry_capped_at_assignment_expiry() {
        let cache = cache();
        let expires = t0() + chrono::Duration::seconds(10);
        cache.fill("u1", "x", definition(5), Some(expires), t0(), cache.generation());

        assert!(cache.get("u1", "x", expires - chrono::Duration::seconds(1)).is_some());
        assert_eq!(cache.get("u1", "x", expires), None);
    }

    #[test]
    fn test_already_expired_result_not_stored() {
        let cache = cache();
        cache.fill("u1", "x", definition(5), Some(t0()), t0(), cache.generation());
        assert_eq!(cache.get("u1", "x", t0()), None);
    }

    #[test]
    fn test_negative_result_is_cached() {
        let cache = cache();
        cache.fill("u1", "x", None, None, t0(), cache.generation());
        assert_eq!(cache.get("u1", "x", t0()), Some(None));
    }

    #[test]
    fn test_invalidate_user_only_touches_that_user() {
        let cache = cache();
        let generation = cache.generation();
        cache.fill("u1", "x", definition(1), None, t0(), generation);
        cache.fill("u1", "y", definition(2), None, t0(), generation);
        cache.fill("u2", "x", definition(3), None, t0(), generation);

        cache.invalidate_user("u1");
        assert_eq!(cache.get("u1", "x", t0()), None);
        assert_eq!(cache.get("u1", "y", t0()), None);
        assert_eq!(cache.get("u2", "x", t0()), Some(definition(3)));
    }

    #[test]
    fn test_fill_after_invalidation_is_dropped() {
        let cache = cache();
        let generation = cache.generation();

        // lookup started, then an assignment changed before the result landed
        cache.invalidate_user("u1");
        cache.fill("u1", "x", definition(5), None, t0(), generation);

        assert_eq!(cache.get("u1", "x", t0()), None);
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let cache = PlanCache::new(Duration::from_secs(u64::MAX), 10);
        cache.fill("u1", "x", definition(5), None, t0(), cache.generation());
        assert!(cache.get("u1", "x", t0()).is_some());
        assert_eq!(
            cache.get("u1", "x", t0() + chrono::Duration::from_std(MAX_PLAN_CACHE_TTL).unwrap()),
            None
        );
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = PlanCache::new(Duration::ZERO, 10);
        assert!(!cache.is_enabled());
        cache.fill("u1", "x", definition(5), None, t0(), cache.generation());
        assert_eq!(cache.get("u1", "x", t0()), None);
        assert_eq!(cache.entry_count(), 0);
    }
}
