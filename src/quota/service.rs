//! Quota Service
//!
//! Wires the registry, storage, clock, plan cache, metrics and audit log
//! into a resolver and usage tracker.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::audit::{AuditLog, DEFAULT_AUDIT_CAPACITY};
use super::cache::PlanCache;
use super::clock::{Clock, SystemClock};
use super::dashboard::DashboardBuilder;
use super::error::QuotaResult;
use super::providers::default_chain;
use super::registry::{FeatureRegistry, FeatureSpec};
use super::resolver::QuotaResolver;
use super::store::{MemoryStore, QuotaStorage};
use super::tracker::UsageTracker;
use super::types::{GuestQuota, SubscriptionPlan};
use crate::config::Config;
use crate::metrics::QuotaMetrics;

/// Tunables for a service instance
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub plan_cache_ttl: Duration,
    pub plan_cache_max_entries: u64,
    pub audit_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            plan_cache_ttl: Duration::from_secs(300),
            plan_cache_max_entries: 10_000,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

/// Quota resolution and usage tracking
#[derive(Debug, Clone)]
pub struct QuotaService {
    tracker: UsageTracker,
}

impl QuotaService {
    pub fn new(
        registry: FeatureRegistry,
        storage: Arc<dyn QuotaStorage>,
        clock: Arc<dyn Clock>,
        metrics: Arc<QuotaMetrics>,
        options: ServiceOptions,
    ) -> Self {
        let plan_cache = Arc::new(PlanCache::new(
            options.plan_cache_ttl,
            options.plan_cache_max_entries,
        ));
        let resolver = QuotaResolver::new(
            Arc::new(registry),
            default_chain(Arc::clone(&storage), Arc::clone(&plan_cache)),
            storage,
            clock,
            metrics,
        );
        let audit = AuditLog::with_capacity(options.audit_capacity);

        Self {
            tracker: UsageTracker::new(resolver, plan_cache, audit),
        }
    }

    /// In-memory service on the system clock
    pub fn in_memory(features: Vec<FeatureSpec>) -> Result<Self> {
        let registry = FeatureRegistry::from_specs(features)?;
        let metrics = QuotaMetrics::new().context("Failed to register quota metrics")?;
        Ok(Self::new(
            registry,
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            Arc::new(metrics),
            ServiceOptions::default(),
        ))
    }

    /// Build an in-memory service from configuration and seed its catalog
    pub async fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let registry = FeatureRegistry::from_specs(config.features.clone())
            .context("Invalid feature registry")?;
        let metrics = QuotaMetrics::new().context("Failed to register quota metrics")?;
        let options = ServiceOptions {
            plan_cache_ttl: config.plan_cache_ttl(),
            plan_cache_max_entries: config.cache.max_entries,
            audit_capacity: config.server.audit_capacity,
        };

        let service = Self::new(
            registry,
            Arc::new(MemoryStore::new()),
            clock,
            Arc::new(metrics),
            options,
        );
        service
            .seed(config.guest_quotas.clone(), config.plans.clone())
            .await
            .context("Failed to seed quota catalog")?;

        info!(
            features = service.resolver().registry().len(),
            guest_quotas = config.guest_quotas.len(),
            plans = config.plans.len(),
            "Quota service ready"
        );
        Ok(service)
    }

    /// Store guest defaults and plans directly, bypassing the audit log
    pub async fn seed(
        &self,
        guest_quotas: Vec<GuestQuota>,
        plans: Vec<SubscriptionPlan>,
    ) -> QuotaResult<()> {
        let storage = self.resolver().storage();
        for quota in guest_quotas {
            self.resolver().registry().require(&quota.feature)?;
            storage.put_guest_quota(quota).await?;
        }
        for plan in plans {
            storage.put_plan(plan).await?;
        }
        Ok(())
    }

    pub fn tracker(&self) -> &UsageTracker {
        &self.tracker
    }

    pub fn resolver(&self) -> &QuotaResolver {
        self.tracker.resolver()
    }

    pub fn metrics(&self) -> &Arc<QuotaMetrics> {
        self.resolver().metrics()
    }

    pub fn dashboard(&self) -> DashboardBuilder<'_> {
        DashboardBuilder::new(&self.tracker)
    }
}
