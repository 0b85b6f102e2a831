//! Quota Resolver
//!
//! Computes the single effective quota for a (subject, feature) pair by
//! walking the provider chain in precedence order, then joins it with the
//! stored usage record. Resolution never writes: an expired window is
//! reported as empty without being rolled.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use super::clock::Clock;
use super::error::{QuotaError, QuotaResult};
use super::providers::QuotaProvider;
use super::registry::FeatureRegistry;
use super::store::QuotaStorage;
use super::types::{EffectiveQuota, QuotaDefinition, Subject, UsageKey, UsageRecord};
use crate::metrics::QuotaMetrics;

/// Merges provider outputs by precedence
#[derive(Debug, Clone)]
pub struct QuotaResolver {
    registry: Arc<FeatureRegistry>,
    providers: Vec<Arc<dyn QuotaProvider>>,
    storage: Arc<dyn QuotaStorage>,
    clock: Arc<dyn Clock>,
    metrics: Arc<QuotaMetrics>,
}

impl QuotaResolver {
    /// `providers` must be ordered highest precedence first
    pub fn new(
        registry: Arc<FeatureRegistry>,
        providers: Vec<Arc<dyn QuotaProvider>>,
        storage: Arc<dyn QuotaStorage>,
        clock: Arc<dyn Clock>,
        metrics: Arc<QuotaMetrics>,
    ) -> Self {
        Self {
            registry,
            providers,
            storage,
            clock,
            metrics,
        }
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn QuotaStorage> {
        &self.storage
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &Arc<QuotaMetrics> {
        &self.metrics
    }

    /// Count and log storage failures before handing them back
    pub(crate) fn observe<T>(&self, result: QuotaResult<T>) -> QuotaResult<T> {
        if let Err(err) = &result {
            if err.is_retryable() {
                self.metrics.record_storage_error();
                warn!(error = %err, "Quota storage call failed");
            }
        }
        result
    }

    /// Highest-precedence definition for the pair
    pub async fn resolve_definition(
        &self,
        subject: &Subject,
        feature: &str,
    ) -> QuotaResult<QuotaDefinition> {
        self.resolve_definition_at(subject, feature, self.clock.now())
            .await
    }

    /// Highest-precedence definition for the pair as of `now`
    pub async fn resolve_definition_at(
        &self,
        subject: &Subject,
        feature: &str,
        now: DateTime<Utc>,
    ) -> QuotaResult<QuotaDefinition> {
        let started = Instant::now();
        let spec = self.registry.require(feature)?;
        let kind = subject.kind();

        for provider in self.providers.iter().filter(|p| p.applies_to(kind)) {
            let found = self.observe(provider.lookup(subject, spec, now).await)?;
            if let Some(definition) = found {
                debug!(
                    subject = %subject,
                    feature,
                    source = %definition.source,
                    limit = %definition.limit,
                    "Resolved quota"
                );
                self.metrics
                    .record_resolution(definition.source, started.elapsed());
                return Ok(definition);
            }
        }

        error!(subject = %subject, feature, "No quota source produced a definition");
        Err(QuotaError::NoDefaultQuota(feature.to_string()))
    }

    /// Effective quota with current usage
    pub async fn resolve(&self, subject: &Subject, feature: &str) -> QuotaResult<EffectiveQuota> {
        let now = self.clock.now();
        let definition = self.resolve_definition_at(subject, feature, now).await?;
        let key = UsageKey::new(subject.clone(), feature);
        let record = self.observe(self.storage.get_usage(&key).await)?;
        Ok(effective_from(subject, &definition, record.as_ref(), now))
    }

    /// Effective quotas for every registered feature
    pub async fn resolve_all(&self, subject: &Subject) -> QuotaResult<Vec<EffectiveQuota>> {
        let mut quotas = Vec::with_capacity(self.registry.len());
        for spec in self.registry.features() {
            quotas.push(self.resolve(subject, &spec.key).await?);
        }
        Ok(quotas)
    }
}

/// Join a definition with a usage record as seen at `now`
pub fn effective_from(
    subject: &Subject,
    definition: &QuotaDefinition,
    record: Option<&UsageRecord>,
    now: DateTime<Utc>,
) -> EffectiveQuota {
    let period = definition.period;
    let (consumed, anchor) = match record {
        Some(record) if !period.has_elapsed(record.last_reset, now) => {
            (record.consumed, record.last_reset)
        }
        _ => (0, now),
    };

    EffectiveQuota {
        subject: subject.clone(),
        feature: definition.feature.clone(),
        limit: definition.limit,
        consumed,
        remaining: definition.limit.remaining(consumed),
        source: definition.source,
        period,
        reset_at: period.next_reset(anchor),
    }
}
