// Prometheus metrics for quota resolution and usage tracking
//
// Exposed on the admin server's /metrics endpoint:
// - Consumption attempts by feature and outcome (counter)
// - Resolutions by winning source (counter)
// - Usage resets by cause (counter)
// - Administrative actions (counter)
// - Storage failures (counter)
// - Resolve latency (histogram)
//
// The registry is owned by a `QuotaMetrics` value created at startup and
// shared by reference; nothing is registered globally.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::quota::types::QuotaSource;

/// Quota service metrics
#[derive(Clone)]
pub struct QuotaMetrics {
    registry: Registry,
    consumes_total: IntCounterVec,
    resolutions_total: IntCounterVec,
    usage_resets_total: IntCounterVec,
    admin_actions_total: IntCounterVec,
    storage_errors_total: IntCounter,
    resolve_duration_seconds: Histogram,
}

impl std::fmt::Debug for QuotaMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaMetrics")
            .field("storage_errors_total", &self.storage_errors_total.get())
            .finish_non_exhaustive()
    }
}

impl QuotaMetrics {
    /// Create and register every metric in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let consumes_total = IntCounterVec::new(
            Opts::new("quota_consumes_total", "Consumption attempts by outcome"),
            &["feature", "outcome"],
        )?;
        let resolutions_total = IntCounterVec::new(
            Opts::new(
                "quota_resolutions_total",
                "Effective quota resolutions by winning source",
            ),
            &["source"],
        )?;
        let usage_resets_total = IntCounterVec::new(
            Opts::new("quota_usage_resets_total", "Usage counter resets by cause"),
            &["cause"],
        )?;
        let admin_actions_total = IntCounterVec::new(
            Opts::new("quota_admin_actions_total", "Administrative quota actions"),
            &["action"],
        )?;
        let storage_errors_total = IntCounter::new(
            "quota_storage_errors_total",
            "Storage collaborator failures",
        )?;
        let resolve_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "quota_resolve_duration_seconds",
            "Time spent resolving an effective quota",
        ))?;

        registry.register(Box::new(consumes_total.clone()))?;
        registry.register(Box::new(resolutions_total.clone()))?;
        registry.register(Box::new(usage_resets_total.clone()))?;
        registry.register(Box::new(admin_actions_total.clone()))?;
        registry.register(Box::new(storage_errors_total.clone()))?;
        registry.register(Box::new(resolve_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            consumes_total,
            resolutions_total,
            usage_resets_total,
            admin_actions_total,
            storage_errors_total,
            resolve_duration_seconds,
        })
    }

    pub fn record_consume(&self, feature: &str, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.consumes_total
            .with_label_values(&[feature, outcome])
            .inc();
    }

    pub fn record_resolution(&self, source: QuotaSource, elapsed: Duration) {
        self.resolutions_total
            .with_label_values(&[source.as_str()])
            .inc();
        self.resolve_duration_seconds.observe(elapsed.as_secs_f64());
    }

    /// `cause` is `window` for lazy rollovers and `admin` for explicit resets
    pub fn record_reset(&self, cause: &str) {
        self.usage_resets_total.with_label_values(&[cause]).inc();
    }

    pub fn record_admin_action(&self, action: &str) {
        self.admin_actions_total.with_label_values(&[action]).inc();
    }

    pub fn record_storage_error(&self) {
        self.storage_errors_total.inc();
    }

    pub fn consumes(&self, feature: &str, allowed: bool) -> u64 {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.consumes_total
            .with_label_values(&[feature, outcome])
            .get()
    }

    pub fn storage_errors(&self) -> u64 {
        self.storage_errors_total.get()
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
        String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
    }
}
