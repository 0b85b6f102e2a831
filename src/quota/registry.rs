//! Feature Registry
//!
//! The set of recognized feature keys together with their system-default
//! limits. Every registered feature has a system default, which keeps the
//! bottom of the precedence chain total.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::{QuotaError, QuotaResult};
use super::period::ResetPeriod;
use super::types::{QuotaDefinition, QuotaLimit, QuotaSource};

/// A registered feature and its system default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Feature key, e.g. `image-generation`
    pub key: String,

    /// Human readable name for admin views
    #[serde(default)]
    pub display_name: Option<String>,

    /// System default limit
    pub default_limit: QuotaLimit,

    /// System default reset period
    #[serde(default)]
    pub default_period: ResetPeriod,
}

impl FeatureSpec {
    pub fn new(key: impl Into<String>, default_limit: QuotaLimit, default_period: ResetPeriod) -> Self {
        Self {
            key: key.into(),
            display_name: None,
            default_limit,
            default_period,
        }
    }

    /// The system-default definition for this feature
    pub fn system_default(&self) -> QuotaDefinition {
        QuotaDefinition {
            subject: None,
            feature: self.key.clone(),
            limit: self.default_limit,
            period: self.default_period,
            source: QuotaSource::SystemDefault,
        }
    }
}

/// Recognized features, ordered by key
#[derive(Debug, Clone, Default)]
pub struct FeatureRegistry {
    features: BTreeMap<String, FeatureSpec>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, rejecting empty or duplicate keys
    pub fn from_specs(specs: impl IntoIterator<Item = FeatureSpec>) -> QuotaResult<Self> {
        let mut registry = Self::new();
        for spec in specs {
            if spec.key.trim().is_empty() {
                return Err(QuotaError::InvalidFeature("empty feature key".to_string()));
            }
            if registry.features.contains_key(&spec.key) {
                return Err(QuotaError::InvalidFeature(format!(
                    "{} registered twice",
                    spec.key
                )));
            }
            registry.features.insert(spec.key.clone(), spec);
        }
        Ok(registry)
    }

    /// Register or replace a feature
    pub fn register(&mut self, spec: FeatureSpec) {
        self.features.insert(spec.key.clone(), spec);
    }

    pub fn get(&self, key: &str) -> Option<&FeatureSpec> {
        self.features.get(key)
    }

    /// Look up a feature, failing with `UnknownFeature`
    pub fn require(&self, key: &str) -> QuotaResult<&FeatureSpec> {
        self.get(key)
            .ok_or_else(|| QuotaError::UnknownFeature(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.features.contains_key(key)
    }

    pub fn features(&self) -> impl Iterator<Item = &FeatureSpec> {
        self.features.values()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_unknown_feature() {
        let registry = FeatureRegistry::new();
        let err = registry.require("api-calls").unwrap_err();
        assert!(matches!(err, QuotaError::UnknownFeature(key) if key == "api-calls"));
    }

    #[test]
    fn test_from_specs_rejects_duplicates() {
        let specs = vec![
            FeatureSpec::new("api-calls", QuotaLimit::Limited(10), ResetPeriod::Daily),
            FeatureSpec::new("api-calls", QuotaLimit::Limited(20), ResetPeriod::Daily),
        ];
        assert!(FeatureRegistry::from_specs(specs).is_err());
    }

    #[test]
    fn test_system_default_definition() {
        let spec = FeatureSpec::new("image-generation", QuotaLimit::Limited(5), ResetPeriod::Monthly);
        let definition = spec.system_default();
        assert_eq!(definition.source, QuotaSource::SystemDefault);
        assert_eq!(definition.limit, QuotaLimit::Limited(5));
        assert_eq!(definition.period, ResetPeriod::Monthly);
        assert!(definition.subject.is_none());
    }

    #[test]
    fn test_features_are_ordered() {
        let registry = FeatureRegistry::from_specs(vec![
            FeatureSpec::new("b", QuotaLimit::Limited(1), ResetPeriod::Daily),
            FeatureSpec::new("a", QuotaLimit::Limited(1), ResetPeriod::Daily),
        ])
        .unwrap();
        let keys: Vec<&str> = registry.features().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
