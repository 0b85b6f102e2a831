// Configuration File Support
//
// This module provides configuration file parsing for the quota service.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/quotad/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::{LogFormat, LogLevel};
use crate::quota::cache::MAX_PLAN_CACHE_TTL;
use crate::quota::{FeatureSpec, GuestQuota, QuotaLimit, ResetPeriod, SubscriptionPlan};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Admin HTTP server configuration
    pub server: ServerConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Plan lookup cache configuration
    pub cache: CacheConfig,

    /// Registered features and their system defaults
    pub features: Vec<FeatureSpec>,

    /// Global guest defaults seeded at startup
    pub guest_quotas: Vec<GuestQuota>,

    /// Subscription plan catalog seeded at startup
    pub plans: Vec<SubscriptionPlan>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Admin server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the admin API to
    pub bind_address: String,

    /// Port for the admin API
    pub port: u16,

    /// Admin actions kept in the audit log
    pub audit_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            audit_capacity: crate::quota::audit::DEFAULT_AUDIT_CAPACITY,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to expose /metrics on the admin server
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Plan cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds a plan lookup stays cached (0 disables caching)
    pub plan_ttl_secs: u64,

    /// Maximum cached (user, feature) lookups
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            plan_ttl_secs: 300,
            max_entries: 10_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            metrics: MetricsConfig::default(),
            cache: CacheConfig::default(),
            features: default_features(),
            guest_quotas: Vec::new(),
            plans: Vec::new(),
        }
    }
}

fn default_features() -> Vec<FeatureSpec> {
    vec![
        FeatureSpec {
            key: "image-generation".to_string(),
            display_name: Some("Image generation".to_string()),
            default_limit: QuotaLimit::Limited(5),
            default_period: ResetPeriod::Daily,
        },
        FeatureSpec {
            key: "og-image".to_string(),
            display_name: Some("Social preview images".to_string()),
            default_limit: QuotaLimit::Limited(20),
            default_period: ResetPeriod::Daily,
        },
    ]
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. If the config file does not exist, returns default
    /// configuration with environment overrides applied.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            let config = Self::default().apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        let config = config.apply_env_overrides();
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/quotad/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "quotad", "quotad") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("quotad")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - QUOTAD_LOG_LEVEL
    /// - QUOTAD_LOG_FORMAT
    /// - QUOTAD_ADMIN_PORT
    /// - QUOTAD_METRICS_ENABLED
    /// - QUOTAD_PLAN_CACHE_TTL_SECS
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("QUOTAD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("QUOTAD_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(port) = std::env::var("QUOTAD_ADMIN_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                if port > 0 {
                    self.server.port = port;
                }
            }
        }

        if let Ok(enabled) = std::env::var("QUOTAD_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }

        if let Ok(ttl) = std::env::var("QUOTAD_PLAN_CACHE_TTL_SECS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.cache.plan_ttl_secs = ttl;
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        self.log_level()?;
        self.log_format()?;

        if self.server.port == 0 {
            anyhow::bail!("Admin server port must be > 0");
        }
        if self.server.audit_capacity == 0 {
            anyhow::bail!("Audit capacity must be > 0");
        }
        if self.cache.plan_ttl_secs > MAX_PLAN_CACHE_TTL.as_secs() {
            anyhow::bail!(
                "Plan cache TTL must be at most {} seconds, got {}",
                MAX_PLAN_CACHE_TTL.as_secs(),
                self.cache.plan_ttl_secs
            );
        }

        let mut keys = HashSet::new();
        for feature in &self.features {
            if feature.key.trim().is_empty() {
                anyhow::bail!("Feature with empty key");
            }
            if !keys.insert(feature.key.as_str()) {
                anyhow::bail!("Feature '{}' is defined more than once", feature.key);
            }
        }

        let mut guest_features = HashSet::new();
        for quota in &self.guest_quotas {
            if !keys.contains(quota.feature.as_str()) {
                anyhow::bail!("Guest quota references unknown feature '{}'", quota.feature);
            }
            if !guest_features.insert(quota.feature.as_str()) {
                anyhow::bail!("Guest quota for '{}' is defined more than once", quota.feature);
            }
        }

        let mut plan_names = HashSet::new();
        for plan in &self.plans {
            if plan.name.trim().is_empty() {
                anyhow::bail!("Subscription plan with empty name");
            }
            if !plan_names.insert(plan.name.as_str()) {
                anyhow::bail!("Subscription plan '{}' is defined more than once", plan.name);
            }
            for feature in plan.features.keys() {
                if !keys.contains(feature.as_str()) {
                    anyhow::bail!(
                        "Plan '{}' references unknown feature '{}'",
                        plan.name,
                        feature
                    );
                }
            }
        }

        Ok(())
    }

    /// Parsed log level
    pub fn log_level(&self) -> Result<LogLevel> {
        self.logging.level.parse().map_err(|e| {
            anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error ({})",
                self.logging.level,
                e
            )
        })
    }

    /// Parsed log format
    pub fn log_format(&self) -> Result<LogFormat> {
        self.logging.format.parse().map_err(|e| {
            anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: json, pretty, compact ({})",
                self.logging.format,
                e
            )
        })
    }

    /// Plan cache time-to-live
    pub fn plan_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache.plan_ttl_secs)
    }
}
