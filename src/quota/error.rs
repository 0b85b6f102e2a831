//! Quota Error Types
//!
//! This module defines all error types that can occur during quota
//! resolution and usage tracking.

/// Error types for quota operations
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// Feature key is not registered
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    /// Consumption denied because the effective limit is reached
    #[error("Quota exceeded for {feature}: {consumed}/{limit} consumed")]
    QuotaExceeded {
        feature: String,
        consumed: u64,
        limit: u64,
    },

    /// Storage collaborator could not serve the request
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Not even the system default produced a definition
    #[error("No default quota configured for feature: {0}")]
    NoDefaultQuota(String),

    /// Subject identifier could not be parsed or is empty
    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    /// Consumption amount must be positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(u64),

    /// Limit value could not be interpreted
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    /// Feature definition is malformed or registered twice
    #[error("Invalid feature definition: {0}")]
    InvalidFeature(String),

    /// Subscription plan is not in the catalog
    #[error("Unknown subscription plan: {0}")]
    UnknownPlan(String),
}

impl QuotaError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, QuotaError::StorageUnavailable(_))
    }

    /// Whether the error signals a broken configuration rather than a bad request
    pub fn is_fatal(&self) -> bool {
        matches!(self, QuotaError::NoDefaultQuota(_))
    }
}

/// Result alias for quota operations
pub type QuotaResult<T> = std::result::Result<T, QuotaError>;
