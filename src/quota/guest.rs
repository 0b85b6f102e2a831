//! Guest identity
//!
//! Unauthenticated visitors are keyed by a digest of what the edge knows
//! about them: client IP, device fingerprint and user agent. The same
//! device on the same address always maps to the same guest subject.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{QuotaError, QuotaResult};
use super::types::Subject;

/// Hex characters of the digest kept in the guest id
const GUEST_ID_LEN: usize = 32;

/// Request attributes identifying an anonymous visitor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestIdentity {
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl GuestIdentity {
    pub fn new(
        client_ip: Option<String>,
        fingerprint: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            client_ip,
            fingerprint,
            user_agent,
        }
    }

    /// Digest of the user agent, as stored alongside guest records
    pub fn user_agent_hash(&self) -> Option<String> {
        present(&self.user_agent).map(sha256_hex)
    }

    /// Stable guest subject; fails when no attribute is present
    pub fn subject(&self) -> QuotaResult<Subject> {
        let ip = present(&self.client_ip);
        let fingerprint = present(&self.fingerprint);
        let ua_hash = self.user_agent_hash();

        if ip.is_none() && fingerprint.is_none() && ua_hash.is_none() {
            return Err(QuotaError::InvalidSubject(
                "guest identity has no attributes".to_string(),
            ));
        }

        let material = format!(
            "{}|{}|{}",
            ip.unwrap_or_default(),
            fingerprint.unwrap_or_default(),
            ua_hash.unwrap_or_default()
        );
        let mut id = sha256_hex(&material);
        id.truncate(GUEST_ID_LEN);
        Ok(Subject::guest(id))
    }
}
