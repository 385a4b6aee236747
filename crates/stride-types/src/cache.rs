//! Response cache types for Stride.
//!
//! Cache keys are stable SHA-256 fingerprints over the full request
//! identity (provider, model, normalized prompt, parameters), so the same
//! logical request always maps to the same entry regardless of incidental
//! whitespace differences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use std::time::Duration;

/// Stable, collision-resistant fingerprint identifying a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseFingerprint(String);

impl ResponseFingerprint {
    /// Compute the fingerprint for a request.
    ///
    /// The prompt is normalized (trimmed, internal whitespace runs
    /// collapsed to single spaces) before hashing so formatting noise
    /// does not defeat deduplication.
    pub fn compute(provider: &str, model: &str, prompt: &str, params: &str) -> Self {
        let normalized = normalize_prompt(prompt);
        let mut hasher = Sha256::new();
        hasher.update(provider.as_bytes());
        hasher.update([0]);
        hasher.update(model.as_bytes());
        hasher.update([0]);
        hasher.update(normalized.as_bytes());
        hasher.update([0]);
        hasher.update(params.as_bytes());
        let digest = hasher.finalize();
        Self(hex_encode(&digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResponseFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// A single cached response, owned exclusively by the response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Serialized JSON value.
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub tags: Vec<String>,
}

impl CacheEntry {
    /// Whether this entry has outlived its TTL as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => age >= ttl,
            Err(_) => false,
        }
    }
}

/// Errors from response cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("compute failed: {reason}")]
    ComputeFailed { reason: String },

    #[error("cache store error: {reason}")]
    Store { reason: String },

    #[error("cached value could not be deserialized: {reason}")]
    Deserialization { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = ResponseFingerprint::compute("anthropic", "claude", "hello world", "{}");
        let b = ResponseFingerprint::compute("anthropic", "claude", "hello world", "{}");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_normalizes_whitespace() {
        let a = ResponseFingerprint::compute("anthropic", "claude", "hello   world", "{}");
        let b = ResponseFingerprint::compute("anthropic", "claude", "  hello world  ", "{}");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_components() {
        let base = ResponseFingerprint::compute("anthropic", "claude", "hello", "{}");
        assert_ne!(
            base,
            ResponseFingerprint::compute("groq", "claude", "hello", "{}")
        );
        assert_ne!(
            base,
            ResponseFingerprint::compute("anthropic", "other", "hello", "{}")
        );
        assert_ne!(
            base,
            ResponseFingerprint::compute("anthropic", "claude", "goodbye", "{}")
        );
        assert_ne!(
            base,
            ResponseFingerprint::compute("anthropic", "claude", "hello", "{\"t\":0.5}")
        );
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = ResponseFingerprint::compute("a", "b", "c", "d");
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_entry_expiry() {
        let entry = CacheEntry {
            key: "k".to_string(),
            value: "{}".to_string(),
            created_at: Utc::now() - chrono::Duration::seconds(120),
            ttl: Duration::from_secs(60),
            tags: vec![],
        };
        assert!(entry.is_expired(Utc::now()));

        let fresh = CacheEntry {
            created_at: Utc::now(),
            ..entry
        };
        assert!(!fresh.is_expired(Utc::now()));
    }
}
