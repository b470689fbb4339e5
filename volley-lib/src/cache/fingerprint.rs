use dashmap::DashSet;

use crate::ProbeRequest;
use crate::utils::url::dedup_key;

/// Fingerprint of a probe: `{dedup key}:{method}:{context}:{auth state}:{identity}`
#[must_use]
pub fn fingerprint(request: &ProbeRequest) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        dedup_key(&request.url),
        request.method,
        request.context,
        request.auth_state(),
        request.identity
    )
}

/// Fingerprints of probes that already ran. Never evicted.
#[derive(Debug, Default)]
pub struct ContextFingerprintSet {
    seen: DashSet<String>,
}

impl ContextFingerprintSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a probe with the same fingerprint already ran
    #[must_use]
    pub fn contains(&self, request: &ProbeRequest) -> bool {
        self.seen.contains(&fingerprint(request))
    }

    /// Mark the probe as executed. Returns `false` if it was already known.
    pub fn insert(&self, request: &ProbeRequest) -> bool {
        self.seen.insert(fingerprint(request))
    }

    /// Number of distinct fingerprints
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no fingerprint was recorded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
