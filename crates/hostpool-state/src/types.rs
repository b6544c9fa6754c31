//! Records persisted in the state store.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A live claim on a host-group lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    pub key: String,
    pub holder: String,
    pub acquired_at_ms: u64,
    pub expires_at_ms: u64,
}

impl LockLease {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Outcome of trying to take a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Acquired(LockLease),
    /// Someone else holds an unexpired lease.
    Held(LockLease),
}

/// A host a VM recently failed to provision on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedHost {
    pub host_id: String,
    pub reason: String,
    pub failed_at_ms: u64,
    pub ttl_ms: u64,
}

impl FailedHost {
    pub fn new(host_id: impl Into<String>, reason: impl Into<String>, ttl: Duration, now_ms: u64) -> Self {
        Self {
            host_id: host_id.into(),
            reason: reason.into(),
            failed_at_ms: now_ms,
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    /// Expired strictly after the TTL has fully elapsed.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.failed_at_ms.saturating_add(self.ttl_ms)
    }
}

/// Current Unix epoch in milliseconds.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
