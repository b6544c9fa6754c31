//! Group-scoped mutual exclusion.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::StateError;
use crate::store::StateStore;
use crate::types::LeaseOutcome;

/// Proof of holding the lock on `key`. Pass it back to release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub holder: String,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock {key} is held by {holder}")]
    Contended { key: String, holder: String },

    #[error("lock {0} is not held by this caller")]
    NotHeld(String),

    #[error("lock store error: {0}")]
    Store(#[from] StateError),
}

impl LockError {
    /// Contention and store trouble clear up on their own; a release of a
    /// lock we do not hold never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Contended { .. } | LockError::Store(_))
    }
}

/// A named serialization token shared by every process using the same
/// backing store. At most one holder per key at a time.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to take the lock. Fails with [`LockError::Contended`] instead of
    /// waiting; callers retry under their own backoff.
    async fn acquire(&self, key: &str) -> Result<LockToken, LockError>;

    /// Extend the hold on `token`. Fails with [`LockError::NotHeld`] once
    /// the hold has lapsed; the caller no longer has exclusion then.
    async fn renew(&self, token: &LockToken) -> Result<(), LockError>;

    async fn release(&self, token: &LockToken) -> Result<(), LockError>;
}

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(0);

/// Lease-based lock stored in the [`StateStore`].
#[derive(Clone)]
pub struct StoreLock {
    store: StateStore,
    lease: Duration,
    clock: Arc<dyn Clock>,
}

impl StoreLock {
    pub fn new(store: StateStore, lease: Duration) -> Self {
        Self {
            store,
            lease,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Holder ids are unique per acquisition, so two tasks in the same
    /// process never share a lease.
    fn next_holder() -> String {
        format!(
            "{}-{}",
            std::process::id(),
            NEXT_HOLDER.fetch_add(1, Ordering::Relaxed)
        )
    }
}

#[async_trait]
impl DistributedLock for StoreLock {
    async fn acquire(&self, key: &str) -> Result<LockToken, LockError> {
        let holder = Self::next_holder();
        match self
            .store
            .try_acquire_lease(key, &holder, self.lease, self.clock.now_ms())?
        {
            LeaseOutcome::Acquired(lease) => {
                debug!(%key, holder = %lease.holder, "lock acquired");
                Ok(LockToken {
                    key: key.to_string(),
                    holder: lease.holder,
                })
            }
            LeaseOutcome::Held(lease) => Err(LockError::Contended {
                key: key.to_string(),
                holder: lease.holder,
            }),
        }
    }

    async fn renew(&self, token: &LockToken) -> Result<(), LockError> {
        if self
            .store
            .renew_lease(&token.key, &token.holder, self.lease, self.clock.now_ms())?
        {
            debug!(key = %token.key, holder = %token.holder, "lock renewed");
            Ok(())
        } else {
            Err(LockError::NotHeld(token.key.clone()))
        }
    }

    async fn release(&self, token: &LockToken) -> Result<(), LockError> {
        if self.store.release_lease(&token.key, &token.holder)? {
            debug!(key = %token.key, holder = %token.holder, "lock released");
            Ok(())
        } else {
            Err(LockError::NotHeld(token.key.clone()))
        }
    }
}
