//! Short-lived memory of hosts that recently failed a VM.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::{Clock, SystemClock};
use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::FailedHost;

/// Time-windowed host-id → "recently failed" marks.
///
/// Entries only ever add exclusions, so unsynchronized concurrent writes
/// are fine: last write wins and refreshes the TTL.
#[async_trait]
pub trait FailureCache: Send + Sync {
    async fn put(&self, host_id: &str, reason: &str, ttl: Duration) -> StateResult<()>;

    async fn is_failed(&self, host_id: &str) -> StateResult<bool>;

    /// Every host with a live mark.
    async fn failed_hosts(&self) -> StateResult<HashSet<String>>;
}

/// Failure cache stored in the [`StateStore`].
#[derive(Clone)]
pub struct StoreFailureCache {
    store: StateStore,
    clock: Arc<dyn Clock>,
}

impl StoreFailureCache {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl FailureCache for StoreFailureCache {
    async fn put(&self, host_id: &str, reason: &str, ttl: Duration) -> StateResult<()> {
        self.store
            .put_failed_host(&FailedHost::new(host_id, reason, ttl, self.clock.now_ms()))
    }

    async fn is_failed(&self, host_id: &str) -> StateResult<bool> {
        Ok(self.store.get_failed_host(host_id, self.clock.now_ms())?.is_some())
    }

    async fn failed_hosts(&self) -> StateResult<HashSet<String>> {
        Ok(self
            .store
            .list_failed_hosts(self.clock.now_ms())?
            .into_iter()
            .map(|mark| mark.host_id)
            .collect())
    }
}
