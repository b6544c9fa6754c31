//! StateStore — redb-backed coordination state for placement.
//!
//! Provides typed operations over group lock leases and failed-host marks.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing). Every read-modify-write happens inside a single write
//! transaction, so lease acquisition is atomic across tasks sharing the
//! store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(LOCK_LEASES).map_err(map_err!(Table))?;
        txn.open_table(FAILED_HOSTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Lock leases ────────────────────────────────────────────────

    /// Take the lease on `key` for `holder` unless someone else holds a
    /// live one. An expired lease is taken over.
    pub fn try_acquire_lease(
        &self,
        key: &str,
        holder: &str,
        lease: Duration,
        now_ms: u64,
    ) -> StateResult<LeaseOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(LOCK_LEASES).map_err(map_err!(Table))?;
            let existing: Option<LockLease> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };

            match existing {
                Some(current) if !current.is_expired(now_ms) && current.holder != holder => {
                    outcome = LeaseOutcome::Held(current);
                }
                previous => {
                    if let Some(stale) = previous.filter(|p| p.holder != holder) {
                        debug!(%key, holder = %stale.holder, "taking over expired lease");
                    }
                    let granted = LockLease {
                        key: key.to_string(),
                        holder: holder.to_string(),
                        acquired_at_ms: now_ms,
                        expires_at_ms: now_ms.saturating_add(lease.as_millis() as u64),
                    };
                    let value = serde_json::to_vec(&granted).map_err(map_err!(Serialize))?;
                    table
                        .insert(key, value.as_slice())
                        .map_err(map_err!(Write))?;
                    outcome = LeaseOutcome::Acquired(granted);
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(outcome)
    }

    /// Drop the lease on `key` if `holder` owns it. Returns true if released.
    pub fn release_lease(&self, key: &str, holder: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released;
        {
            let mut table = txn.open_table(LOCK_LEASES).map_err(map_err!(Table))?;
            let owner: Option<LockLease> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            released = owner.is_some_and(|lease| lease.holder == holder);
            if released {
                table.remove(key).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, %holder, released, "lease release");
        Ok(released)
    }

    /// Push the expiry of `holder`'s lease on `key` out to `now_ms + lease`.
    /// Returns false if `holder` no longer owns a live lease: it was released,
    /// or it lapsed (even if nobody has taken it over yet).
    pub fn renew_lease(
        &self,
        key: &str,
        holder: &str,
        lease: Duration,
        now_ms: u64,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let renewed;
        {
            let mut table = txn.open_table(LOCK_LEASES).map_err(map_err!(Table))?;
            let current: Option<LockLease> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            match current {
                Some(mut owned) if owned.holder == holder && !owned.is_expired(now_ms) => {
                    owned.expires_at_ms = now_ms.saturating_add(lease.as_millis() as u64);
                    let value = serde_json::to_vec(&owned).map_err(map_err!(Serialize))?;
                    table
                        .insert(key, value.as_slice())
                        .map_err(map_err!(Write))?;
                    renewed = true;
                }
                _ => renewed = false,
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(renewed)
    }

    /// Get the current lease on `key`, expired or not.
    pub fn get_lease(&self, key: &str) -> StateResult<Option<LockLease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LOCK_LEASES).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let lease: LockLease =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }

    // ── Failed hosts ───────────────────────────────────────────────

    /// Insert or refresh a failed-host mark. Last write wins.
    pub fn put_failed_host(&self, mark: &FailedHost) -> StateResult<()> {
        let value = serde_json::to_vec(mark).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(FAILED_HOSTS).map_err(map_err!(Table))?;
            table
                .insert(mark.host_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host = %mark.host_id, ttl_ms = mark.ttl_ms, "failed host marked");
        Ok(())
    }

    /// Get the mark for `host_id` if it is still live at `now_ms`.
    pub fn get_failed_host(&self, host_id: &str, now_ms: u64) -> StateResult<Option<FailedHost>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FAILED_HOSTS).map_err(map_err!(Table))?;
        match table.get(host_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let mark: FailedHost =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok((!mark.is_expired(now_ms)).then_some(mark))
            }
            None => Ok(None),
        }
    }

    /// List marks still live at `now_ms`, purging expired ones.
    pub fn list_failed_hosts(&self, now_ms: u64) -> StateResult<Vec<FailedHost>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut live = Vec::new();
        {
            let mut table = txn.open_table(FAILED_HOSTS).map_err(map_err!(Table))?;
            let mut expired = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let mark: FailedHost =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if mark.is_expired(now_ms) {
                    expired.push(key.value().to_string());
                } else {
                    live.push(mark);
                }
            }
            for key in &expired {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            if !expired.is_empty() {
                debug!(purged = expired.len(), "expired failed-host marks purged");
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(live)
    }
}
