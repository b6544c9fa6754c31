//! Host placement with on-demand host creation.
//!
//! ```text
//! find_host_for_placement(group, sku, excluded)
//!   loop:
//!     exclusions = excluded ∪ failure cache
//!     ask selector ──────────────── hit ──→ host id
//!     resolve group id (create group if missing)
//!     acquire lock(group id)        (lock retry policy)
//!     start lease heartbeat
//!       ask selector again ──────── hit ──→ host id
//!       map VM SKU → host SKU       (missing mapping is fatal)
//!       renew lease ─────────── lapsed ──→ next round
//!       create "{group}-{suffix}" ───────→ host id
//!     stop heartbeat, release lock  (release errors logged only)
//! ```
//!
//! The unlocked lookup is a read-only fast path. Correctness rests on the
//! locked second lookup: of N callers that miss together, the first one
//! through the lock creates a host and the rest find it afterwards. The
//! heartbeat keeps the lease alive while slow cloud calls run under it.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use hostpool_cloud::{HostSelector, RequestContext};
use hostpool_core::{HostGroupRef, HostPoolConfig, ResourceId, SkuMapping, require};
use hostpool_state::{DistributedLock, FailureCache, LockError, LockToken};

use crate::admin::HostGroupAdmin;
use crate::error::{PlacementError, PlacementResult};
use crate::random::{RandomSource, ThreadRandom};
use crate::retry::RetryPolicy;

pub struct PlacementEngine {
    admin: HostGroupAdmin,
    selector: Arc<dyn HostSelector>,
    lock: Arc<dyn DistributedLock>,
    failures: Arc<dyn FailureCache>,
    random: Arc<dyn RandomSource>,
    sku_mappings: SkuMapping,
    lock_retry: RetryPolicy,
    call_retry: RetryPolicy,
    lock_lease: Duration,
    hosts_created: AtomicU64,
}

impl PlacementEngine {
    pub fn new(
        config: &HostPoolConfig,
        selector: Arc<dyn HostSelector>,
        lock: Arc<dyn DistributedLock>,
        failures: Arc<dyn FailureCache>,
    ) -> Self {
        Self {
            admin: HostGroupAdmin::new(config),
            selector,
            lock,
            failures,
            random: Arc::new(ThreadRandom),
            sku_mappings: config.sku_mappings.clone(),
            lock_retry: RetryPolicy::lock(&config.retry),
            call_retry: RetryPolicy::group_creation(&config.retry),
            lock_lease: config.provisioning.lock_lease(),
            hosts_created: AtomicU64::new(0),
        }
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Hosts this engine has created since construction.
    pub fn hosts_created(&self) -> u64 {
        self.hosts_created.load(Ordering::Relaxed)
    }

    pub fn random(&self) -> &Arc<dyn RandomSource> {
        &self.random
    }

    pub fn failures(&self) -> &Arc<dyn FailureCache> {
        &self.failures
    }

    /// Return a host in `group` with room for a `vm_sku` VM, creating one if
    /// none has room. Hosts in `excluded` and hosts with a live failure mark
    /// are never returned.
    ///
    /// Every cloud call and the lock acquisition retry transient errors up
    /// to their configured ceilings; an error that outlasts its ceiling, a
    /// validation error or a missing SKU mapping is returned. A round whose
    /// lease lapsed before host creation starts over. `group.group_id` is
    /// filled in on first resolution.
    pub async fn find_host_for_placement(
        &self,
        ctx: &RequestContext,
        group: &mut HostGroupRef,
        vm_sku: &str,
        excluded: &HashSet<ResourceId>,
    ) -> PlacementResult<ResourceId> {
        ctx.validate()?;
        group.validate()?;
        require("vm_sku", vm_sku)?;

        let mut round: u64 = 0;
        loop {
            round += 1;
            if let Some(host_id) = self.try_place(ctx, group, vm_sku, excluded).await? {
                return Ok(host_id);
            }
            warn!(group = %group.name, round, "group lock lapsed before host creation, starting over");
        }
    }

    async fn try_place(
        &self,
        ctx: &RequestContext,
        group: &mut HostGroupRef,
        vm_sku: &str,
        excluded: &HashSet<ResourceId>,
    ) -> PlacementResult<Option<ResourceId>> {
        let mut exclusions = excluded.clone();
        exclusions.extend(self.failures.failed_hosts().await?);

        if let Some(host_id) = self.select(ctx, &group.name, vm_sku, &exclusions).await? {
            debug!(group = %group.name, host = %host_id, "host selected");
            return Ok(Some(host_id));
        }

        let group_id = self.resolve_group_id(ctx, group).await?;
        let key = group_id.as_str();
        let token = self
            .lock_retry
            .run("acquire_group_lock", || async move { self.lock.acquire(key).await })
            .await?;

        let heartbeat = LeaseHeartbeat::start(self.lock.clone(), token.clone(), self.lock_lease);
        let result = self.place_locked(ctx, group, vm_sku, &exclusions, &token).await;
        drop(heartbeat);

        if let Err(e) = self.lock.release(&token).await {
            warn!(group = %group.name, key = %token.key, error = %e, "failed to release group lock");
        }
        result
    }

    /// The critical section: look again, then create. `None` means the
    /// lease was lost before anything was created.
    async fn place_locked(
        &self,
        ctx: &RequestContext,
        group: &HostGroupRef,
        vm_sku: &str,
        exclusions: &HashSet<ResourceId>,
        token: &LockToken,
    ) -> PlacementResult<Option<ResourceId>> {
        if let Some(host_id) = self.select(ctx, &group.name, vm_sku, exclusions).await? {
            debug!(group = %group.name, host = %host_id, "host appeared while waiting for lock");
            return Ok(Some(host_id));
        }

        let Some(host_sku) = self.sku_mappings.host_sku_for(vm_sku) else {
            error!(%vm_sku, group = %group.name, "no host SKU mapping for VM SKU");
            return Err(PlacementError::MissingSkuMapping(vm_sku.to_string()));
        };

        match self.lock.renew(token).await {
            Ok(()) => {}
            Err(LockError::NotHeld(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let host_name = format!("{}-{}", group.name, self.random.host_suffix());
        let host = self.admin.create_host(ctx, group, &host_name, host_sku).await?;
        let hosts_created = self.hosts_created.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            group = %group.name,
            host = %host.id,
            %host_sku,
            hosts_created,
            "created dedicated host for placement"
        );
        Ok(Some(host.id))
    }

    async fn select(
        &self,
        ctx: &RequestContext,
        group_name: &str,
        vm_sku: &str,
        exclusions: &HashSet<ResourceId>,
    ) -> PlacementResult<Option<ResourceId>> {
        let selected = self
            .call_retry
            .run("select_dedicated_host", || async move {
                self.selector
                    .select_dedicated_host(&ctx.scope, group_name, vm_sku, exclusions)
                    .await
            })
            .await?;
        Ok(selected)
    }

    async fn resolve_group_id(
        &self,
        ctx: &RequestContext,
        group: &mut HostGroupRef,
    ) -> PlacementResult<ResourceId> {
        if let Some(id) = &group.group_id {
            return Ok(id.clone());
        }
        let resolved = match self.admin.get_host_group(ctx, &group.name).await {
            Ok(existing) => existing,
            Err(PlacementError::Cloud(e)) if e.is_not_found() => {
                info!(group = %group.name, "host group missing, creating it");
                self.admin.create_host_group(ctx, group).await?
            }
            Err(e) => return Err(e),
        };
        debug!(group = %group.name, id = %resolved.id, "host group id resolved");
        group.group_id = Some(resolved.id.clone());
        Ok(resolved.id)
    }
}

/// Renews a held group lock every third of its lease until dropped.
struct LeaseHeartbeat {
    handle: JoinHandle<()>,
}

impl LeaseHeartbeat {
    fn start(lock: Arc<dyn DistributedLock>, token: LockToken, lease: Duration) -> Self {
        let period = (lease / 3).max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the lease is fresh then.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                match lock.renew(&token).await {
                    Ok(()) => {}
                    Err(LockError::NotHeld(_)) => {
                        warn!(key = %token.key, "group lock lapsed, heartbeat stopped");
                        break;
                    }
                    Err(e) => warn!(key = %token.key, error = %e, "failed to renew group lock"),
                }
            }
        });
        Self { handle }
    }
}

impl Drop for LeaseHeartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
