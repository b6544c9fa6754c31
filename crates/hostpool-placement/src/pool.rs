//! HostPool: the operations the placement core exposes to callers.
//!
//! Wires the engine, the provisioner and the admin operations over one
//! configuration and one set of collaborators, and forwards to them.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use hostpool_cloud::{HostSelector, RequestContext};
use hostpool_core::{Host, HostGroup, HostGroupRef, HostPoolConfig, ResourceId};
use hostpool_state::{StateStore, StoreFailureCache, StoreLock};

use crate::admin::HostGroupAdmin;
use crate::engine::PlacementEngine;
use crate::error::PlacementResult;
use crate::provisioner::{ProvisionOutcome, VmPlacementRequest, VmProvisioner};

pub struct HostPool {
    admin: HostGroupAdmin,
    engine: Arc<PlacementEngine>,
    provisioner: VmProvisioner,
}

impl HostPool {
    /// Lock and failure cache both backed by `store`, on the wall clock.
    pub fn with_store(
        config: &HostPoolConfig,
        selector: Arc<dyn HostSelector>,
        store: StateStore,
    ) -> Self {
        let lock = Arc::new(StoreLock::new(store.clone(), config.provisioning.lock_lease()));
        let failures = Arc::new(StoreFailureCache::new(store));
        Self::new(config, PlacementEngine::new(config, selector, lock, failures))
    }

    pub fn new(config: &HostPoolConfig, engine: PlacementEngine) -> Self {
        let engine = Arc::new(engine);
        info!(
            sku_mappings = config.sku_mappings.len(),
            max_vm_creation_attempts = config.provisioning.max_vm_creation_attempts,
            "host pool ready"
        );
        Self {
            admin: HostGroupAdmin::new(config),
            provisioner: VmProvisioner::new(config, engine.clone()),
            engine,
        }
    }

    pub fn engine(&self) -> &PlacementEngine {
        &self.engine
    }

    pub async fn create_host_group(
        &self,
        ctx: &RequestContext,
        group: &HostGroupRef,
    ) -> PlacementResult<HostGroup> {
        self.admin.create_host_group(ctx, group).await
    }

    pub async fn get_host_group(&self, ctx: &RequestContext, name: &str) -> PlacementResult<HostGroup> {
        self.admin.get_host_group(ctx, name).await
    }

    pub async fn create_host(
        &self,
        ctx: &RequestContext,
        group: &HostGroupRef,
        host_name: &str,
        host_sku: &str,
    ) -> PlacementResult<Host> {
        self.admin.create_host(ctx, group, host_name, host_sku).await
    }

    pub async fn place_vm(
        &self,
        ctx: &RequestContext,
        request: VmPlacementRequest,
    ) -> PlacementResult<ProvisionOutcome> {
        self.provisioner.place_vm(ctx, request).await
    }

    pub async fn find_host_for_placement(
        &self,
        ctx: &RequestContext,
        group: &mut HostGroupRef,
        vm_sku: &str,
        excluded: &HashSet<ResourceId>,
    ) -> PlacementResult<ResourceId> {
        self.engine
            .find_host_for_placement(ctx, group, vm_sku, excluded)
            .await
    }

    pub async fn list_host_groups(&self, ctx: &RequestContext) -> PlacementResult<Vec<HostGroup>> {
        self.admin.list_host_groups(ctx).await
    }

    pub async fn list_hosts(&self, ctx: &RequestContext, group_name: &str) -> PlacementResult<Vec<Host>> {
        self.admin.list_hosts(ctx, group_name).await
    }

    pub async fn delete_host_group(&self, ctx: &RequestContext, name: &str) -> PlacementResult<()> {
        self.admin.delete_host_group(ctx, name).await
    }

    pub async fn delete_host(
        &self,
        ctx: &RequestContext,
        group_name: &str,
        host_name: &str,
    ) -> PlacementResult<()> {
        self.admin.delete_host(ctx, group_name, host_name).await
    }
}
