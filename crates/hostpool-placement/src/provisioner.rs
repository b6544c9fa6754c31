//! VM provisioning loop.
//!
//! Each request runs a small state machine on the VM's provisioning state:
//!
//! ```text
//! Unset ──find host, create──→ Pending ──poll──→ Succeeded
//!                                 │
//!                                 └──poll──→ Failed ──exclude host,
//!                                              deallocate, recreate
//!                                              elsewhere, start──→ Pending
//! ```
//!
//! `Failed` here is the platform's spurious failure under capacity
//! pressure: the host is marked bad in the failure cache and the VM moves.
//! Allocation errors on create or start are a no-progress signal and are
//! absorbed; the next iteration tries again. The loop is bounded by
//! `max_vm_creation_attempts` and reports exhaustion instead of failing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use hostpool_cloud::{CloudError, CloudResult, RequestContext};
use hostpool_core::{
    HostGroupRef, HostPoolConfig, ProvisioningState, ResourceId, ValidationError,
    VirtualMachine, require,
};

use crate::engine::PlacementEngine;
use crate::error::PlacementResult;
use crate::retry::RetryPolicy;

/// A VM to place and the host group to place it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmPlacementRequest {
    pub group: HostGroupRef,
    pub vm: VirtualMachine,
}

impl VmPlacementRequest {
    pub fn new(group: HostGroupRef, vm: VirtualMachine) -> Self {
        Self { group, vm }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.group.validate()?;
        require("vm_name", &self.vm.name)?;
        require("vm_sku", &self.vm.sku)?;
        require("vm_location", &self.vm.location)?;
        Ok(())
    }
}

/// How a placement ended. Both variants carry the last VM state observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Succeeded { vm: VirtualMachine, attempts: u32 },
    /// The attempt budget ran out before the VM reached `Succeeded`.
    Exhausted { vm: VirtualMachine, attempts: u32 },
}

impl ProvisionOutcome {
    pub fn vm(&self) -> &VirtualMachine {
        match self {
            ProvisionOutcome::Succeeded { vm, .. } | ProvisionOutcome::Exhausted { vm, .. } => vm,
        }
    }

    pub fn into_vm(self) -> VirtualMachine {
        match self {
            ProvisionOutcome::Succeeded { vm, .. } | ProvisionOutcome::Exhausted { vm, .. } => vm,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ProvisionOutcome::Succeeded { attempts, .. }
            | ProvisionOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, ProvisionOutcome::Succeeded { .. })
    }
}

/// Result of a VM create or start call, split three ways.
#[derive(Debug)]
enum CallOutcome<T> {
    Success(T),
    /// No capacity right now. Not a failure.
    CapacitySignal(CloudError),
    Fatal(CloudError),
}

impl<T> From<CloudResult<T>> for CallOutcome<T> {
    fn from(result: CloudResult<T>) -> Self {
        match result {
            Ok(value) => CallOutcome::Success(value),
            Err(e) if e.is_allocation_failure() => CallOutcome::CapacitySignal(e),
            Err(e) => CallOutcome::Fatal(e),
        }
    }
}

pub struct VmProvisioner {
    engine: Arc<PlacementEngine>,
    call_retry: RetryPolicy,
    state_retry: RetryPolicy,
    min_poll_secs: u64,
    max_poll_secs: u64,
    max_attempts: u32,
    failed_host_ttl: Duration,
}

impl VmProvisioner {
    pub fn new(config: &HostPoolConfig, engine: Arc<PlacementEngine>) -> Self {
        Self {
            engine,
            call_retry: RetryPolicy::group_creation(&config.retry),
            state_retry: RetryPolicy::vm_state_check(&config.retry),
            min_poll_secs: config.provisioning.min_poll_interval_secs,
            max_poll_secs: config.provisioning.max_poll_interval_secs,
            max_attempts: config.provisioning.max_vm_creation_attempts,
            failed_host_ttl: config.provisioning.failed_host_ttl(),
        }
    }

    /// Place and create the VM, polling until it succeeds or the attempt
    /// budget is spent.
    pub async fn place_vm(
        &self,
        ctx: &RequestContext,
        request: VmPlacementRequest,
    ) -> PlacementResult<ProvisionOutcome> {
        ctx.validate()?;
        request.validate()?;

        let VmPlacementRequest { mut group, mut vm } = request;
        let mut excluded: HashSet<ResourceId> = HashSet::new();
        let mut attempts = 0;

        while vm.provisioning_state != ProvisioningState::Succeeded && attempts < self.max_attempts
        {
            match vm.provisioning_state {
                ProvisioningState::Unset => {
                    self.create_on_new_host(ctx, &mut group, &mut vm, &excluded)
                        .await?;
                }
                ProvisioningState::Failed => {
                    self.move_failed_vm(ctx, &mut group, &mut vm, &mut excluded)
                        .await?;
                }
                ProvisioningState::Pending | ProvisioningState::Succeeded => {}
            }

            let pause = self
                .engine
                .random()
                .jitter_secs(self.min_poll_secs, self.max_poll_secs);
            debug!(vm = %vm.name, attempt = attempts + 1, pause_secs = pause, "waiting before state check");
            tokio::time::sleep(Duration::from_secs(pause)).await;

            vm = self.refresh(ctx, vm).await?;
            attempts += 1;
        }

        if vm.provisioning_state == ProvisioningState::Succeeded {
            info!(vm = %vm.name, host = ?vm.host_id, attempts, "VM provisioned");
            Ok(ProvisionOutcome::Succeeded { vm, attempts })
        } else {
            warn!(
                vm = %vm.name,
                state = ?vm.provisioning_state,
                attempts,
                "VM creation attempts exhausted"
            );
            Ok(ProvisionOutcome::Exhausted { vm, attempts })
        }
    }

    async fn create_on_new_host(
        &self,
        ctx: &RequestContext,
        group: &mut HostGroupRef,
        vm: &mut VirtualMachine,
        excluded: &HashSet<ResourceId>,
    ) -> PlacementResult<()> {
        let host_id = self
            .engine
            .find_host_for_placement(ctx, group, &vm.sku, excluded)
            .await?;
        vm.host_id = Some(host_id);

        match self.create_or_update(ctx, vm).await {
            CallOutcome::Success(created) => {
                debug!(vm = %created.name, host = ?created.host_id, "VM create accepted");
                *vm = created;
            }
            CallOutcome::CapacitySignal(e) => {
                debug!(vm = %vm.name, host = ?vm.host_id, error = %e, "no capacity for VM, will retry");
            }
            CallOutcome::Fatal(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn move_failed_vm(
        &self,
        ctx: &RequestContext,
        group: &mut HostGroupRef,
        vm: &mut VirtualMachine,
        excluded: &mut HashSet<ResourceId>,
    ) -> PlacementResult<()> {
        if let Some(bad_host) = vm.host_id.clone() {
            warn!(vm = %vm.name, host = %bad_host, "VM provisioning failed, excluding host");
            if let Err(e) = self
                .engine
                .failures()
                .put(&bad_host, "vm provisioning failed", self.failed_host_ttl)
                .await
            {
                warn!(host = %bad_host, error = %e, "failed to record bad host");
            }
            excluded.insert(bad_host);
        }

        let host_id = self
            .engine
            .find_host_for_placement(ctx, group, &vm.sku, excluded)
            .await?;

        let name = vm.name.as_str();
        self.call_retry
            .run("deallocate_vm", || async move {
                ctx.client().deallocate_vm(&ctx.scope, name).await
            })
            .await?;

        vm.host_id = Some(host_id);
        match self.create_or_update(ctx, vm).await {
            CallOutcome::Success(created) => *vm = created,
            CallOutcome::CapacitySignal(e) => {
                debug!(vm = %vm.name, error = %e, "no capacity to recreate VM, will retry");
                return Ok(());
            }
            CallOutcome::Fatal(e) => return Err(e.into()),
        }

        let name = vm.name.as_str();
        let started: CallOutcome<()> = self
            .call_retry
            .run("start_vm", || async move {
                ctx.client().start_vm(&ctx.scope, name).await
            })
            .await
            .into();
        match started {
            CallOutcome::Success(()) => {
                info!(vm = %vm.name, host = ?vm.host_id, "VM moved to new host");
            }
            CallOutcome::CapacitySignal(e) => {
                debug!(vm = %vm.name, error = %e, "no capacity to start VM, will retry");
            }
            CallOutcome::Fatal(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn create_or_update(
        &self,
        ctx: &RequestContext,
        vm: &VirtualMachine,
    ) -> CallOutcome<VirtualMachine> {
        self.call_retry
            .run("create_or_update_vm", || async move {
                ctx.client().create_or_update_vm(&ctx.scope, vm).await
            })
            .await
            .into()
    }

    /// Fetch the VM's current state. A VM whose create was absorbed as a
    /// capacity signal does not exist yet; keep the local copy then.
    async fn refresh(
        &self,
        ctx: &RequestContext,
        local: VirtualMachine,
    ) -> PlacementResult<VirtualMachine> {
        let name = local.name.as_str();
        let fetched = self
            .state_retry
            .run("get_vm", || async move { ctx.client().get_vm(&ctx.scope, name).await })
            .await;
        match fetched {
            Ok(vm) => {
                debug!(vm = %vm.name, state = ?vm.provisioning_state, "VM state refreshed");
                Ok(vm)
            }
            Err(e) if e.is_not_found() && local.provisioning_state == ProvisioningState::Unset => {
                Ok(local)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use hostpool_cloud::sim::Operation;
    use hostpool_cloud::{HostGroupSpec, SimulatedCloud};
    use hostpool_core::{AccountScope, SkuMapping};
    use hostpool_state::{StateStore, StoreFailureCache, StoreLock};

    use super::*;
    use crate::error::PlacementError;
    use crate::random::SeededRandom;

    fn scope() -> AccountScope {
        AccountScope::new("AzurePublicCloud", "tenant", "sub", "rg")
    }

    fn setup(max_attempts: u32) -> (Arc<SimulatedCloud>, RequestContext, VmProvisioner) {
        let mut config = HostPoolConfig::default();
        config.retry.backoff_unit_ms = 100;
        config.provisioning.max_vm_creation_attempts = max_attempts;
        config.sku_mappings = SkuMapping::new().with("Standard_D4s_v3", "DSv3-Type1");

        let cloud = Arc::new(SimulatedCloud::new());
        cloud.seed_host_group(
            &scope(),
            &HostGroupSpec {
                name: "dhg-1".to_string(),
                location: "westus2".to_string(),
                platform_fault_domain_count: 1,
                zone: None,
            },
        );
        let store = StateStore::open_in_memory().unwrap();
        let engine = PlacementEngine::new(
            &config,
            cloud.clone(),
            Arc::new(StoreLock::new(store.clone(), Duration::from_secs(60))),
            Arc::new(StoreFailureCache::new(store)),
        )
        .with_random(Arc::new(SeededRandom::new(1)));

        let ctx = RequestContext::new(scope(), cloud.clone());
        (cloud, ctx, VmProvisioner::new(&config, Arc::new(engine)))
    }

    fn request(name: &str) -> VmPlacementRequest {
        VmPlacementRequest::new(
            HostGroupRef::new("dhg-1", "westus2"),
            VirtualMachine::new(name, "westus2", "Standard_D4s_v3"),
        )
    }

    #[test]
    fn allocation_errors_are_capacity_signals() {
        let outcome: CallOutcome<()> = Err(CloudError::allocation_failed("full")).into();
        assert!(matches!(outcome, CallOutcome::CapacitySignal(_)));

        let outcome: CallOutcome<()> =
            Err(CloudError::new(409, "ZonalAllocationFailed", "zone full")).into();
        assert!(matches!(outcome, CallOutcome::CapacitySignal(_)));

        let outcome: CallOutcome<()> = Err(CloudError::new(400, "InvalidParameter", "x")).into();
        assert!(matches!(outcome, CallOutcome::Fatal(_)));

        let outcome: CallOutcome<u8> = Ok(1).into();
        assert!(matches!(outcome, CallOutcome::Success(1)));
    }

    #[test]
    fn request_requires_vm_identity() {
        let mut req = request("vm-1");
        assert!(req.validate().is_ok());
        req.vm.sku = String::new();
        assert_eq!(req.validate(), Err(ValidationError::Missing("vm_sku")));
    }

    #[tokio::test(start_paused = true)]
    async fn vm_lands_on_a_host_and_succeeds() {
        let (cloud, ctx, provisioner) = setup(5);

        let outcome = provisioner.place_vm(&ctx, request("vm-1")).await.unwrap();

        assert!(outcome.is_succeeded());
        assert_eq!(outcome.attempts(), 1);
        let hosts = cloud.hosts_in_group(&scope(), "dhg-1");
        assert_eq!(outcome.vm().host_id.as_deref(), Some(hosts[0].id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_signal_on_create_is_absorbed() {
        let (cloud, ctx, provisioner) = setup(5);
        cloud.inject_fault(Operation::CreateVm, CloudError::allocation_failed("full"));

        let outcome = provisioner.place_vm(&ctx, request("vm-1")).await.unwrap();

        assert!(outcome.is_succeeded());
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(cloud.calls(Operation::CreateVm), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_signal_on_start_is_absorbed() {
        let (cloud, ctx, provisioner) = setup(5);
        cloud.script_vm_states("vm-1", [ProvisioningState::Failed]);
        cloud.inject_fault(Operation::StartVm, CloudError::allocation_failed("full"));

        let outcome = provisioner.place_vm(&ctx, request("vm-1")).await.unwrap();

        assert!(outcome.is_succeeded());
        assert_eq!(cloud.calls(Operation::StartVm), 1);
        assert_eq!(cloud.calls(Operation::DeallocateVm), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_start_error_propagates() {
        let (cloud, ctx, provisioner) = setup(5);
        cloud.script_vm_states("vm-1", [ProvisioningState::Failed]);
        cloud.inject_fault(
            Operation::StartVm,
            CloudError::new(400, "OperationNotAllowed", "no"),
        );

        let err = provisioner.place_vm(&ctx, request("vm-1")).await.unwrap_err();
        assert!(matches!(err, PlacementError::Cloud(ref e) if e.code == "OperationNotAllowed"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_errors_are_retried() {
        let (cloud, ctx, provisioner) = setup(5);
        cloud.inject_fault(Operation::GetVm, CloudError::unavailable("busy"));
        cloud.inject_fault(Operation::GetVm, CloudError::new(429, "TooManyRequests", "slow"));

        let outcome = provisioner.place_vm(&ctx, request("vm-1")).await.unwrap();
        assert!(outcome.is_succeeded());
        assert_eq!(cloud.calls(Operation::GetVm), 3);
    }

    #[tokio::test]
    async fn already_succeeded_vm_needs_no_work() {
        let (cloud, ctx, provisioner) = setup(5);
        let mut req = request("vm-1");
        req.vm.provisioning_state = ProvisioningState::Succeeded;

        let outcome = provisioner.place_vm(&ctx, req).await.unwrap();
        assert_eq!(outcome.attempts(), 0);
        assert_eq!(cloud.calls(Operation::SelectHost), 0);
    }
}
