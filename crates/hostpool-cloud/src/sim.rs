//! In-memory control plane.
//!
//! `SimulatedCloud` implements [`CloudResourceClient`] and [`HostSelector`]
//! over a single mutex-guarded state table. Host capacity is counted in
//! VM slots per host SKU. Faults can be queued per operation and VM
//! provisioning states can be scripted, which is how tests reproduce
//! allocation pressure and the spurious `Failed` state.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use hostpool_core::{
    AccountScope, Host, HostGroup, Page, PowerState, ProvisioningState, ResourceId,
    VirtualMachine,
};

use crate::client::{CloudResourceClient, HostGroupSpec, HostSpec};
use crate::error::{CloudError, CloudResult};
use crate::selector::HostSelector;

/// Control-plane operations, used to inject faults and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateHostGroup,
    GetHostGroup,
    ListHostGroups,
    DeleteHostGroup,
    CreateHost,
    ListHosts,
    DeleteHost,
    CreateVm,
    GetVm,
    DeallocateVm,
    StartVm,
    SelectHost,
}

struct SimHost {
    host: Host,
    resource_group: String,
    capacity: u32,
}

#[derive(Default)]
struct SimState {
    /// `{resource_group}/{name}` → group.
    groups: BTreeMap<String, HostGroup>,
    /// Host id → host.
    hosts: BTreeMap<ResourceId, SimHost>,
    /// `{resource_group}/{name}` → VM.
    vms: BTreeMap<String, VirtualMachine>,
    faults: HashMap<Operation, VecDeque<CloudError>>,
    /// VM name → states reported by successive polls while pending.
    scripted: HashMap<String, VecDeque<ProvisioningState>>,
    calls: HashMap<Operation, u32>,
}

impl SimState {
    /// Count the call and pop any queued fault for it.
    fn enter(&mut self, op: Operation) -> CloudResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => {
                debug!(?op, error = %err, "injected fault");
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Slots in use on `host_id`, not counting the VM named `except`.
    fn load(&self, host_id: &str, except: &str) -> u32 {
        self.vms
            .values()
            .filter(|vm| {
                vm.host_id.as_deref() == Some(host_id)
                    && vm.power_state != PowerState::Deallocated
                    && vm.name != except
            })
            .count() as u32
    }

    fn check_room(&self, host_id: &str, vm_name: &str) -> CloudResult<()> {
        let host = self.hosts.get(host_id).ok_or_else(|| {
            CloudError::new(400, "InvalidParameter", format!("host {host_id} does not exist"))
        })?;
        if self.load(host_id, vm_name) >= host.capacity {
            return Err(CloudError::allocation_failed(format!(
                "host {} has no free capacity",
                host.host.name
            )));
        }
        Ok(())
    }
}

/// In-memory implementation of the control plane and the host selector.
pub struct SimulatedCloud {
    state: Mutex<SimState>,
    host_capacity: HashMap<String, u32>,
    default_capacity: u32,
    page_size: usize,
    latency: Duration,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            host_capacity: HashMap::new(),
            default_capacity: 4,
            page_size: 50,
            latency: Duration::ZERO,
        }
    }

    /// VM slots provided by hosts of `sku`.
    pub fn with_host_capacity(mut self, sku: impl Into<String>, slots: u32) -> Self {
        self.host_capacity.insert(sku.into(), slots);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay applied before every call, so concurrent callers interleave.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn capacity_for(&self, sku: &str) -> u32 {
        self.host_capacity
            .get(sku)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    // ── Test hooks ─────────────────────────────────────────────────

    /// Fail the next call to `op` with `err`. Faults queue in order.
    pub fn inject_fault(&self, op: Operation, err: CloudError) {
        self.state().faults.entry(op).or_default().push_back(err);
    }

    /// States the next polls of `vm_name` report while it is pending.
    pub fn script_vm_states(
        &self,
        vm_name: &str,
        states: impl IntoIterator<Item = ProvisioningState>,
    ) {
        self.state()
            .scripted
            .entry(vm_name.to_string())
            .or_default()
            .extend(states);
    }

    pub fn calls(&self, op: Operation) -> u32 {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn seed_host_group(&self, scope: &AccountScope, spec: &HostGroupSpec) -> HostGroup {
        let group = group_record(scope, spec);
        self.state()
            .groups
            .insert(scoped_key(scope, &spec.name), group.clone());
        group
    }

    /// Insert a host directly, creating nothing else. The group must exist.
    pub fn seed_host(&self, scope: &AccountScope, spec: &HostSpec) -> Option<Host> {
        let mut state = self.state();
        let group = state.groups.get(&scoped_key(scope, &spec.group_name))?.clone();
        let host = host_record(&group, spec);
        state.hosts.insert(
            host.id.clone(),
            SimHost {
                host: host.clone(),
                resource_group: scope.resource_group.clone(),
                capacity: self.capacity_for(&spec.sku),
            },
        );
        Some(host)
    }

    pub fn hosts_in_group(&self, scope: &AccountScope, group_name: &str) -> Vec<Host> {
        self.state()
            .hosts
            .values()
            .filter(|h| h.resource_group == scope.resource_group && h.host.group_name == group_name)
            .map(|h| h.host.clone())
            .collect()
    }

    pub fn vm(&self, scope: &AccountScope, name: &str) -> Option<VirtualMachine> {
        self.state().vms.get(&scoped_key(scope, name)).cloned()
    }

    /// VM slots in use on a host.
    pub fn host_load(&self, host_id: &str) -> u32 {
        self.state().load(host_id, "")
    }
}

fn scoped_key(scope: &AccountScope, name: &str) -> String {
    format!("{}/{}", scope.resource_group, name)
}

fn group_record(scope: &AccountScope, spec: &HostGroupSpec) -> HostGroup {
    HostGroup {
        id: format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/hostGroups/{}",
            scope.subscription_id, scope.resource_group, spec.name
        ),
        name: spec.name.clone(),
        location: spec.location.clone(),
        platform_fault_domain_count: spec.platform_fault_domain_count,
        zones: spec.zone.iter().cloned().collect(),
    }
}

fn host_record(group: &HostGroup, spec: &HostSpec) -> Host {
    Host {
        id: format!("{}/hosts/{}", group.id, spec.name),
        name: spec.name.clone(),
        group_name: group.name.clone(),
        sku: spec.sku.clone(),
        location: spec.location.clone(),
        platform_fault_domain: Some(0),
    }
}

/// Slice `items` into a page starting at the offset encoded in `next_link`.
fn paginate<T: Clone>(items: Vec<T>, next_link: Option<&str>, page_size: usize) -> CloudResult<Page<T>> {
    let offset = match next_link {
        None => 0,
        Some(link) => link
            .strip_prefix("page:")
            .and_then(|o| o.parse::<usize>().ok())
            .ok_or_else(|| CloudError::new(400, "InvalidNextLink", link.to_string()))?,
    };
    let end = offset.saturating_add(page_size).min(items.len());
    let page: Vec<T> = items.get(offset..end).map(<[T]>::to_vec).unwrap_or_default();
    let next_link = (end < items.len()).then(|| format!("page:{end}"));
    Ok(Page {
        items: page,
        next_link,
    })
}

#[async_trait]
impl CloudResourceClient for SimulatedCloud {
    async fn create_or_update_host_group(
        &self,
        scope: &AccountScope,
        spec: &HostGroupSpec,
    ) -> CloudResult<HostGroup> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::CreateHostGroup)?;
        let key = scoped_key(scope, &spec.name);
        if let Some(existing) = state.groups.get(&key) {
            // Fault-domain count and zone are fixed at creation.
            if existing.platform_fault_domain_count != spec.platform_fault_domain_count
                || existing.zones != spec.zone.iter().cloned().collect::<Vec<_>>()
            {
                return Err(CloudError::new(
                    409,
                    "PropertyChangeNotAllowed",
                    format!("host group {} fault domains and zone are immutable", spec.name),
                ));
            }
            return Ok(existing.clone());
        }
        let group = group_record(scope, spec);
        state.groups.insert(key, group.clone());
        Ok(group)
    }

    async fn get_host_group(&self, scope: &AccountScope, name: &str) -> CloudResult<HostGroup> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::GetHostGroup)?;
        state
            .groups
            .get(&scoped_key(scope, name))
            .cloned()
            .ok_or_else(|| CloudError::not_found(format!("hostGroups/{name}")))
    }

    async fn list_host_groups(
        &self,
        _scope: &AccountScope,
        next_link: Option<&str>,
    ) -> CloudResult<Page<HostGroup>> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::ListHostGroups)?;
        let all: Vec<HostGroup> = state.groups.values().cloned().collect();
        paginate(all, next_link, self.page_size)
    }

    async fn delete_host_group(&self, scope: &AccountScope, name: &str) -> CloudResult<()> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::DeleteHostGroup)?;
        let key = scoped_key(scope, name);
        if !state.groups.contains_key(&key) {
            return Err(CloudError::not_found(format!("hostGroups/{name}")));
        }
        let occupied = state
            .hosts
            .values()
            .any(|h| h.resource_group == scope.resource_group && h.host.group_name == name);
        if occupied {
            return Err(CloudError::new(
                409,
                "HostGroupNotEmpty",
                format!("host group {name} still contains hosts"),
            ));
        }
        state.groups.remove(&key);
        Ok(())
    }

    async fn create_or_update_host(
        &self,
        scope: &AccountScope,
        spec: &HostSpec,
    ) -> CloudResult<Host> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::CreateHost)?;
        let group = state
            .groups
            .get(&scoped_key(scope, &spec.group_name))
            .cloned()
            .ok_or_else(|| CloudError::not_found(format!("hostGroups/{}", spec.group_name)))?;
        let host = host_record(&group, spec);
        state.hosts.insert(
            host.id.clone(),
            SimHost {
                host: host.clone(),
                resource_group: scope.resource_group.clone(),
                capacity: self.capacity_for(&spec.sku),
            },
        );
        debug!(host = %host.id, sku = %host.sku, "simulated host created");
        Ok(host)
    }

    async fn list_hosts(
        &self,
        scope: &AccountScope,
        group_name: &str,
        next_link: Option<&str>,
    ) -> CloudResult<Page<Host>> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::ListHosts)?;
        if !state.groups.contains_key(&scoped_key(scope, group_name)) {
            return Err(CloudError::not_found(format!("hostGroups/{group_name}")));
        }
        let hosts: Vec<Host> = state
            .hosts
            .values()
            .filter(|h| h.resource_group == scope.resource_group && h.host.group_name == group_name)
            .map(|h| h.host.clone())
            .collect();
        paginate(hosts, next_link, self.page_size)
    }

    async fn delete_host(
        &self,
        scope: &AccountScope,
        group_name: &str,
        host_name: &str,
    ) -> CloudResult<()> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::DeleteHost)?;
        let id = state
            .hosts
            .values()
            .find(|h| {
                h.resource_group == scope.resource_group
                    && h.host.group_name == group_name
                    && h.host.name == host_name
            })
            .map(|h| h.host.id.clone())
            .ok_or_else(|| CloudError::not_found(format!("hostGroups/{group_name}/hosts/{host_name}")))?;
        if state.vms.values().any(|vm| vm.host_id.as_deref() == Some(id.as_str())) {
            return Err(CloudError::new(
                409,
                "HostNotEmpty",
                format!("host {host_name} still has virtual machines"),
            ));
        }
        state.hosts.remove(&id);
        Ok(())
    }

    async fn create_or_update_vm(
        &self,
        scope: &AccountScope,
        vm: &VirtualMachine,
    ) -> CloudResult<VirtualMachine> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::CreateVm)?;
        let host_id = vm.host_id.as_deref().ok_or_else(|| {
            CloudError::new(400, "InvalidParameter", "a dedicated host id is required")
        })?;
        let key = scoped_key(scope, &vm.name);
        let deallocated = state
            .vms
            .get(&key)
            .is_some_and(|existing| existing.power_state == PowerState::Deallocated);
        if !deallocated {
            state.check_room(host_id, &vm.name)?;
        }

        let mut record = vm.clone();
        record.provisioning_state = ProvisioningState::Pending;
        record.power_state = if deallocated {
            PowerState::Deallocated
        } else {
            PowerState::Starting
        };
        state.vms.insert(key, record.clone());
        Ok(record)
    }

    async fn get_vm(&self, scope: &AccountScope, name: &str) -> CloudResult<VirtualMachine> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::GetVm)?;
        let key = scoped_key(scope, name);
        let current = state
            .vms
            .get(&key)
            .map(|vm| vm.provisioning_state)
            .ok_or_else(|| CloudError::not_found(format!("virtualMachines/{name}")))?;

        if !current.is_terminal() {
            let next = state
                .scripted
                .get_mut(name)
                .and_then(VecDeque::pop_front)
                .unwrap_or(ProvisioningState::Succeeded);
            if let Some(vm) = state.vms.get_mut(&key) {
                vm.provisioning_state = next;
                if next == ProvisioningState::Succeeded && vm.power_state == PowerState::Starting {
                    vm.power_state = PowerState::Running;
                }
            }
        }
        state
            .vms
            .get(&key)
            .cloned()
            .ok_or_else(|| CloudError::not_found(format!("virtualMachines/{name}")))
    }

    async fn deallocate_vm(&self, scope: &AccountScope, name: &str) -> CloudResult<()> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::DeallocateVm)?;
        let vm = state
            .vms
            .get_mut(&scoped_key(scope, name))
            .ok_or_else(|| CloudError::not_found(format!("virtualMachines/{name}")))?;
        vm.power_state = PowerState::Deallocated;
        Ok(())
    }

    async fn start_vm(&self, scope: &AccountScope, name: &str) -> CloudResult<()> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::StartVm)?;
        let key = scoped_key(scope, name);
        let host_id = state
            .vms
            .get(&key)
            .ok_or_else(|| CloudError::not_found(format!("virtualMachines/{name}")))?
            .host_id
            .clone()
            .ok_or_else(|| CloudError::new(400, "InvalidParameter", "VM is not pinned to a host"))?;
        state.check_room(&host_id, name)?;
        if let Some(vm) = state.vms.get_mut(&key) {
            vm.power_state = if vm.provisioning_state == ProvisioningState::Succeeded {
                PowerState::Running
            } else {
                PowerState::Starting
            };
        }
        Ok(())
    }
}

#[async_trait]
impl HostSelector for SimulatedCloud {
    async fn select_dedicated_host(
        &self,
        scope: &AccountScope,
        group_name: &str,
        _vm_sku: &str,
        excluded: &HashSet<ResourceId>,
    ) -> CloudResult<Option<ResourceId>> {
        self.pause().await;
        let mut state = self.state();
        state.enter(Operation::SelectHost)?;
        let mut candidates: Vec<&SimHost> = state
            .hosts
            .values()
            .filter(|h| h.resource_group == scope.resource_group && h.host.group_name == group_name)
            .filter(|h| !excluded.contains(&h.host.id))
            .collect();
        candidates.sort_by(|a, b| a.host.name.cmp(&b.host.name));
        Ok(candidates
            .into_iter()
            .find(|h| state.load(&h.host.id, "") < h.capacity)
            .map(|h| h.host.id.clone()))
    }
}
