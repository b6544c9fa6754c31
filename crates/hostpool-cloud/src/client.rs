//! The control-plane client boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use hostpool_core::{AccountScope, Host, HostGroup, Page, VirtualMachine};

use crate::error::CloudResult;

/// Desired state of a host group for create-or-update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroupSpec {
    pub name: String,
    pub location: String,
    pub platform_fault_domain_count: u32,
    pub zone: Option<String>,
}

/// Desired state of a dedicated host for create-or-update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    pub group_name: String,
    pub name: String,
    pub sku: String,
    pub location: String,
}

/// Typed operations against host groups, hosts, and VMs.
///
/// Each call returns the terminal resource record or a classified
/// [`CloudError`](crate::CloudError). Long-running operations are awaited
/// to completion by the implementation.
#[async_trait]
pub trait CloudResourceClient: Send + Sync {
    async fn create_or_update_host_group(
        &self,
        scope: &AccountScope,
        spec: &HostGroupSpec,
    ) -> CloudResult<HostGroup>;

    async fn get_host_group(&self, scope: &AccountScope, name: &str) -> CloudResult<HostGroup>;

    /// One page of host groups in the subscription. `next_link` is the
    /// continuation returned by the previous page.
    async fn list_host_groups(
        &self,
        scope: &AccountScope,
        next_link: Option<&str>,
    ) -> CloudResult<Page<HostGroup>>;

    async fn delete_host_group(&self, scope: &AccountScope, name: &str) -> CloudResult<()>;

    async fn create_or_update_host(&self, scope: &AccountScope, spec: &HostSpec)
    -> CloudResult<Host>;

    async fn list_hosts(
        &self,
        scope: &AccountScope,
        group_name: &str,
        next_link: Option<&str>,
    ) -> CloudResult<Page<Host>>;

    async fn delete_host(
        &self,
        scope: &AccountScope,
        group_name: &str,
        host_name: &str,
    ) -> CloudResult<()>;

    async fn create_or_update_vm(
        &self,
        scope: &AccountScope,
        vm: &VirtualMachine,
    ) -> CloudResult<VirtualMachine>;

    async fn get_vm(&self, scope: &AccountScope, name: &str) -> CloudResult<VirtualMachine>;

    async fn deallocate_vm(&self, scope: &AccountScope, name: &str) -> CloudResult<()>;

    async fn start_vm(&self, scope: &AccountScope, name: &str) -> CloudResult<()>;
}
