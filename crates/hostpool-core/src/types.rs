//! Shared domain types used across hostpool crates.
//!
//! These mirror the control-plane resources the placement engine works
//! with: host groups, dedicated hosts, and virtual machines. All types are
//! serializable so they can be persisted, logged, or returned over an API.

use serde::{Deserialize, Serialize};

use crate::validate::{ValidationError, require};

/// Identifier assigned by the cloud to a host group or host.
pub type ResourceId = String;

// ── Scope ──────────────────────────────────────────────────────────

/// The account scope every control-plane call is made against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountScope {
    /// Cloud environment name (e.g. "AzurePublicCloud").
    pub cloud_name: String,
    pub tenant_id: String,
    pub subscription_id: String,
    pub resource_group: String,
}

impl AccountScope {
    pub fn new(
        cloud_name: impl Into<String>,
        tenant_id: impl Into<String>,
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
    ) -> Self {
        Self {
            cloud_name: cloud_name.into(),
            tenant_id: tenant_id.into(),
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
        }
    }

    /// Check that every part of the scope tuple is present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("cloud_name", &self.cloud_name)?;
        require("tenant_id", &self.tenant_id)?;
        require("subscription_id", &self.subscription_id)?;
        require("resource_group", &self.resource_group)?;
        Ok(())
    }
}

// ── Host group ─────────────────────────────────────────────────────

/// Caller-side reference to a host group.
///
/// Identity is `name` within the resource group of the scope. The cloud id
/// is resolved lazily the first time it is needed (it keys the group lock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroupRef {
    pub name: String,
    pub location: String,
    pub platform_fault_domain_count: u32,
    pub zone: Option<String>,
    /// Cloud-assigned id, filled in once resolved.
    #[serde(default)]
    pub group_id: Option<ResourceId>,
}

impl HostGroupRef {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            platform_fault_domain_count: 1,
            zone: None,
            group_id: None,
        }
    }

    pub fn with_fault_domains(mut self, count: u32) -> Self {
        self.platform_fault_domain_count = count;
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require("host_group", &self.name)?;
        require("location", &self.location)?;
        if self.platform_fault_domain_count == 0 {
            return Err(ValidationError::Invalid {
                field: "platform_fault_domain_count",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// A host group as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroup {
    pub id: ResourceId,
    pub name: String,
    pub location: String,
    pub platform_fault_domain_count: u32,
    pub zones: Vec<String>,
}

// ── Host ───────────────────────────────────────────────────────────

/// A dedicated host. Owned by exactly one host group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: ResourceId,
    pub name: String,
    pub group_name: String,
    pub sku: String,
    pub location: String,
    /// Fault domain the platform placed this host in.
    pub platform_fault_domain: Option<u32>,
}

// ── Virtual machine ────────────────────────────────────────────────

/// Lifecycle status of a VM as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProvisioningState {
    /// Not yet submitted to the control plane.
    #[default]
    Unset,
    /// Creating, updating, migrating, or otherwise in flight.
    Pending,
    Succeeded,
    /// Terminal on the control plane, recoverable by re-placing the VM.
    Failed,
}

impl ProvisioningState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisioningState::Succeeded | ProvisioningState::Failed)
    }
}

/// Power state of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    #[default]
    Unknown,
    Starting,
    Running,
    Deallocated,
}

/// VM resource descriptor, supplied by the caller and mutated by placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub name: String,
    pub location: String,
    /// VM size, e.g. "Standard_D4s_v3".
    pub sku: String,
    /// Dedicated host the VM is pinned to.
    pub host_id: Option<ResourceId>,
    #[serde(default)]
    pub provisioning_state: ProvisioningState,
    #[serde(default)]
    pub power_state: PowerState,
}

impl VirtualMachine {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        sku: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            sku: sku.into(),
            host_id: None,
            provisioning_state: ProvisioningState::Unset,
            power_state: PowerState::Unknown,
        }
    }
}

// ── Listing ────────────────────────────────────────────────────────

/// One page of a list call. `next_link` is `None` on the last page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_link: Option<String>,
}
