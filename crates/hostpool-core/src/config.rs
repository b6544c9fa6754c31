//! hostpool.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPoolConfig {
    pub retry: RetryConfig,
    pub provisioning: ProvisioningConfig,
    pub sku_mappings: SkuMapping,
}

/// Attempt ceilings for the retried sub-operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub group_creation_attempts: u32,
    pub vm_state_check_attempts: u32,
    pub lock_attempts: u32,
    /// Backoff time unit; attempt `r` waits `2 * r` units.
    pub backoff_unit_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            group_creation_attempts: 3,
            vm_state_check_attempts: 5,
            lock_attempts: 10,
            backoff_unit_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub min_poll_interval_secs: u64,
    pub max_poll_interval_secs: u64,
    pub max_vm_creation_attempts: u32,
    /// How long a host stays excluded after a VM failed on it.
    pub failed_host_ttl_secs: u64,
    /// Lease on a group lock; a crashed holder is evicted after this.
    pub lock_lease_secs: u64,
    /// Fault-domain count used when creating a host auto-creates its group.
    pub default_fault_domain_count: u32,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            min_poll_interval_secs: 10,
            max_poll_interval_secs: 30,
            max_vm_creation_attempts: 10,
            failed_host_ttl_secs: 600,
            lock_lease_secs: 300,
            default_fault_domain_count: 1,
        }
    }
}

impl ProvisioningConfig {
    pub fn failed_host_ttl(&self) -> Duration {
        Duration::from_secs(self.failed_host_ttl_secs)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }
}

/// Static VM SKU → host SKU table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkuMapping(HashMap<String, String>);

impl SkuMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, vm_sku: impl Into<String>, host_sku: impl Into<String>) -> Self {
        self.0.insert(vm_sku.into(), host_sku.into());
        self
    }

    /// Host SKU required to run `vm_sku`, if one is configured.
    pub fn host_sku_for(&self, vm_sku: &str) -> Option<&str> {
        self.0.get(vm_sku).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl HostPoolConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: HostPoolConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings that would make a retry loop or poll window meaningless.
    pub fn validate(&self) -> anyhow::Result<()> {
        let r = &self.retry;
        if r.group_creation_attempts == 0 || r.vm_state_check_attempts == 0 || r.lock_attempts == 0
        {
            anyhow::bail!("retry attempt ceilings must be at least 1");
        }
        let p = &self.provisioning;
        if p.min_poll_interval_secs > p.max_poll_interval_secs {
            anyhow::bail!(
                "min_poll_interval_secs ({}) exceeds max_poll_interval_secs ({})",
                p.min_poll_interval_secs,
                p.max_poll_interval_secs
            );
        }
        if p.max_vm_creation_attempts == 0 {
            anyhow::bail!("max_vm_creation_attempts must be at least 1");
        }
        if p.default_fault_domain_count == 0 {
            anyhow::bail!("default_fault_domain_count must be at least 1");
        }
        if p.lock_lease_secs == 0 {
            anyhow::bail!("lock_lease_secs must be at least 1");
        }
        Ok(())
    }
}
