//! Capacity-aware host selection boundary.

use std::collections::HashSet;

use async_trait::async_trait;

use hostpool_core::{AccountScope, ResourceId};

use crate::error::CloudResult;

/// Answers "which existing host in this group can take a VM of this size".
///
/// Selection only reads capacity; it never reserves it. Two callers may be
/// handed the same host, and a host may fill up between selection and VM
/// creation. The placement engine tolerates both.
#[async_trait]
pub trait HostSelector: Send + Sync {
    /// Return a host id with room for `vm_sku`, skipping `excluded`, or
    /// `None` when the group has no such host.
    async fn select_dedicated_host(
        &self,
        scope: &AccountScope,
        group_name: &str,
        vm_sku: &str,
        excluded: &HashSet<ResourceId>,
    ) -> CloudResult<Option<ResourceId>>;
}
