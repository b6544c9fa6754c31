//! Host-group administration.
//!
//! Thin create/list/delete operations on host groups and hosts. Every
//! operation validates the request scope and its identifiers before the
//! first network call. Create calls are create-or-update and so safe to
//! repeat.

use std::collections::HashSet;
use std::future::Future;

use tracing::{debug, info};

use hostpool_cloud::{HostGroupSpec, HostSpec, RequestContext};
use hostpool_core::{Host, HostGroup, HostGroupRef, HostPoolConfig, Page, require};

use crate::error::{PlacementError, PlacementResult};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct HostGroupAdmin {
    retry: RetryPolicy,
    default_fault_domain_count: u32,
}

impl HostGroupAdmin {
    pub fn new(config: &HostPoolConfig) -> Self {
        Self {
            retry: RetryPolicy::group_creation(&config.retry),
            default_fault_domain_count: config.provisioning.default_fault_domain_count,
        }
    }

    /// Create or update a host group. Fault-domain count and zone are fixed
    /// once the group exists.
    pub async fn create_host_group(
        &self,
        ctx: &RequestContext,
        group: &HostGroupRef,
    ) -> PlacementResult<HostGroup> {
        ctx.validate()?;
        group.validate()?;
        let spec = HostGroupSpec {
            name: group.name.clone(),
            location: group.location.clone(),
            platform_fault_domain_count: group.platform_fault_domain_count,
            zone: group.zone.clone(),
        };
        self.put_group(ctx, &spec).await
    }

    pub async fn get_host_group(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> PlacementResult<HostGroup> {
        ctx.validate()?;
        require("host_group", name)?;
        let group = self
            .retry
            .run("get_host_group", || async move {
                ctx.client().get_host_group(&ctx.scope, name).await
            })
            .await?;
        Ok(group)
    }

    /// Create or update a dedicated host, creating its group first (with the
    /// default fault-domain count) if the group does not exist yet.
    pub async fn create_host(
        &self,
        ctx: &RequestContext,
        group: &HostGroupRef,
        host_name: &str,
        host_sku: &str,
    ) -> PlacementResult<Host> {
        ctx.validate()?;
        require("host_group", &group.name)?;
        require("location", &group.location)?;
        require("host_name", host_name)?;
        require("host_sku", host_sku)?;

        let group_name = group.name.as_str();
        let existing = self
            .retry
            .run("get_host_group", || async move {
                ctx.client().get_host_group(&ctx.scope, group_name).await
            })
            .await;
        match existing {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                info!(
                    group = %group.name,
                    fault_domains = self.default_fault_domain_count,
                    "host group missing, creating it"
                );
                let spec = HostGroupSpec {
                    name: group.name.clone(),
                    location: group.location.clone(),
                    platform_fault_domain_count: self.default_fault_domain_count,
                    zone: group.zone.clone(),
                };
                self.put_group(ctx, &spec).await?;
            }
            Err(e) => return Err(e.into()),
        }

        let spec = HostSpec {
            group_name: group.name.clone(),
            name: host_name.to_string(),
            sku: host_sku.to_string(),
            location: group.location.clone(),
        };
        let spec = &spec;
        let host = self
            .retry
            .run("create_host", || async move {
                ctx.client().create_or_update_host(&ctx.scope, spec).await
            })
            .await?;
        info!(group = %group.name, host = %host.id, sku = %host.sku, "host created");
        Ok(host)
    }

    /// Every host group in the subscription, following next links until
    /// exhausted. Entries repeated across pages are returned once.
    pub async fn list_host_groups(&self, ctx: &RequestContext) -> PlacementResult<Vec<HostGroup>> {
        ctx.validate()?;
        let groups = collect_pages(
            |link| async move {
                let link = link.as_deref();
                let page = self
                    .retry
                    .run("list_host_groups", || async move {
                        ctx.client().list_host_groups(&ctx.scope, link).await
                    })
                    .await?;
                Ok::<_, PlacementError>(page)
            },
            |group: &HostGroup| group.id.clone(),
        )
        .await?;
        debug!(count = groups.len(), "host groups listed");
        Ok(groups)
    }

    /// Every host in a group, paginated like [`Self::list_host_groups`].
    pub async fn list_hosts(
        &self,
        ctx: &RequestContext,
        group_name: &str,
    ) -> PlacementResult<Vec<Host>> {
        ctx.validate()?;
        require("host_group", group_name)?;
        collect_pages(
            |link| async move {
                let link = link.as_deref();
                let page = self
                    .retry
                    .run("list_hosts", || async move {
                        ctx.client().list_hosts(&ctx.scope, group_name, link).await
                    })
                    .await?;
                Ok::<_, PlacementError>(page)
            },
            |host: &Host| host.id.clone(),
        )
        .await
    }

    pub async fn delete_host_group(&self, ctx: &RequestContext, name: &str) -> PlacementResult<()> {
        ctx.validate()?;
        require("host_group", name)?;
        self.retry
            .run("delete_host_group", || async move {
                ctx.client().delete_host_group(&ctx.scope, name).await
            })
            .await?;
        info!(group = %name, "host group deleted");
        Ok(())
    }

    pub async fn delete_host(
        &self,
        ctx: &RequestContext,
        group_name: &str,
        host_name: &str,
    ) -> PlacementResult<()> {
        ctx.validate()?;
        require("host_group", group_name)?;
        require("host_name", host_name)?;
        self.retry
            .run("delete_host", || async move {
                ctx.client().delete_host(&ctx.scope, group_name, host_name).await
            })
            .await?;
        info!(group = %group_name, host = %host_name, "host deleted");
        Ok(())
    }

    async fn put_group(
        &self,
        ctx: &RequestContext,
        spec: &HostGroupSpec,
    ) -> PlacementResult<HostGroup> {
        let group = self
            .retry
            .run("create_host_group", || async move {
                ctx.client().create_or_update_host_group(&ctx.scope, spec).await
            })
            .await?;
        info!(
            group = %group.name,
            id = %group.id,
            fault_domains = group.platform_fault_domain_count,
            "host group created"
        );
        Ok(group)
    }
}

/// Drain a paginated listing. Items are de-duplicated by `key`, and a next
/// link seen twice ends the walk.
async fn collect_pages<T, F, Fut, K>(mut fetch: F, key: K) -> PlacementResult<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, PlacementError>>,
    K: Fn(&T) -> String,
{
    let mut items = Vec::new();
    let mut seen_items = HashSet::new();
    let mut seen_links = HashSet::new();
    let mut next_link = None;

    loop {
        let page = fetch(next_link.take()).await?;
        for item in page.items {
            if seen_items.insert(key(&item)) {
                items.push(item);
            }
        }
        match page.next_link {
            Some(link) if seen_links.insert(link.clone()) => next_link = Some(link),
            _ => break,
        }
    }
    Ok(items)
}
