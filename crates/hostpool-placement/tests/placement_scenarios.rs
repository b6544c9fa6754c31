//! End-to-end placement scenarios against the in-memory control plane.
//!
//! Every test drives a `HostPool` wired to a `SimulatedCloud` and an
//! in-memory `StateStore`. Time is paused, so backoff and poll sleeps
//! advance instantly, and leases and failure marks age on the same
//! paused clock.

use std::collections::HashSet;
use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::task::JoinSet;

use hostpool_cloud::sim::Operation;
use hostpool_cloud::{CloudError, HostGroupSpec, HostSpec, RequestContext, SimulatedCloud};
use hostpool_core::{
    AccountScope, HostGroupRef, HostPoolConfig, ProvisioningState, ResourceId, VirtualMachine,
};
use hostpool_placement::{
    HostPool, PlacementEngine, PlacementError, SeededRandom, VmPlacementRequest,
};
use hostpool_state::{Clock, StateStore, StoreFailureCache, StoreLock};

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=hostpool_placement=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Fixtures ─────────────────────────────────────────────────────

const CONFIG: &str = r#"
[retry]
group_creation_attempts = 3
vm_state_check_attempts = 5
lock_attempts = 10
backoff_unit_ms = 100

[provisioning]
min_poll_interval_secs = 10
max_poll_interval_secs = 30
max_vm_creation_attempts = 4

[sku_mappings]
Standard_D4s_v3 = "DSv3-Type1"
"#;

fn scope() -> AccountScope {
    AccountScope::new("AzurePublicCloud", "tenant-1", "sub-1", "rg-1")
}

fn config() -> HostPoolConfig {
    HostPoolConfig::from_toml_str(CONFIG).unwrap()
}

/// Tokio's clock in milliseconds. Follows `tokio::time::pause`.
struct TokioClock {
    start: tokio::time::Instant,
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        1_000_000 + self.start.elapsed().as_millis() as u64
    }
}

struct Harness {
    cloud: Arc<SimulatedCloud>,
    ctx: RequestContext,
    pool: Arc<HostPool>,
}

impl Harness {
    fn new(cloud: SimulatedCloud) -> Self {
        Self::with_config(cloud, config())
    }

    fn with_config(cloud: SimulatedCloud, config: HostPoolConfig) -> Self {
        init_tracing();
        let cloud = Arc::new(cloud);
        let store = StateStore::open_in_memory().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock {
            start: tokio::time::Instant::now(),
        });
        let lock = StoreLock::new(store.clone(), config.provisioning.lock_lease())
            .with_clock(clock.clone());
        let failures = StoreFailureCache::new(store).with_clock(clock);
        let engine =
            PlacementEngine::new(&config, cloud.clone(), Arc::new(lock), Arc::new(failures))
                .with_random(Arc::new(SeededRandom::new(2024)));
        let pool = HostPool::new(&config, engine);
        Self {
            ctx: RequestContext::new(scope(), cloud.clone()),
            cloud,
            pool: Arc::new(pool),
        }
    }

    fn seed_dhg1(&self) {
        self.cloud.seed_host_group(
            &scope(),
            &HostGroupSpec {
                name: "dhg-1".to_string(),
                location: "westus2".to_string(),
                platform_fault_domain_count: 1,
                zone: None,
            },
        );
    }

    fn seed_host(&self, name: &str) -> ResourceId {
        self.cloud
            .seed_host(
                &scope(),
                &HostSpec {
                    group_name: "dhg-1".to_string(),
                    name: name.to_string(),
                    sku: "DSv3-Type1".to_string(),
                    location: "westus2".to_string(),
                },
            )
            .unwrap()
            .id
    }
}

fn dhg1() -> HostGroupRef {
    HostGroupRef::new("dhg-1", "westus2")
}

fn vm_request(name: &str) -> VmPlacementRequest {
    VmPlacementRequest::new(dhg1(), VirtualMachine::new(name, "westus2", "Standard_D4s_v3"))
}

// ── Scenarios ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn empty_group_gets_exactly_one_host_for_the_vm() {
    let h = Harness::new(SimulatedCloud::new());
    h.seed_dhg1();

    let outcome = h.pool.place_vm(&h.ctx, vm_request("vm-1")).await.unwrap();

    assert!(outcome.is_succeeded());
    assert_eq!(h.cloud.calls(Operation::CreateHost), 1);
    let hosts = h.cloud.hosts_in_group(&scope(), "dhg-1");
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].sku, "DSv3-Type1");
    assert_eq!(outcome.vm().host_id.as_ref(), Some(&hosts[0].id));
    assert_eq!(h.pool.engine().hosts_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn host_with_room_is_used_without_creating_one() {
    let h = Harness::new(SimulatedCloud::new());
    h.seed_dhg1();
    let h1 = h.seed_host("h1");

    let host = h
        .pool
        .find_host_for_placement(&h.ctx, &mut dhg1(), "Standard_D4s_v3", &HashSet::new())
        .await
        .unwrap();

    assert_eq!(host, h1);
    assert_eq!(h.cloud.calls(Operation::CreateHost), 0);
    // The group id is only resolved to key the lock.
    assert_eq!(h.cloud.calls(Operation::GetHostGroup), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_vm_moves_off_its_host() {
    let h = Harness::new(SimulatedCloud::new());
    h.seed_dhg1();
    let h1 = h.seed_host("h1");
    h.cloud.script_vm_states("vm-1", [ProvisioningState::Failed]);

    let outcome = h.pool.place_vm(&h.ctx, vm_request("vm-1")).await.unwrap();

    assert!(outcome.is_succeeded());
    assert_eq!(outcome.attempts(), 2);
    let landed = outcome.vm().host_id.clone().unwrap();
    assert_ne!(landed, h1);
    assert_eq!(h.cloud.calls(Operation::DeallocateVm), 1);
    assert_eq!(h.cloud.calls(Operation::StartVm), 1);
    assert!(h.pool.engine().failures().is_failed(&h1).await.unwrap());

    // h1 is empty again but stays excluded while its mark is live.
    assert_eq!(h.cloud.host_load(&h1), 0);
    let next = h
        .pool
        .find_host_for_placement(&h.ctx, &mut dhg1(), "Standard_D4s_v3", &HashSet::new())
        .await
        .unwrap();
    assert_ne!(next, h1);

    // Once the 600 s mark lapses, h1 is offered again.
    tokio::time::sleep(Duration::from_secs(601)).await;
    assert!(!h.pool.engine().failures().is_failed(&h1).await.unwrap());
    let after_ttl = h
        .pool
        .find_host_for_placement(&h.ctx, &mut dhg1(), "Standard_D4s_v3", &HashSet::from([landed]))
        .await
        .unwrap();
    assert_eq!(after_ttl, h1);
}

#[tokio::test(start_paused = true)]
async fn attempts_are_bounded_and_exhaustion_is_reported() {
    let h = Harness::new(SimulatedCloud::new());
    h.seed_dhg1();
    h.seed_host("h1");
    h.cloud
        .script_vm_states("vm-1", std::iter::repeat_n(ProvisioningState::Pending, 20));

    let outcome = h.pool.place_vm(&h.ctx, vm_request("vm-1")).await.unwrap();

    assert!(!outcome.is_succeeded());
    assert_eq!(outcome.attempts(), 4);
    assert_eq!(outcome.vm().provisioning_state, ProvisioningState::Pending);
    assert_eq!(h.cloud.calls(Operation::GetVm), 4);
    assert_eq!(h.cloud.calls(Operation::CreateVm), 1);
}

#[tokio::test(start_paused = true)]
async fn fatal_create_error_halts_the_loop() {
    let h = Harness::new(SimulatedCloud::new());
    h.seed_dhg1();
    h.seed_host("h1");
    h.cloud.inject_fault(
        Operation::CreateVm,
        CloudError::new(400, "InvalidParameter", "image not found"),
    );

    let err = h.pool.place_vm(&h.ctx, vm_request("vm-1")).await.unwrap_err();

    assert!(matches!(err, PlacementError::Cloud(ref e) if e.code == "InvalidParameter"));
    assert_eq!(h.cloud.calls(Operation::CreateVm), 1);
    assert_eq!(h.cloud.calls(Operation::GetVm), 0);
}

#[tokio::test(start_paused = true)]
async fn full_hosts_lead_to_a_new_host() {
    let h = Harness::new(SimulatedCloud::new().with_host_capacity("DSv3-Type1", 1));
    h.seed_dhg1();
    let h1 = h.seed_host("h1");

    let first = h.pool.place_vm(&h.ctx, vm_request("vm-1")).await.unwrap();
    let second = h.pool.place_vm(&h.ctx, vm_request("vm-2")).await.unwrap();

    assert_eq!(first.vm().host_id.as_ref(), Some(&h1));
    let second_host = second.vm().host_id.clone().unwrap();
    assert_ne!(second_host, h1);
    assert_eq!(h.cloud.hosts_in_group(&scope(), "dhg-1").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_create_a_single_host() {
    let h = Harness::new(SimulatedCloud::new().with_latency(Duration::from_millis(50)));
    h.seed_dhg1();

    let mut tasks = JoinSet::new();
    for _ in 0..5 {
        let pool = h.pool.clone();
        let ctx = h.ctx.clone();
        tasks.spawn(async move {
            pool.find_host_for_placement(&ctx, &mut dhg1(), "Standard_D4s_v3", &HashSet::new())
                .await
        });
    }

    let mut hosts = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        hosts.insert(joined.unwrap().unwrap());
    }

    assert_eq!(hosts.len(), 1);
    assert_eq!(h.cloud.calls(Operation::CreateHost), 1);
    assert_eq!(h.cloud.hosts_in_group(&scope(), "dhg-1").len(), 1);
    assert_eq!(h.pool.engine().hosts_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn lease_shorter_than_the_critical_section_still_serializes_creation() {
    // Three 700 ms calls run under the lock against a 1 s lease.
    let mut config = config();
    config.provisioning.lock_lease_secs = 1;
    let h = Harness::with_config(
        SimulatedCloud::new().with_latency(Duration::from_millis(700)),
        config,
    );
    h.seed_dhg1();

    let mut tasks = JoinSet::new();
    for _ in 0..2 {
        let pool = h.pool.clone();
        let ctx = h.ctx.clone();
        tasks.spawn(async move {
            pool.find_host_for_placement(&ctx, &mut dhg1(), "Standard_D4s_v3", &HashSet::new())
                .await
        });
    }

    let mut hosts = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        hosts.insert(joined.unwrap().unwrap());
    }

    assert_eq!(hosts.len(), 1);
    assert_eq!(h.cloud.calls(Operation::CreateHost), 1);
    assert_eq!(h.cloud.hosts_in_group(&scope(), "dhg-1").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn two_page_listing_returns_every_group_once() {
    let h = Harness::new(SimulatedCloud::new().with_page_size(2));
    for name in ["dhg-a", "dhg-b", "dhg-c", "dhg-d"] {
        h.pool
            .create_host_group(&h.ctx, &HostGroupRef::new(name, "westus2"))
            .await
            .unwrap();
    }

    let groups = h.pool.list_host_groups(&h.ctx).await.unwrap();

    let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["dhg-a", "dhg-b", "dhg-c", "dhg-d"]);
    assert_eq!(h.cloud.calls(Operation::ListHostGroups), 2);
}

#[tokio::test(start_paused = true)]
async fn admin_round_trip() {
    init_tracing();
    let cloud = Arc::new(SimulatedCloud::new());
    let ctx = RequestContext::new(scope(), cloud.clone());
    let pool = HostPool::with_store(&config(), cloud.clone(), StateStore::open_in_memory().unwrap());
    let group = dhg1().with_fault_domains(2);

    pool.create_host_group(&ctx, &group).await.unwrap();
    pool.create_host(&ctx, &group, "dhg-1-host-a", "DSv3-Type1")
        .await
        .unwrap();
    let fetched = pool.get_host_group(&ctx, "dhg-1").await.unwrap();
    assert_eq!(fetched.platform_fault_domain_count, 2);
    assert_eq!(pool.list_hosts(&ctx, "dhg-1").await.unwrap().len(), 1);

    pool.delete_host(&ctx, "dhg-1", "dhg-1-host-a").await.unwrap();
    pool.delete_host_group(&ctx, "dhg-1").await.unwrap();
    assert!(pool.list_host_groups(&ctx).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_scope_fails_before_any_network_call() {
    let h = Harness::new(SimulatedCloud::new());
    let blank = RequestContext::new(
        AccountScope::new("AzurePublicCloud", "tenant-1", "", "rg-1"),
        h.cloud.clone(),
    );
    let group = dhg1();

    let results = [
        h.pool.create_host_group(&blank, &group).await.err(),
        h.pool.create_host(&blank, &group, "h1", "DSv3-Type1").await.err(),
        h.pool.place_vm(&blank, vm_request("vm-1")).await.err(),
        h.pool
            .find_host_for_placement(&blank, &mut dhg1(), "Standard_D4s_v3", &HashSet::new())
            .await
            .err(),
        h.pool.list_host_groups(&blank).await.err(),
        h.pool.delete_host_group(&blank, "dhg-1").await.err(),
        h.pool.delete_host(&blank, "dhg-1", "h1").await.err(),
    ];
    for result in results {
        assert!(matches!(result, Some(PlacementError::Validation(_))));
    }

    let ops = [
        Operation::CreateHostGroup,
        Operation::GetHostGroup,
        Operation::ListHostGroups,
        Operation::DeleteHostGroup,
        Operation::CreateHost,
        Operation::DeleteHost,
        Operation::CreateVm,
        Operation::SelectHost,
    ];
    assert!(ops.iter().all(|op| h.cloud.calls(*op) == 0));
}

#[tokio::test(start_paused = true)]
async fn unmapped_vm_sku_is_a_configuration_error() {
    let h = Harness::new(SimulatedCloud::new());
    h.seed_dhg1();
    let request = VmPlacementRequest::new(
        dhg1(),
        VirtualMachine::new("vm-1", "westus2", "Standard_M128s"),
    );

    let err = h.pool.place_vm(&h.ctx, request).await.unwrap_err();

    assert!(matches!(err, PlacementError::MissingSkuMapping(ref sku) if sku == "Standard_M128s"));
    assert!(!err.is_retryable());
    assert_eq!(h.cloud.calls(Operation::CreateHost), 0);
}
