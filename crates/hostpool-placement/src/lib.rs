//! hostpool-placement — VM placement onto dedicated hosts.
//!
//! Places VMs onto dedicated hosts in a host group, creating hosts on
//! demand when the group runs out of room, and drives VM creation through
//! the platform's spurious `Failed` state by moving the VM elsewhere.
//!
//! # Architecture
//!
//! ```text
//! HostPool
//!   ├── VmProvisioner (per-VM create/poll loop)
//!   │     └── PlacementEngine
//!   │           ├── HostSelector    (lock-free capacity lookup)
//!   │           ├── DistributedLock (one host creation per group at a time)
//!   │           ├── FailureCache    (hosts excluded for a TTL)
//!   │           └── HostGroupAdmin  (host creation)
//!   └── HostGroupAdmin (create/list/delete groups and hosts)
//! ```
//!
//! Every control-plane call goes through a [`RetryPolicy`]; only transient
//! errors are retried. Randomness (host-name suffixes, poll jitter) comes
//! from an injected [`RandomSource`].

pub mod admin;
pub mod engine;
pub mod error;
pub mod pool;
pub mod provisioner;
pub mod random;
pub mod retry;

pub use admin::HostGroupAdmin;
pub use engine::PlacementEngine;
pub use error::{PlacementError, PlacementResult};
pub use pool::HostPool;
pub use provisioner::{ProvisionOutcome, VmPlacementRequest, VmProvisioner};
pub use random::{RandomSource, SeededRandom, ThreadRandom};
pub use retry::{RetryPolicy, Retryable, retry_with};
