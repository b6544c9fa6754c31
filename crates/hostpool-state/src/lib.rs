//! hostpool-state — shared coordination state for placement.
//!
//! Backed by [redb](https://docs.rs/redb), holds the two pieces of state
//! concurrent placement flows share:
//!
//! - **Lock leases** keyed by host-group id. At most one live lease per
//!   key; a lease expires so a crashed holder cannot wedge its group.
//! - **Failed-host marks** keyed by host id, each with its own TTL. An
//!   expired mark reads as absent and is purged on the next read.
//!
//! The `DistributedLock` and `FailureCache` traits are the seams the
//! placement engine depends on; `StoreLock` and `StoreFailureCache` are
//! their store-backed implementations. The `StateStore` is `Clone` +
//! `Send` + `Sync` (backed by `Arc<Database>`) and can be shared across
//! async tasks.

pub mod clock;
pub mod error;
pub mod failure_cache;
pub mod lock;
pub mod store;
pub mod tables;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StateError, StateResult};
pub use failure_cache::{FailureCache, StoreFailureCache};
pub use lock::{DistributedLock, LockError, LockToken, StoreLock};
pub use store::StateStore;
pub use types::*;
