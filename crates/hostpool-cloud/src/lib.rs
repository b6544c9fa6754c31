//! hostpool-cloud — the control-plane boundary.
//!
//! The placement core never talks to a cloud SDK directly. It goes through
//! two collaborator traits defined here:
//!
//! - **`CloudResourceClient`** — create/get/list/delete for host groups,
//!   hosts, and VMs, failing with a classified [`CloudError`]
//! - **`HostSelector`** — the capacity predicate answering "which host in
//!   this group has room for this VM size"
//!
//! [`RequestContext`] carries the account scope and client handle for a
//! single call chain. [`sim::SimulatedCloud`] implements both traits in
//! memory for tests and dry runs.

pub mod client;
pub mod context;
pub mod error;
pub mod selector;
pub mod sim;

pub use client::{CloudResourceClient, HostGroupSpec, HostSpec};
pub use context::RequestContext;
pub use error::{CloudError, CloudResult};
pub use selector::HostSelector;
pub use sim::SimulatedCloud;
