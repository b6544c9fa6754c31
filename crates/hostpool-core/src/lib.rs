pub mod config;
pub mod types;
pub mod validate;

pub use config::{HostPoolConfig, ProvisioningConfig, RetryConfig, SkuMapping};
pub use types::*;
pub use validate::{ValidationError, require};
