//! Exponential backoff for control-plane calls and lock acquisition.
//!
//! ```text
//! attempt 1 fails → wait 2 units
//! attempt 2 fails → wait 4 units
//! attempt r fails → wait 2*r units
//! attempt max_attempts fails → the error propagates
//! ```
//!
//! Only errors the predicate calls retryable re-enter the cycle; anything
//! else propagates on first occurrence.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use hostpool_cloud::CloudError;
use hostpool_core::RetryConfig;
use hostpool_state::LockError;

use crate::error::PlacementError;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for CloudError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl Retryable for LockError {
    fn is_retryable(&self) -> bool {
        LockError::is_retryable(self)
    }
}

impl Retryable for PlacementError {
    fn is_retryable(&self) -> bool {
        PlacementError::is_retryable(self)
    }
}

/// Attempt ceiling plus backoff unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            unit,
        }
    }

    pub fn group_creation(config: &RetryConfig) -> Self {
        Self::new(config.group_creation_attempts, config.backoff_unit())
    }

    pub fn vm_state_check(config: &RetryConfig) -> Self {
        Self::new(config.vm_state_check_attempts, config.backoff_unit())
    }

    pub fn lock(config: &RetryConfig) -> Self {
        Self::new(config.lock_attempts, config.backoff_unit())
    }

    /// Wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.unit.saturating_mul(2 * attempt)
    }

    /// Run `op` under this policy, logging every retry.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        retry_with(
            self,
            |e: &E| e.is_retryable(),
            |attempt, delay, e: &E| {
                warn!(
                    operation,
                    attempt,
                    max_attempts = self.max_attempts,
                    delay = ?delay,
                    error = %e,
                    "retrying after transient error"
                );
            },
            op,
        )
        .await
    }
}

/// Higher-order retry: `is_retryable` classifies, `on_retry` observes each
/// scheduled retry as `(attempt, delay, error)`.
pub async fn retry_with<T, E, F, Fut, P, C>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut on_retry: C,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    C: FnMut(u32, Duration, &E),
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                on_retry(attempt, delay, &e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
