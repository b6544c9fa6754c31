//! Placement error types.

use thiserror::Error;

use hostpool_cloud::CloudError;
use hostpool_core::ValidationError;
use hostpool_state::{LockError, StateError};

/// Errors that can occur during placement and host administration.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("invalid argument: {0}")]
    Validation(#[from] ValidationError),

    #[error("no host SKU mapping configured for VM SKU {0}")]
    MissingSkuMapping(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;

impl PlacementError {
    /// Transient control-plane and lock-store trouble. Validation and
    /// configuration errors never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlacementError::Cloud(e) => e.is_transient(),
            PlacementError::Lock(e) => e.is_retryable(),
            PlacementError::State(_) => true,
            PlacementError::Validation(_) | PlacementError::MissingSkuMapping(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_fatal() {
        let err = PlacementError::MissingSkuMapping("Standard_B2s".to_string());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "no host SKU mapping configured for VM SKU Standard_B2s"
        );
    }

    #[test]
    fn validation_errors_are_fatal() {
        let err = PlacementError::from(ValidationError::Missing("vm_name"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn cloud_errors_follow_their_classification() {
        assert!(PlacementError::from(CloudError::unavailable("busy")).is_retryable());
        assert!(!PlacementError::from(CloudError::new(400, "InvalidParameter", "x")).is_retryable());
    }

    #[test]
    fn lock_contention_is_retryable() {
        let err = PlacementError::from(LockError::Contended {
            key: "g".to_string(),
            holder: "other".to_string(),
        });
        assert!(err.is_retryable());
        assert!(!PlacementError::from(LockError::NotHeld("g".to_string())).is_retryable());
    }
}
