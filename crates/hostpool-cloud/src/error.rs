//! Classified control-plane errors.

use thiserror::Error;

/// Result type alias for control-plane calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Error codes that mean "no capacity right now" rather than a real failure.
const ALLOCATION_CODES: &[&str] = &[
    "AllocationFailed",
    "ZonalAllocationFailed",
    "OverconstrainedAllocationRequest",
];

/// Error codes the control plane documents as safe to retry.
const TRANSIENT_CODES: &[&str] = &[
    "RetryableError",
    "InternalExecutionError",
    "OperationPreempted",
];

/// An error returned by the control plane: HTTP-like status plus error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cloud error {status} {code}: {message}")]
pub struct CloudError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl CloudError {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(404, "ResourceNotFound", format!("{resource} was not found"))
    }

    pub fn allocation_failed(message: impl Into<String>) -> Self {
        Self::new(409, "AllocationFailed", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(503, "ServiceUnavailable", message)
    }

    /// The capacity signal: this attempt made no progress, try again later.
    pub fn is_allocation_failure(&self) -> bool {
        ALLOCATION_CODES
            .iter()
            .any(|c| self.code.eq_ignore_ascii_case(c))
    }

    /// Transient control-plane trouble that backoff can ride out.
    pub fn is_transient(&self) -> bool {
        matches!(self.status, 408 | 429 | 500 | 502 | 503 | 504)
            || TRANSIENT_CODES
                .iter()
                .any(|c| self.code.eq_ignore_ascii_case(c))
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}
