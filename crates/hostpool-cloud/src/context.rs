//! Per-request context.

use std::fmt;
use std::sync::Arc;

use hostpool_core::{AccountScope, ValidationError};

use crate::client::CloudResourceClient;

/// Account scope plus an authenticated client handle for one call chain.
///
/// Built once by the caller and passed to every operation; nothing about
/// the account lives in process-wide state.
#[derive(Clone)]
pub struct RequestContext {
    pub scope: AccountScope,
    client: Arc<dyn CloudResourceClient>,
}

impl RequestContext {
    pub fn new(scope: AccountScope, client: Arc<dyn CloudResourceClient>) -> Self {
        Self { scope, client }
    }

    pub fn client(&self) -> &dyn CloudResourceClient {
        self.client.as_ref()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.scope.validate()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
