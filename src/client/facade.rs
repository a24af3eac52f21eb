//! Capability-typed facade over the remote control plane.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::ClientError;

use super::types::{Attributes, Operation};

/// A client able to invoke control-plane operations.
///
/// Implementations classify every failure into a [`ClientError`] and never
/// retry: retryability depends on the semantics of the calling operation.
/// Implementations must be safe for concurrent use by many resource workers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Invokes a single operation.
    async fn invoke(
        &self,
        operation: &Operation,
        request: Attributes,
    ) -> std::result::Result<Attributes, ClientError>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// A client shared between every orchestrator in a run.
pub type SharedClient = Arc<dyn RemoteClient>;

impl fmt::Debug for dyn RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteClient({})", self.backend_type())
    }
}
