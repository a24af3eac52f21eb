//! Lookup of a resource's authoritative state by identifier.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::SharedClient;
use crate::error::{ClientError, ConvergeError, ReconcileError, Result};
use crate::resource::{LookupStrategy, RemoteState, ResourceIdentifier, ResourceType};
use crate::wait::Probe;

use super::list::ListFinder;

/// Outcome of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The resource exists.
    Found(RemoteState),
    /// The resource does not exist. This is not an error.
    NotFound,
}

impl Lookup {
    /// Returns the remote state, if found.
    #[must_use]
    pub fn into_state(self) -> Option<RemoteState> {
        match self {
            Self::Found(state) => Some(state),
            Self::NotFound => None,
        }
    }

    /// Returns true if the resource exists.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Resolves identifiers to remote state.
///
/// A finder distinguishes three outcomes: the resource exists, the resource
/// does not exist, and the lookup itself failed.
#[async_trait]
pub trait Finder: Send + Sync {
    /// Looks up a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider could not answer.
    async fn find(&self, id: &ResourceIdentifier) -> Result<Lookup>;
}

/// Finder using the type's describe operation.
#[derive(Debug, Clone)]
pub struct DirectFinder {
    client: SharedClient,
    resource: Arc<dyn ResourceType>,
}

impl DirectFinder {
    /// Creates a describe-by-identifier finder.
    #[must_use]
    pub fn new(client: SharedClient, resource: Arc<dyn ResourceType>) -> Self {
        Self { client, resource }
    }
}

#[async_trait]
impl Finder for DirectFinder {
    async fn find(&self, id: &ResourceIdentifier) -> Result<Lookup> {
        let operation = self.resource.describe_operation();
        let request = self.resource.identity_request(id);

        let response = match self.client.invoke(&operation, request).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                debug!("{id} not found by {operation}");
                return Ok(Lookup::NotFound);
            }
            Err(e) => return Err(e.into()),
        };

        let body = self.resource.unwrap_response(response);
        let status = self.resource.status_of(&body);
        Ok(RemoteState::new(id.clone(), status, body).map_or(Lookup::NotFound, Lookup::Found))
    }
}

/// Selects the finder declared by the resource type.
#[must_use]
pub fn finder_for(resource: Arc<dyn ResourceType>, client: SharedClient) -> Arc<dyn Finder> {
    match resource.lookup() {
        LookupStrategy::Direct => Arc::new(DirectFinder::new(client, resource)),
        LookupStrategy::List(list) => Arc::new(ListFinder::new(client, resource, list)),
    }
}

/// Looks a resource up, treating "not found" as "not yet visible".
///
/// Retries up to `checks` times, `interval` apart, and returns the last
/// outcome. Cancellation ends the retries early.
///
/// # Errors
///
/// Returns an error if a lookup fails or the wait is cancelled.
pub async fn find_visible(
    finder: &dyn Finder,
    id: &ResourceIdentifier,
    checks: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<Lookup> {
    let checks = checks.max(1);
    for attempt in 1..=checks {
        let lookup = finder.find(id).await?;
        if lookup.is_found() || attempt == checks {
            return Ok(lookup);
        }

        debug!("{id} not visible yet (check {attempt}/{checks})");
        tokio::select! {
            () = cancel.cancelled() => {
                return Err(ReconcileError::Aborted {
                    reason: format!("lookup of {id} cancelled"),
                }
                .into());
            }
            () = tokio::time::sleep(interval) => {}
        }
    }
    Ok(Lookup::NotFound)
}

/// Runs one status probe through a finder.
///
/// # Errors
///
/// Returns the classified client error if the lookup failed.
pub async fn probe(
    finder: &dyn Finder,
    resource: &dyn ResourceType,
    id: &ResourceIdentifier,
) -> std::result::Result<Probe, ClientError> {
    match finder.find(id).await {
        Ok(Lookup::Found(state)) => Ok(Probe {
            status: state.status().clone(),
            diagnostic: resource.status_reason(state.attributes()),
            state: Some(state),
        }),
        Ok(Lookup::NotFound) => Ok(Probe::not_found()),
        Err(ConvergeError::Client(e)) => Err(e),
        Err(e) => Err(ClientError::fatal(resource.describe_operation().name, e.to_string())),
    }
}
