//! Core lifecycle data types.
//!
//! These types describe one remote resource as seen from each side of a
//! reconciliation: the user's intent, the provider's authoritative snapshot,
//! and an asynchronous operation still in flight.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::client::{AttrValue, Attributes, OperationKind};
use crate::error::ReconcileError;

/// Opaque, stable identifier assigned by the provider at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceIdentifier(String);

impl ResourceIdentifier {
    /// Wraps a provider identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StatusTag {
    /// Provisioning has not finished.
    Creating,
    /// Ready for use.
    Available,
    /// A modification is in progress.
    Updating,
    /// Removal is in progress.
    Deleting,
    /// The provider reports a terminal failure.
    Failed,
    /// The resource does not exist.
    NotFound,
    /// An unmapped provider phase, treated as in progress.
    Other(String),
}

impl StatusTag {
    /// Maps a raw provider status to a tag.
    ///
    /// Matching is case-insensitive and treats `-` and spaces as `_`.
    /// Unknown values are kept verbatim as [`StatusTag::Other`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "creating" | "pending" | "provisioning" | "starting" | "in_progress" => Self::Creating,
            "available" | "active" | "ready" | "running" | "in_service" | "inservice"
            | "enabled" | "deployed" | "succeeded" => Self::Available,
            "updating" | "modifying" | "updating_in_progress" => Self::Updating,
            "deleting" | "terminating" | "shutting_down" => Self::Deleting,
            "failed" | "error" | "create_failed" | "update_failed" | "delete_failed"
            | "inaccessible_encryption_credentials" => Self::Failed,
            "not_found" | "notfound" | "deleted" | "terminated" => Self::NotFound,
            _ => Self::Other(raw.to_string()),
        }
    }

    /// Returns true for tags that are neither stable nor terminal.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Updating | Self::Deleting | Self::Other(_)
        )
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Failed => "failed",
            Self::NotFound => "not_found",
            Self::Other(raw) => raw,
        };
        write!(f, "{s}")
    }
}

impl From<String> for StatusTag {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<StatusTag> for String {
    fn from(value: StatusTag) -> Self {
        value.to_string()
    }
}

/// The user's intent for one resource instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredState(Attributes);

impl DesiredState {
    /// Wraps a desired attribute mapping.
    #[must_use]
    pub const fn new(attributes: Attributes) -> Self {
        Self(attributes)
    }

    /// Returns the desired attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.0
    }

    /// Returns a single desired attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.0.get(name)
    }
}

impl From<Attributes> for DesiredState {
    fn from(attributes: Attributes) -> Self {
        Self(attributes)
    }
}

/// Authoritative snapshot of a resource as reported by the provider.
///
/// Never carries [`StatusTag::NotFound`]: a missing resource is reported
/// by the lookup layer as its own outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteState {
    id: ResourceIdentifier,
    status: StatusTag,
    attributes: Attributes,
}

impl RemoteState {
    /// Builds a snapshot, or `None` if the status says the resource is gone.
    #[must_use]
    pub fn new(id: ResourceIdentifier, status: StatusTag, attributes: Attributes) -> Option<Self> {
        if status == StatusTag::NotFound {
            return None;
        }
        Some(Self {
            id,
            status,
            attributes,
        })
    }

    /// Returns the resource identifier.
    #[must_use]
    pub const fn id(&self) -> &ResourceIdentifier {
        &self.id
    }

    /// Returns the observed status.
    #[must_use]
    pub const fn status(&self) -> &StatusTag {
        &self.status
    }

    /// Returns the observed attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// Input to a single lifecycle pass.
#[derive(Debug, Clone)]
pub struct DesiredInput {
    /// Attributes the resource should have.
    pub desired: DesiredState,
    /// Identifier recorded by the last apply, if any.
    pub previous_id: Option<ResourceIdentifier>,
}

impl DesiredInput {
    /// Input for a resource that has never been created.
    #[must_use]
    pub const fn new(desired: DesiredState) -> Self {
        Self {
            desired,
            previous_id: None,
        }
    }

    /// Sets the identifier recorded by the last apply.
    #[must_use]
    pub fn with_previous_id(mut self, id: ResourceIdentifier) -> Self {
        self.previous_id = Some(id);
        self
    }
}

/// Attributes folded into local state after a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalState {
    /// Resource identifier.
    pub id: ResourceIdentifier,
    /// Status observed when the state was folded.
    pub status: StatusTag,
    /// Folded attributes.
    pub attributes: Attributes,
}

/// An asynchronous provider operation that has not settled yet.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    id: ResourceIdentifier,
    kind: OperationKind,
    target: HashSet<StatusTag>,
    failure: HashSet<StatusTag>,
}

impl PendingOperation {
    /// Creates a pending operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the target set is empty, the failure set is
    /// empty, or the two sets overlap.
    pub fn new(
        id: ResourceIdentifier,
        kind: OperationKind,
        target: impl IntoIterator<Item = StatusTag>,
        failure: impl IntoIterator<Item = StatusTag>,
    ) -> std::result::Result<Self, ReconcileError> {
        let target: HashSet<StatusTag> = target.into_iter().collect();
        let failure: HashSet<StatusTag> = failure.into_iter().collect();

        if target.is_empty() {
            return Err(ReconcileError::InvalidPendingOperation {
                message: format!("{kind} on {id} has no target status"),
            });
        }
        if failure.is_empty() {
            return Err(ReconcileError::InvalidPendingOperation {
                message: format!("{kind} on {id} has no failure status"),
            });
        }
        if let Some(overlap) = target.intersection(&failure).next() {
            return Err(ReconcileError::InvalidPendingOperation {
                message: format!("{kind} on {id}: status {overlap} is both target and failure"),
            });
        }

        Ok(Self {
            id,
            kind,
            target,
            failure,
        })
    }

    /// Returns the resource being awaited.
    #[must_use]
    pub const fn id(&self) -> &ResourceIdentifier {
        &self.id
    }

    /// Returns the operation kind.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Returns true if the status completes the operation.
    #[must_use]
    pub fn is_target(&self, status: &StatusTag) -> bool {
        self.target.contains(status)
    }

    /// Returns true if the status authoritatively fails the operation.
    #[must_use]
    pub fn is_failure(&self, status: &StatusTag) -> bool {
        self.failure.contains(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(StatusTag::parse("ACTIVE"), StatusTag::Available);
        assert_eq!(StatusTag::parse("in-progress"), StatusTag::Creating);
        assert_eq!(StatusTag::parse("Deleted"), StatusTag::NotFound);
        assert_eq!(
            StatusTag::parse("ARCHIVING"),
            StatusTag::Other(String::from("ARCHIVING"))
        );
        assert!(StatusTag::parse("ARCHIVING").is_in_progress());
    }

    #[test]
    fn test_status_serde_uses_display_names() {
        let yaml = serde_yaml::to_string(&StatusTag::NotFound).expect("serializes");
        assert_eq!(yaml.trim(), "not_found");

        let tag: StatusTag = serde_yaml::from_str("available").expect("deserializes");
        assert_eq!(tag, StatusTag::Available);
    }

    #[test]
    fn test_remote_state_rejects_not_found() {
        let id = ResourceIdentifier::new("t-1");
        assert!(RemoteState::new(id.clone(), StatusTag::NotFound, Attributes::new()).is_none());

        let state = RemoteState::new(id, StatusTag::Creating, Attributes::new())
            .expect("creating is a valid remote status");
        assert_eq!(state.status(), &StatusTag::Creating);
    }

    #[test]
    fn test_pending_operation_validates_sets() {
        let id = ResourceIdentifier::new("t-1");

        let empty = PendingOperation::new(id.clone(), OperationKind::Create, Vec::new(), [StatusTag::Failed]);
        assert!(matches!(empty, Err(ReconcileError::InvalidPendingOperation { .. })));

        let overlap = PendingOperation::new(
            id.clone(),
            OperationKind::Create,
            [StatusTag::Available, StatusTag::Failed],
            [StatusTag::Failed],
        );
        assert!(overlap.is_err());

        let delete = PendingOperation::new(
            id,
            OperationKind::Delete,
            [StatusTag::NotFound],
            [StatusTag::Failed],
        )
        .expect("valid sets");
        assert!(delete.is_target(&StatusTag::NotFound));
        assert!(delete.is_failure(&StatusTag::Failed));
        assert!(!delete.is_target(&StatusTag::Deleting));
    }
}
