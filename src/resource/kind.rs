//! The per-resource-type interface.
//!
//! Everything the lifecycle engine needs to know about one kind of remote
//! resource (how to build requests, where the identifier and status live,
//! which attributes can change in place) is expressed through
//! [`ResourceType`]. The engine itself is generic over it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::client::{AttrValue, Attributes, Operation, OperationKind};
use crate::planner::DriftRecord;

use super::types::{DesiredState, RemoteState, ResourceIdentifier, StatusTag};

/// Lifecycle stages that end in an asynchronous wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    /// Waiting for a new resource to become usable.
    Create,
    /// Waiting for an in-place modification to settle.
    Update,
    /// Waiting for a resource to disappear.
    Delete,
}

impl LifecycleStage {
    /// Operation kind the stage waits on.
    #[must_use]
    pub const fn operation_kind(self) -> OperationKind {
        match self {
            Self::Create => OperationKind::Create,
            Self::Update => OperationKind::Update,
            Self::Delete => OperationKind::Delete,
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation_kind())
    }
}

/// Terminal statuses and timing for one lifecycle stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSpec {
    /// Statuses that complete the stage.
    pub target: Vec<StatusTag>,
    /// Statuses that fail the stage.
    pub failure: Vec<StatusTag>,
    /// Stage-specific timeout overriding the engine default.
    pub timeout: Option<Duration>,
    /// Stage-specific poll interval overriding the engine default.
    pub poll_interval: Option<Duration>,
}

impl WaitSpec {
    /// Default statuses for a stage.
    #[must_use]
    pub fn default_for(stage: LifecycleStage) -> Self {
        let target = match stage {
            LifecycleStage::Create | LifecycleStage::Update => vec![StatusTag::Available],
            LifecycleStage::Delete => vec![StatusTag::NotFound],
        };
        Self {
            target,
            failure: vec![StatusTag::Failed],
            timeout: None,
            poll_interval: None,
        }
    }
}

/// A single provider call issued as part of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationCall {
    /// Step name used in logs and partial-failure reports (e.g. `tag`).
    pub step: String,
    /// Operation to invoke.
    pub operation: Operation,
    /// Request payload.
    pub request: Attributes,
    /// Attributes this call converges.
    pub attributes: Vec<String>,
    /// Whether the resource must be settled before and after this call.
    pub requires_stable: bool,
}

/// How a resource is located by identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStrategy {
    /// The describe operation addresses the resource by identifier.
    Direct,
    /// The resource is found by listing and filtering.
    List(ListLookup),
}

/// Parameters of a list-then-filter lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListLookup {
    /// Listing operation.
    pub operation: Operation,
    /// Item attribute compared against the identifier.
    pub match_attribute: String,
    /// Response attribute holding the page of items.
    pub collection_attribute: String,
    /// Pagination token attribute, shared by request and response.
    pub page_token: Option<String>,
}

/// Comparison rules for a resource type's attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSemantics {
    /// Attributes that cannot change without replacing the resource.
    #[serde(default)]
    pub immutable: BTreeSet<String>,
    /// List attributes whose element order is significant.
    #[serde(default)]
    pub order_sensitive: BTreeSet<String>,
    /// Attributes set by the provider and never compared.
    #[serde(default)]
    pub computed: BTreeSet<String>,
    /// Provider defaults for attributes the user may omit.
    #[serde(default)]
    pub defaults: Attributes,
    /// When set, attributes outside this set cannot be updated in place.
    #[serde(default)]
    pub updatable: Option<BTreeSet<String>>,
}

impl AttributeSemantics {
    /// Returns true if a change to the attribute forces replacement.
    #[must_use]
    pub fn is_immutable(&self, attribute: &str) -> bool {
        self.immutable.contains(attribute)
            || self
                .updatable
                .as_ref()
                .is_some_and(|updatable| !updatable.contains(attribute))
    }

    /// Returns true if the attribute is provider-computed.
    #[must_use]
    pub fn is_computed(&self, attribute: &str) -> bool {
        self.computed.contains(attribute)
    }

    /// Returns true if element order matters for the attribute.
    #[must_use]
    pub fn is_order_sensitive(&self, attribute: &str) -> bool {
        self.order_sensitive.contains(attribute)
    }

    /// Returns the provider default for an attribute.
    #[must_use]
    pub fn default_for(&self, attribute: &str) -> Option<&AttrValue> {
        self.defaults.get(attribute)
    }
}

/// A kind of remote resource the engine can manage.
///
/// Implementations describe the provider API for the type; they never call
/// the provider themselves.
pub trait ResourceType: Send + Sync + fmt::Debug {
    /// Registered type name (e.g. `table`).
    fn type_name(&self) -> &str;

    /// Operation that creates the resource.
    fn create_operation(&self) -> Operation;

    /// Operation that describes one resource by identifier.
    fn describe_operation(&self) -> Operation;

    /// Operation that removes the resource.
    fn delete_operation(&self) -> Operation;

    /// Builds the create request from the desired attributes.
    ///
    /// `client_token` is unique per logical create and stable across its
    /// retries.
    fn build_create_request(&self, desired: &DesiredState, client_token: &str) -> Attributes;

    /// Extracts the identifier from a create response.
    fn identifier_from_response(&self, response: &Attributes) -> Option<ResourceIdentifier>;

    /// Builds a request addressing an existing resource.
    fn identity_request(&self, id: &ResourceIdentifier) -> Attributes;

    /// Builds the delete request.
    fn delete_request(&self, id: &ResourceIdentifier) -> Attributes {
        self.identity_request(id)
    }

    /// Strips any envelope from a describe response.
    fn unwrap_response(&self, response: Attributes) -> Attributes {
        response
    }

    /// Maps a describe payload to a status.
    fn status_of(&self, remote: &Attributes) -> StatusTag;

    /// Provider diagnostic explaining the current status, if any.
    fn status_reason(&self, _remote: &Attributes) -> Option<String> {
        None
    }

    /// Folds the authoritative remote state into local attributes.
    fn map_remote_to_local(&self, remote: &RemoteState) -> Attributes {
        remote.attributes().clone()
    }

    /// Attribute comparison rules.
    fn semantics(&self) -> &AttributeSemantics;

    /// Calls that converge the mutable drift of an existing resource.
    ///
    /// Only called when the drift record requires no replacement.
    fn update_calls(
        &self,
        id: &ResourceIdentifier,
        drift: &DriftRecord,
        desired: &DesiredState,
    ) -> Vec<MutationCall>;

    /// Calls that must follow a successful create (tagging, dependent features).
    fn post_create_steps(&self, _id: &ResourceIdentifier, _desired: &DesiredState) -> Vec<MutationCall> {
        Vec::new()
    }

    /// Terminal statuses and timing for a lifecycle stage.
    fn wait_spec(&self, stage: LifecycleStage) -> WaitSpec {
        WaitSpec::default_for(stage)
    }

    /// How resources of this type are located.
    fn lookup(&self) -> LookupStrategy {
        LookupStrategy::Direct
    }
}
