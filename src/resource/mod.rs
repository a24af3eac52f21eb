//! Resource model module.
//!
//! This module defines the data types of a single resource lifecycle, the
//! [`ResourceType`] interface the engine is generic over, its declarative
//! implementation, and the registry resolving type names.

mod declared;
mod kind;
mod registry;
mod types;

pub use declared::DeclaredResourceType;
pub use kind::{
    AttributeSemantics, LifecycleStage, ListLookup, LookupStrategy, MutationCall, ResourceType,
    WaitSpec,
};
pub use registry::ResourceRegistry;
pub use types::{
    DesiredInput, DesiredState, LocalState, PendingOperation, RemoteState, ResourceIdentifier,
    StatusTag,
};

#[cfg(test)]
pub(crate) use declared::tests::table_type;
