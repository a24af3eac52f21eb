//! Remote control-plane client module.
//!
//! This module provides the capability-typed facade every lifecycle
//! operation goes through, its HTTP implementation, and the shared rate
//! limiter.

mod facade;
mod http;
mod limiter;
mod types;

#[cfg(test)]
pub(crate) mod scripted;

pub use facade::{RemoteClient, SharedClient};
pub use http::{HttpClient, HttpClientBuilder};
pub use limiter::RateLimiter;
pub use types::{
    attributes_from_json, attributes_to_json, AttrValue, Attributes, Operation, OperationKind,
};

#[cfg(test)]
pub(crate) use facade::MockRemoteClient;
