//! Lifecycle orchestration for single resources.
//!
//! The [`Orchestrator`] drives create, update, delete and replace for one
//! resource at a time. Mutating calls go through a [`RetryPolicy`]; the
//! asynchronous tail of each call is awaited with the status poller.

mod lifecycle;
mod retry;

pub use lifecycle::{ApplyOutcome, DeleteOutcome, Orchestrator, OrchestratorSettings, UpdateOutcome};
pub use retry::RetryPolicy;
