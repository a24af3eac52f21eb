//! Waiting for asynchronous provider operations to settle.
//!
//! Create, update and delete calls return before the provider has finished
//! the work. This module polls the resource's status until it reaches a
//! target status, a failure status, or the deadline.

mod backoff;
mod poller;

pub use backoff::Backoff;
pub use poller::{Probe, StatusPoller, WaitConfig, WaitOutcome};
