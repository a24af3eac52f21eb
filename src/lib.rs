// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll Converge
//!
//! A resource lifecycle reconciler for declarative infrastructure.
//!
//! ## Overview
//!
//! Converge drives remote control-plane resources to a declared state:
//!
//! - Describe resource types (operations, status mapping, attribute rules)
//!   once in `converge.yaml`
//! - Declare the resources you want in a desired-state document
//! - Plan the changes, then apply them with bounded parallelism
//! - Wait on asynchronous provider operations with backoff and timeouts
//!
//! ## Architecture
//!
//! Each resource goes through the same loop:
//!
//! 1. **Lookup**: find the remote resource by identifier or list scan
//! 2. **Drift**: compare desired attributes with the remote representation
//! 3. **Converge**: create, update, replace, or delete, then poll until the
//!    provider reports a target status
//! 4. **Record**: fold the result into local state
//!
//! ## Modules
//!
//! - [`client`]: Remote control-plane facade and HTTP client
//! - [`resource`]: Resource type definitions and the type registry
//! - [`wait`]: Status polling with backoff
//! - [`lookup`]: Finding remote resources
//! - [`orchestrator`]: Create, update, and delete lifecycles
//! - [`planner`]: Drift detection and plan classification
//! - [`reconciler`]: Plan, apply, refresh, and destroy over local state
//! - [`state`]: Local state file and lock
//! - [`config`]: Configuration parsing and validation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! client:
//!   endpoint: https://control.example.com/v1
//!
//! resource_types:
//!   - name: table
//!     operations:
//!       create: CreateTable
//!       describe: DescribeTable
//!       delete: DeleteTable
//!       update: UpdateTable
//!     identifier:
//!       attribute: name
//!     status:
//!       attribute: status
//!     attributes:
//!       immutable: [name, key_schema]
//!
//! resources:
//!   - name: orders
//!     type: table
//!     attributes:
//!       name: orders
//!       key_schema: id
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod lookup;
pub mod orchestrator;
pub mod planner;
pub mod reconciler;
pub mod resource;
pub mod state;
pub mod wait;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use client::{HttpClient, RemoteClient, SharedClient};
pub use config::{ConfigParser, ConfigValidator, ConvergeConfig, DesiredDocument, DesiredHasher};
pub use error::{ConvergeError, Result};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use planner::{DriftReconciler, ResourcePlan};
pub use reconciler::{ApplyOptions, ReconcileReport, Reconciler};
pub use resource::{ResourceRegistry, ResourceType};
pub use state::{LocalStateStore, StateFile, StateStore};
pub use wait::StatusPoller;
