//! Error types for the converge engine.
//!
//! This module provides the error hierarchy for every layer of a resource
//! lifecycle: configuration, local state, the remote control-plane client,
//! status polling, and reconciliation.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::resource::{ResourceIdentifier, StatusTag};

/// The main error type for the converge engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Remote control-plane errors.
    #[error("Remote API error: {0}")]
    Client(#[from] ClientError),

    /// Status polling errors.
    #[error("Wait error: {0}")]
    Wait(#[from] WaitError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate definition.
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName {
        /// Kind of definition (resource type, resource).
        kind: String,
        /// The duplicated name.
        name: String,
    },

    /// A resource references a type that is not registered.
    #[error("Unknown resource type '{type_name}' for resource '{resource}'")]
    UnknownResourceType {
        /// Resource name from the desired-state document.
        resource: String,
        /// The unregistered type name.
        type_name: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Classified errors returned by the remote client facade.
///
/// The facade never retries; callers decide based on the class.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The provider asked us to slow down.
    #[error("{operation} throttled: {message}")]
    Throttled {
        /// Operation that was throttled.
        operation: String,
        /// Provider message.
        message: String,
        /// Suggested wait before retrying, in seconds.
        retry_after_secs: Option<u64>,
    },

    /// The addressed resource does not exist.
    #[error("{operation}: resource not found: {message}")]
    NotFound {
        /// Operation that failed.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// A concurrent modification is in flight on the same resource.
    #[error("{operation} conflicted with a concurrent modification: {message}")]
    Conflict {
        /// Operation that failed.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// The request was rejected as invalid.
    #[error("{operation} rejected as invalid: {message}")]
    InvalidInput {
        /// Operation that failed.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// Network failure or server-side error.
    #[error("{operation} failed transiently: {message}")]
    Transient {
        /// Operation that failed.
        operation: String,
        /// Description of the failure.
        message: String,
    },

    /// Unretryable semantic error.
    #[error("{operation} failed: {message}")]
    Fatal {
        /// Operation that failed.
        operation: String,
        /// Provider message.
        message: String,
    },
}

/// Errors produced by the status poller.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The deadline passed before a terminal status was observed.
    #[error(
        "Timed out after {elapsed:?} waiting for {id} (last status: {})",
        .last_status.as_ref().map_or_else(|| String::from("none"), ToString::to_string)
    )]
    TimedOut {
        /// Resource being awaited.
        id: ResourceIdentifier,
        /// Last status observed, if any probe succeeded.
        last_status: Option<StatusTag>,
        /// Last transient probe error, if any.
        last_error: Option<ClientError>,
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// The provider authoritatively reported a failure status.
    #[error("{id} reached failure status {status}{}", .diagnostic.as_ref().map_or_else(String::new, |d| format!(": {d}")))]
    FailureStatus {
        /// Resource being awaited.
        id: ResourceIdentifier,
        /// The failure status observed.
        status: StatusTag,
        /// Provider diagnostic, when available.
        diagnostic: Option<String>,
    },

    /// The probe failed with a non-retryable error.
    #[error("Status probe for {id} failed: {source}")]
    ProbeFailed {
        /// Resource being awaited.
        id: ResourceIdentifier,
        /// The probe error.
        source: ClientError,
    },

    /// The resource stayed invisible for too many consecutive probes.
    #[error("{id} was not found after {checks} consecutive checks")]
    NotFoundExhausted {
        /// Resource being awaited.
        id: ResourceIdentifier,
        /// Number of consecutive not-found observations.
        checks: u32,
    },

    /// The wait was cancelled by the caller.
    #[error(
        "Wait for {id} cancelled (last status: {})",
        .last_status.as_ref().map_or_else(|| String::from("none"), ToString::to_string)
    )]
    Cancelled {
        /// Resource being awaited.
        id: ResourceIdentifier,
        /// Last status observed.
        last_status: Option<StatusTag>,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The resource exists but a later stage failed.
    ///
    /// Carries the identifier so local state is never orphaned.
    #[error("{id} was created but {stage} failed: {source}")]
    PartiallyApplied {
        /// Identifier assigned by the provider.
        id: ResourceIdentifier,
        /// Stage that failed (e.g. `tag`, `wait`, `read`).
        stage: String,
        /// Underlying failure.
        source: Box<ConvergeError>,
    },

    /// An operation against an existing resource failed.
    #[error("{operation} on {} failed: {source}", .id.as_ref().map_or("<new resource>", ResourceIdentifier::as_str))]
    OperationFailed {
        /// Operation that was attempted.
        operation: String,
        /// Resource addressed, if known.
        id: Option<ResourceIdentifier>,
        /// Underlying failure.
        source: Box<ConvergeError>,
    },

    /// The create response did not carry an identifier.
    #[error("{operation} for {resource_type} returned no identifier")]
    MissingIdentifier {
        /// Resource type being created.
        resource_type: String,
        /// Operation that was invoked.
        operation: String,
    },

    /// The resource disappeared while being updated.
    #[error("Resource {id} no longer exists")]
    ResourceGone {
        /// Identifier that is no longer valid.
        id: ResourceIdentifier,
    },

    /// A list-then-filter lookup matched more than one resource.
    #[error("Lookup of {resource_type} by {attribute}={value} matched {matches} resources")]
    AmbiguousLookup {
        /// Resource type being looked up.
        resource_type: String,
        /// Attribute used to filter.
        attribute: String,
        /// Value filtered on.
        value: String,
        /// Number of matches.
        matches: usize,
    },

    /// A paginated listing ended before every page was read.
    #[error("Lookup of {resource_type} {value} incomplete after {pages} page(s): {reason}")]
    LookupIncomplete {
        /// Resource type being looked up.
        resource_type: String,
        /// Value filtered on.
        value: String,
        /// Pages read before stopping.
        pages: usize,
        /// Why the listing stopped.
        reason: String,
    },

    /// Mutation retries ran out.
    #[error("Maximum retry attempts ({attempts}) exceeded for {operation}: {source}")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Operation that kept failing.
        operation: String,
        /// Last error observed.
        source: ClientError,
    },

    /// A pending operation was built with invalid status sets.
    #[error("Invalid pending operation: {message}")]
    InvalidPendingOperation {
        /// Description of the problem.
        message: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the whole reconciliation may be retried by the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Client(e) => e.is_retryable(),
            Self::Wait(WaitError::TimedOut { .. }) | Self::State(StateError::LockFailed { .. }) => true,
            Self::Reconcile(
                ReconcileError::PartiallyApplied { source, .. }
                | ReconcileError::OperationFailed { source, .. },
            ) => source.is_retryable(),
            Self::Reconcile(ReconcileError::MaxRetriesExceeded { .. }) => true,
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Client(ClientError::Throttled { retry_after_secs, .. }) => {
                Some(retry_after_secs.unwrap_or(5))
            }
            Self::Client(ClientError::Transient { .. }) => Some(5),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            Self::Wait(WaitError::TimedOut { .. }) => Some(30),
            Self::Reconcile(
                ReconcileError::PartiallyApplied { source, .. }
                | ReconcileError::OperationFailed { source, .. },
            ) => source.retry_delay_secs(),
            _ => None,
        }
    }

    /// Returns the identifier of a resource that exists remotely despite this error.
    ///
    /// Callers must persist it so the resource is not orphaned.
    #[must_use]
    pub const fn resource_id(&self) -> Option<&ResourceIdentifier> {
        match self {
            Self::Reconcile(ReconcileError::PartiallyApplied { id, .. }) => Some(id),
            _ => None,
        }
    }

    /// Wraps this error with the operation and resource it was raised for.
    #[must_use]
    pub fn during(self, operation: impl Into<String>, id: Option<&ResourceIdentifier>) -> Self {
        Self::Reconcile(ReconcileError::OperationFailed {
            operation: operation.into(),
            id: id.cloned(),
            source: Box::new(self),
        })
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ClientError {
    /// Returns the name of the operation that failed.
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::Throttled { operation, .. }
            | Self::NotFound { operation, .. }
            | Self::Conflict { operation, .. }
            | Self::InvalidInput { operation, .. }
            | Self::Transient { operation, .. }
            | Self::Fatal { operation, .. } => operation,
        }
    }

    /// Returns true if the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for throttling and transient failures.
    ///
    /// Conflicts are retryable too but with a capped attempt count, which
    /// callers handle separately.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Transient { .. } | Self::Conflict { .. }
        )
    }

    /// Returns true if a status probe may simply be repeated.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Transient { .. })
    }

    /// Creates a transient error.
    #[must_use]
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
