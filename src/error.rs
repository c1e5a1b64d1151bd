//! Error types for the Halyard provisioning engine.
//!
//! This module provides the error hierarchy for every phase of a run:
//! configuration loading, graph validation, planning, provider calls,
//! execution and state management.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Halyard provisioning engine.
#[derive(Debug, Error)]
pub enum HalyardError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Desired graph validation errors.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Plan execution errors.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

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

    /// A configuration field holds an invalid value.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of the problem.
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

    /// A `--var` override could not be parsed.
    #[error("Invalid variable override '{raw}': expected NAME=VALUE")]
    InvalidOverride {
        /// The raw override text.
        raw: String,
    },
}

/// Errors found while building the desired graph.
///
/// All of these are raised before any provider call is made.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Two resources share the same `(type, name)` identity.
    #[error("Duplicate resource identity: {id}")]
    DuplicateResource {
        /// The duplicated identity.
        id: String,
    },

    /// A reference points at a resource that is not declared.
    #[error("Resource {resource} references undeclared resource in '{reference}'")]
    UnresolvedReference {
        /// Resource holding the reference (or `output.<name>`).
        resource: String,
        /// The reference text.
        reference: String,
    },

    /// An interpolation could not be parsed.
    #[error("Resource {resource} has a malformed reference '{expression}'")]
    MalformedReference {
        /// Resource holding the expression.
        resource: String,
        /// The offending expression.
        expression: String,
    },

    /// The reference graph contains a cycle.
    #[error("Reference cycle detected: {cycle}")]
    Cycle {
        /// The cycle path, e.g. `a.x -> b.y -> a.x`.
        cycle: String,
    },

    /// A variable without a default was not given a value.
    #[error("Variable '{name}' has no default and was not set")]
    MissingVariable {
        /// Name of the variable.
        name: String,
    },

    /// A reference names a variable that is not declared.
    #[error("Resource {resource} references undeclared variable '{name}'")]
    UndeclaredVariable {
        /// Resource holding the reference.
        resource: String,
        /// Name of the variable.
        name: String,
    },

    /// A variable value does not match its declared type.
    #[error("Variable '{name}' expects {expected}, got {found}")]
    VariableTypeMismatch {
        /// Name of the variable.
        name: String,
        /// Declared type.
        expected: String,
        /// Type of the supplied value.
        found: String,
    },

    /// The resource type is not known to the schema catalog.
    #[error("Resource {id} has unsupported type '{resource_type}'")]
    UnsupportedResourceType {
        /// Identity of the resource.
        id: String,
        /// The unknown type.
        resource_type: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Two desired resources collide on a provider-enforced unique attribute.
    #[error("{first} and {second} both set {resource_type}.{attribute} = {value}")]
    Conflict {
        /// Resource type holding the constraint.
        resource_type: String,
        /// The unique attribute.
        attribute: String,
        /// The colliding value.
        value: String,
        /// First resource (declaration order).
        first: String,
        /// Second resource.
        second: String,
    },

    /// A reference names an attribute that neither config nor state knows.
    #[error("Resource {resource} references unknown attribute '{reference}'")]
    UnknownAttribute {
        /// Resource holding the reference.
        resource: String,
        /// The reference text.
        reference: String,
    },

    /// Dependency resolution failed.
    #[error("Failed to resolve dependencies: {message}")]
    DependencyResolutionFailed {
        /// Description of the dependency issue.
        message: String,
    },
}

/// Provider API errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Authentication failed.
    #[error("Provider authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// Rate limited.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The provider is temporarily unavailable.
    #[error("Provider unavailable ({status}): {message}")]
    Unavailable {
        /// HTTP-like status code.
        status: u16,
        /// Message from the provider.
        message: String,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// The provider rejected the request permanently.
    #[error("Provider rejected request ({status}): {message}")]
    Rejected {
        /// HTTP-like status code.
        status: u16,
        /// Message from the provider, verbatim.
        message: String,
    },

    /// The resource does not exist on the provider side.
    #[error("{resource_type} '{id}' not found")]
    NotFound {
        /// Resource type.
        resource_type: String,
        /// Provider-assigned id.
        id: String,
    },

    /// The simulated cloud could not be loaded or saved.
    #[error("Simulated cloud storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// Invalid response from the provider.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Plan execution errors.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A provider call failed permanently.
    #[error("{action} {resource} failed: {source}")]
    ActionFailed {
        /// Action kind.
        action: String,
        /// Resource identity.
        resource: String,
        /// Underlying provider error.
        source: ProviderError,
    },

    /// Transient failures persisted past the retry budget.
    #[error("{resource}: giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Resource identity.
        resource: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last transient error.
        last: ProviderError,
    },

    /// An action was about to start before one of its dependencies finished.
    #[error("{resource} scheduled before its dependency {dependency} completed")]
    OrderingViolation {
        /// Resource identity.
        resource: String,
        /// The unfinished dependency.
        dependency: String,
    },

    /// A reference could not be resolved against current state at apply time.
    #[error("{resource}: cannot resolve '{reference}' against current state")]
    UnresolvedAtApply {
        /// Resource identity.
        resource: String,
        /// The reference text.
        reference: String,
    },

    /// The apply did not complete.
    #[error("Apply incomplete: {completed} of {total} actions completed")]
    Incomplete {
        /// Completed actions.
        completed: usize,
        /// Total planned actions.
        total: usize,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
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

    /// The held lock expired and was taken over, or removed.
    #[error("State lock {lock_id} is no longer held")]
    LockLost {
        /// Identifier of the lost lock.
        lock_id: String,
    },

    /// Local storage failure.
    #[error("State storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
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

    /// Stored state changed since it was read.
    #[error(
        "State changed out-of-band while applying {resource}: expected serial {expected}, found {found}"
    )]
    Conflict {
        /// Resource being written when the conflict was detected.
        resource: String,
        /// Serial this run last read or wrote.
        expected: u64,
        /// Serial currently stored.
        found: u64,
    },

    /// Resource is not recorded in state.
    #[error("Resource {id} is not in state")]
    UnknownResource {
        /// Resource identity.
        id: String,
    },
}

/// Result type alias for Halyard operations.
pub type Result<T> = std::result::Result<T, HalyardError>;

impl HalyardError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(err) => err.is_transient(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(err) => err.retry_after_secs(),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn invalid(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl ProviderError {
    /// Returns true for errors worth retrying with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Unavailable { .. } | Self::Network { .. }
        )
    }

    /// Returns the provider's retry hint in seconds, if any.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a permanent rejection.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(ProviderError::network("reset").is_transient());
        assert!(!ProviderError::rejected(400, "bad ami").is_transient());
        assert!(
            !ProviderError::NotFound {
                resource_type: String::from("aws_elb"),
                id: String::from("x"),
            }
            .is_transient()
        );
    }

    #[test]
    fn test_retry_delay_from_rate_limit() {
        let err = HalyardError::from(ProviderError::RateLimited { retry_after_secs: 7 });
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(7));
    }

    #[test]
    fn test_rejection_message_is_verbatim() {
        let err = ProviderError::rejected(400, "InvalidAMIID.Malformed: ami-x");
        assert!(err.to_string().contains("InvalidAMIID.Malformed: ami-x"));
    }
}
