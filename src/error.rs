//! Error types for the Stackweave provisioning engine.
//!
//! Each layer of the engine owns one error enum: configuration and graph
//! declaration, state persistence, the provider boundary, per-node execution
//! failures, and deferred value resolution. [`StackweaveError`] wraps them all.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::graph::ResourceId;

/// The main error type for the Stackweave engine.
#[derive(Debug, Error)]
pub enum StackweaveError {
    /// Configuration-related errors. Always fatal before execution starts.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider errors raised outside of a node execution.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A node execution failure surfaced to the caller.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionFailure),

    /// Deferred value resolution errors.
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration and declaration errors.
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

    /// A required configuration key is missing.
    #[error("Missing required configuration key: {key}")]
    MissingKey {
        /// Name of the missing key.
        key: String,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Two resources were declared with the same logical identity.
    #[error("Duplicate resource declaration: {id}")]
    DuplicateResource {
        /// The duplicated identity.
        id: ResourceId,
    },

    /// A resource or export references an identity that was never declared.
    #[error("{from} references undeclared resource {missing}")]
    UnknownReference {
        /// The referencing resource or export.
        from: String,
        /// The undeclared identity.
        missing: ResourceId,
    },

    /// The dependency graph contains at least one cycle.
    #[error("Dependency cycle detected: {}", format_cycles(cycles))]
    Cycle {
        /// Every cycle found, each listing all of its members.
        cycles: Vec<Vec<ResourceId>>,
    },

    /// A declaration does not match the provider's schema for its type.
    #[error("Schema mismatch for {resource}: {message}")]
    SchemaMismatch {
        /// The offending resource.
        resource: ResourceId,
        /// Description of the mismatch.
        message: String,
    },

    /// A required input property was not declared.
    #[error("Resource {resource} is missing required input '{property}'")]
    MissingInput {
        /// The offending resource.
        resource: ResourceId,
        /// The missing property.
        property: String,
    },

    /// A lookup over resolved outputs found nothing.
    #[error("{what} '{name}' not found")]
    NotFound {
        /// Kind of thing looked up.
        what: String,
        /// Name that was looked up.
        name: String,
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

    /// Filesystem error in the state backend.
    #[error("State storage error: {message}")]
    Storage {
        /// Description of the storage error.
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
}

/// Errors reported by a provider for a single call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// A temporary failure; the call may succeed if retried.
    #[error("transient provider failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// Provider-suggested delay before retrying.
        retry_after: Option<Duration>,
    },

    /// The request can never succeed as issued.
    #[error("permanent provider failure: {message}")]
    Permanent {
        /// Description of the failure.
        message: String,
    },

    /// Credentials were rejected or lack permission.
    #[error("authorization failed: {message}")]
    Authorization {
        /// Description of the failure.
        message: String,
    },

    /// The provider has no record of the resource.
    #[error("resource not found: {provider_id}")]
    NotFound {
        /// Provider-assigned id that was looked up.
        provider_id: String,
    },
}

/// Terminal failure of a single node's operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionFailure {
    /// The provider rejected the operation.
    #[error("{0}")]
    Provider(ProviderError),

    /// Transient failures persisted past the retry budget.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last transient error seen.
        last: ProviderError,
    },

    /// The node's inputs could not be resolved into valid values.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// An input depended on a resource that did not resolve.
    #[error("blocked by {resource}: {cause}")]
    Blocked {
        /// The resource whose failure originated the block.
        resource: ResourceId,
        /// The originating failure.
        cause: String,
    },

    /// A delete-before-create replacement removed the old resource but
    /// failed to create its successor.
    #[error("replacement incomplete, previous instance already deleted: {cause}")]
    ReplaceIncomplete {
        /// Why the create failed.
        cause: String,
    },

    /// The node's task terminated abnormally.
    #[error("node task aborted: {message}")]
    Aborted {
        /// Description of the abort.
        message: String,
    },
}

/// Errors produced while resolving a deferred value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutputError {
    /// An upstream resource failed; carries the originating cause.
    #[error("blocked by failed dependency {resource}: {cause}")]
    Blocked {
        /// The resource whose failure originated the block.
        resource: ResourceId,
        /// The originating failure.
        cause: String,
    },

    /// An upstream resource never ran.
    #[error("dependency {resource} was cancelled: {reason}")]
    Cancelled {
        /// The cancelled resource.
        resource: ResourceId,
        /// Why it was cancelled.
        reason: String,
    },

    /// The upstream resource resolved without the requested property.
    #[error("resource {resource} has no output '{property}'")]
    MissingProperty {
        /// The upstream resource.
        resource: ResourceId,
        /// The requested property.
        property: String,
    },

    /// A transformation applied to a resolved value failed.
    #[error("{message}")]
    Transform {
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for Stackweave operations.
pub type Result<T> = std::result::Result<T, StackweaveError>;

fn format_cycles(cycles: &[Vec<ResourceId>]) -> String {
    cycles
        .iter()
        .map(|cycle| {
            cycle
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ")
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl StackweaveError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error aborts before any resource is touched.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_))
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
    /// Creates a storage error with the given message.
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

impl ProviderError {
    /// Creates a transient error without a retry hint.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Creates an authorization error.
    #[must_use]
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the provider-suggested retry delay, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<ProviderError> for ExecutionFailure {
    fn from(error: ProviderError) -> Self {
        Self::Provider(error)
    }
}

impl From<OutputError> for ExecutionFailure {
    fn from(error: OutputError) -> Self {
        match error {
            OutputError::Blocked { resource, cause } => Self::Blocked { resource, cause },
            OutputError::Cancelled { resource, reason } => Self::Blocked {
                resource,
                cause: reason,
            },
            other => Self::Configuration {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        let err = ProviderError::Transient {
            message: String::from("throttled"),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(!ProviderError::permanent("bad sku").is_retryable());
        assert!(!ProviderError::authorization("denied").is_retryable());
    }

    #[test]
    fn test_cycle_message_lists_members() {
        let err = ConfigError::Cycle {
            cycles: vec![vec![
                ResourceId::new("test:a", "a"),
                ResourceId::new("test:b", "b"),
            ]],
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected: test:a::a -> test:b::b"
        );
    }

    #[test]
    fn test_output_error_keeps_originating_cause() {
        let failure: ExecutionFailure = OutputError::Blocked {
            resource: ResourceId::new("test:db", "db"),
            cause: String::from("quota exceeded"),
        }
        .into();
        assert_eq!(
            failure,
            ExecutionFailure::Blocked {
                resource: ResourceId::new("test:db", "db"),
                cause: String::from("quota exceeded"),
            }
        );
    }
}
