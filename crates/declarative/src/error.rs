//! Error types for the declarative engine
//!
//! Registration errors are configuration mistakes and surface synchronously
//! from the [`Manifest`](crate::Manifest) API. Resource errors are captured
//! per resource during a run and never abort the run as a whole.

use std::time::Duration;
use thiserror::Error;

use crate::resource::ResourceId;

/// Errors raised while building a manifest
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Another resource already hashes to the same ID
    #[error("resource already exists: {id}\n{attributes}")]
    DuplicateResource {
        /// The colliding ID
        id: ResourceId,
        /// Pretty-printed attributes of the rejected resource
        attributes: String,
    },

    /// A dependency passed to `add` is not registered
    #[error("dependency is not a valid resource: {0:?}")]
    UnknownDependency(ResourceId),

    /// The resource being modified is not part of the manifest
    #[error("unknown resource: {0}")]
    UnknownResource(ResourceId),

    /// A rename target is already used by another resource
    #[error("resource name already in use: {0}")]
    NameTaken(String),

    /// The descriptor declared an unusable kind name
    #[error("invalid resource kind {0:?}: must be non-empty ASCII alphanumeric")]
    InvalidKind(String),

    /// Attributes could not be serialized
    #[error("failed to serialize resource attributes: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Terminal error recorded against a single resource
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The descriptor rejected its own attributes
    #[error("{kind} [{operation}] preflight checks failed: {source:#}")]
    Preflight {
        kind: String,
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// The descriptor's side effect failed
    #[error("{kind} [{operation}] failed: {source:#}")]
    Run {
        kind: String,
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// An upstream dependency ended Failed or DependencyFailed
    #[error("upstream dependency {dependency} returned an error")]
    DependencyFailed { dependency: ResourceId },

    /// Dependencies were still pending when the deadline passed
    #[error("resource {id} gave up waiting for dependencies after {waited:?}")]
    WaitTimeout { id: ResourceId, waited: Duration },

    /// A dependency name never resolved to a registered resource
    #[error("dependency {dependency} is not part of the manifest")]
    UnknownDependency { dependency: ResourceId },

    /// The run was cancelled before the resource got to run
    #[error("run cancelled before resource started")]
    Cancelled,

    /// The descriptor panicked
    #[error("{kind} [{operation}] panicked: {message}")]
    Panicked {
        kind: String,
        operation: String,
        message: String,
    },

    /// The worker thread could not be started
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl ResourceError {
    /// Whether this error means the resource was never attempted
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::DependencyFailed { .. })
    }
}

/// Result type for registration operations
pub type Result<T> = std::result::Result<T, RegistrationError>;
