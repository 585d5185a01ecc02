//! Error types for the KFL Kubernetes operator.

use crate::quantity::QuantityError;
use crate::resources::Role;
use crate::validation::ValidationError;
use thiserror::Error;

/// Errors that can occur during operator operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Declaration rejected by the admission rules.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    /// A device resource string could not be turned into a quantity.
    #[error("Invalid resource quantity: {0}")]
    QuantityError(#[from] QuantityError),

    /// The FLCluster lacks the name or uid needed to own child objects.
    #[error("FLCluster {name} has no uid, cannot build owner reference")]
    MissingOwner {
        /// Cluster name.
        name: String,
    },

    /// Applying one role's objects failed.
    #[error("Reconciling {role} object {object} failed: {source}")]
    RoleFailed {
        /// Role being applied when the failure happened.
        role: Role,
        /// Key of the object being applied.
        object: String,
        /// Underlying failure.
        #[source]
        source: Box<OperatorError>,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

impl OperatorError {
    /// Attach role and object context to an error raised while applying a role.
    pub fn for_role(self, role: Role, object: impl Into<String>) -> Self {
        match self {
            already @ OperatorError::RoleFailed { .. } => already,
            other => OperatorError::RoleFailed {
                role,
                object: object.into(),
                source: Box::new(other),
            },
        }
    }

    /// Whether the platform rejected a write because of a stale resourceVersion.
    pub fn is_conflict(&self) -> bool {
        match self {
            OperatorError::KubeError(kube::Error::Api(err)) => err.code == 409,
            OperatorError::RoleFailed { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}
