//! Error types for the Object Cloner Operator

use thiserror::Error;

/// Result type for the operator
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(String),

    /// Optimistic concurrency failure (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The API server rejected the object (HTTP 422), usually an immutable field change
    #[error("Invalid object: {0}")]
    Invalid(String),

    /// A conflicting write kept failing after every retry attempt
    #[error("Gave up on {target} after {attempts} conflicting attempts")]
    RetriesExhausted { target: String, attempts: u32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Finalizer error
    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

impl Error {
    /// Whether the error is an optimistic concurrency failure
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Whether the error is a validation rejection from the API server
    pub fn is_invalid(&self) -> bool {
        matches!(self, Error::Invalid(_))
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(err))
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(resp.message),
            kube::Error::Api(resp) if resp.code == 422 => Error::Invalid(resp.message),
            other => Error::KubeError(other.to_string()),
        }
    }
}
