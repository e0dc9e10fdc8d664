//! Error types for GraphOS resource provisioning

use thiserror::Error;

/// Main error type for registry and lifecycle operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Declared properties or handler output did not match their schema
    #[error("validation error: {0}")]
    Validation(String),

    /// The registry answered with a domain error (duplicate graph, bad SDL, ...)
    #[error("registry error: {0}")]
    Registry(String),

    /// Network failure, non-2xx status or undecodable body from the registry
    #[error("transport error: {0}")]
    Transport(String),

    /// Referenced graph, variant or account does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry reported that composition of a variant failed
    #[error("composition failed for variant {variant} of graph {graph_id}")]
    CompositionFailed { graph_id: String, variant: String },

    /// Composition did not complete before the deadline
    #[error("timed out waiting for variant {variant} of graph {graph_id} to be ready")]
    Timeout { graph_id: String, variant: String },

    /// A lifecycle call arrived out of order (update/delete before create)
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// No handler is registered for the event's resource type
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// The event's request type is not Create, Update or Delete
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The API key could not be resolved
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// Settings or input files are malformed
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a registry error with the given message
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a transport error with the given message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invariant violation with the given message
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create a missing-credential error with the given message
    pub fn missing_credential(msg: impl Into<String>) -> Self {
        Self::MissingCredential(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stable machine-readable name of the error category
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Registry(_) => "RegistryError",
            Self::Transport(_) => "TransportError",
            Self::NotFound(_) => "NotFoundError",
            Self::CompositionFailed { .. } => "CompositionFailedError",
            Self::Timeout { .. } => "TimeoutError",
            Self::InvariantViolation(_) => "InvariantViolation",
            Self::UnknownResourceType(_) => "UnknownResourceTypeError",
            Self::UnsupportedOperation(_) => "UnsupportedOperationError",
            Self::MissingCredential(_) => "MissingCredentialError",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
