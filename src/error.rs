//! Error types for the operator.
//!
//! Defines custom error types with classification for retry behavior.
//! Only startup errors (duplicate registration, TLS material, client
//! construction) terminate the process; everything else is contained and
//! retried by the dispatcher or surfaced as a request-scoped failure.

use thiserror::Error;

/// Error type for operator components
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Lease acquisition or renewal failed
    #[error("Leader election error: {0}")]
    LeaderElection(String),

    /// A controller name was registered twice
    #[error("Controller {0} is already registered")]
    DuplicateController(String),

    /// Work was enqueued for a controller that was never registered
    #[error("Unknown controller: {0}")]
    UnknownController(String),

    /// The remote cluster has no live connection in the tracker
    #[error("No connection to cluster {cluster}")]
    ClusterNotConnected { cluster: String },

    /// Establishing a connection to a remote cluster failed
    #[error("Failed to connect to cluster {cluster}: {message}")]
    RemoteConnect { cluster: String, message: String },

    /// Webhook TLS material could not be loaded
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Webhook HTTP server error
    #[error("Webhook server error: {0}")]
    WebhookServer(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::ClusterNotConnected { .. } | Error::RemoteConnect { .. } => true,
            Error::LeaderElection(_) => true,
            Error::MissingField(_)
            | Error::Validation(_)
            | Error::DuplicateController(_)
            | Error::UnknownController(_)
            | Error::TlsConfig(_)
            | Error::WebhookServer(_)
            | Error::Serialization(_) => false,
        }
    }
}

/// Result type alias for operator components
pub type Result<T> = std::result::Result<T, Error>;
