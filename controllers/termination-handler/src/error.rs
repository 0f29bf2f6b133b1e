//! Termination handler errors.

use thiserror::Error;

/// Errors that can occur while watching for scheduled termination.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Instance metadata endpoint unreachable
    #[error("metadata request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Instance metadata endpoint answered with an error
    #[error("metadata service returned {status}: {body}")]
    Metadata {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// The Node does not name its Machine
    #[error("node {0} has no machine annotation")]
    MachineNotAnnotated(String),

    /// Patch document could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
