//! Azure client errors

use thiserror::Error;

/// Errors that can occur when interacting with Azure Resource Manager
#[derive(Debug, Error)]
pub enum AzureError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// ARM returned an error response
    #[error("Azure API error ({status} {code}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// ARM error code (e.g. "SkuNotAvailable")
        code: String,
        /// ARM error message
        message: String,
    },

    /// Resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Token acquisition failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A long-running operation reached a failed terminal state
    #[error("Operation failed ({code}): {message}")]
    OperationFailed {
        /// ARM error code reported by the operation
        code: String,
        /// ARM error message reported by the operation
        message: String,
    },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The verb is not available in the selected cloud profile
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Invalid request (e.g., malformed resource ID or endpoint)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl AzureError {
    /// Whether the error means the resource does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            AzureError::NotFound(_) => true,
            AzureError::Api { status, code, .. } => {
                *status == 404 || code == "ResourceNotFound" || code == "ResourceGroupNotFound"
            }
            _ => false,
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AzureError::Http(_) => true,
            AzureError::Api { status, .. } => *status == 429 || *status >= 500,
            AzureError::OperationFailed { code, .. } => {
                matches!(code.as_str(), "InternalServerError" | "RetryableError" | "ServiceUnavailable" | "Conflict")
            }
            _ => false,
        }
    }

    /// ARM error code, if the error carries one
    pub fn code(&self) -> Option<&str> {
        match self {
            AzureError::Api { code, .. } | AzureError::OperationFailed { code, .. } => Some(code),
            _ => None,
        }
    }

    /// HTTP status, if the error came from an ARM response
    pub fn status(&self) -> Option<u16> {
        match self {
            AzureError::Api { status, .. } => Some(*status),
            AzureError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: &str) -> AzureError {
        AzureError::Api {
            status,
            code: code.to_string(),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_not_found_detection() {
        assert!(AzureError::NotFound("vm".to_string()).is_not_found());
        assert!(api(404, "NotFound").is_not_found());
        assert!(api(400, "ResourceGroupNotFound").is_not_found());
        assert!(!api(409, "Conflict").is_not_found());
    }

    #[test]
    fn test_retryable_detection() {
        assert!(api(503, "ServiceUnavailable").is_retryable());
        assert!(api(429, "TooManyRequests").is_retryable());
        assert!(!api(400, "InvalidParameter").is_retryable());
        assert!(!AzureError::Cancelled.is_retryable());
    }
}
