//! Controller-specific error types.
//!
//! Every error a reconcile can return maps onto an [`ErrorClass`], which
//! decides how the Machine status is updated and how the work is requeued.

use crate::naming::NamingError;
use crate::skus::SkuError;
use azure_client::AzureError;
use crds::ProviderConfigError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Machine controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Azure Resource Manager error
    #[error("Azure error: {0}")]
    Azure(#[from] AzureError),

    /// Resource name could not be generated
    #[error("Invalid resource name: {0}")]
    Naming(#[from] NamingError),

    /// Provider spec or status could not be decoded
    #[error("Invalid provider configuration: {0}")]
    ProviderConfig(#[from] ProviderConfigError),

    /// SKU lookup failed
    #[error("{0}")]
    Sku(#[from] SkuError),

    /// Credentials secret is incomplete
    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconcile was cancelled
    #[error("Reconcile cancelled")]
    Cancelled,

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Status or patch document could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a failed reconcile is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff; `MachineReady=False/TransientFailure`
    Transient,
    /// Terminal; the Machine goes to `Failed`
    InvalidSpec,
    /// Terminal for this reconcile, retried after an extended backoff
    QuotaOrAuthorization,
    /// Shutdown or timeout; retried promptly
    Cancelled,
}

/// ARM error codes that mean the request itself can never succeed
const INVALID_SPEC_CODES: &[&str] = &[
    "SkuNotAvailable",
    "InvalidParameter",
    "ImageNotFound",
    "PlatformImageNotFound",
    "InvalidTemplate",
    "InvalidResourceReference",
    "BadRequest",
    "InvalidRequestFormat",
];

impl ControllerError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            ControllerError::Azure(e) => classify_azure(e),
            ControllerError::Sku(SkuError::Azure(e)) => classify_azure(e),
            ControllerError::Sku(SkuError::NotFound { .. })
            | ControllerError::Naming(_)
            | ControllerError::ProviderConfig(_)
            | ControllerError::Credentials(_)
            | ControllerError::InvalidConfig(_) => ErrorClass::InvalidSpec,
            ControllerError::Cancelled => ErrorClass::Cancelled,
            ControllerError::Kube(_) | ControllerError::Watch(_) | ControllerError::Serialization(_) => {
                ErrorClass::Transient
            }
        }
    }

    /// Short reason used for metrics labels and events
    pub fn reason(&self) -> &'static str {
        match self.class() {
            ErrorClass::Transient => crds::reasons::TRANSIENT_FAILURE,
            ErrorClass::InvalidSpec => crds::reasons::INVALID_CONFIGURATION,
            ErrorClass::QuotaOrAuthorization => crds::reasons::QUOTA_OR_AUTHORIZATION,
            ErrorClass::Cancelled => "Cancelled",
        }
    }
}

/// Map an ARM failure onto the controller's taxonomy
pub fn classify_azure(error: &AzureError) -> ErrorClass {
    match error {
        AzureError::Cancelled => return ErrorClass::Cancelled,
        AzureError::Authentication(_) => return ErrorClass::QuotaOrAuthorization,
        AzureError::NotImplemented(_) | AzureError::InvalidRequest(_) => return ErrorClass::InvalidSpec,
        AzureError::Http(_) | AzureError::Serialization(_) => return ErrorClass::Transient,
        _ => {}
    }

    let code = error.code().unwrap_or_default();
    let status = error.status();

    if INVALID_SPEC_CODES.contains(&code) {
        return ErrorClass::InvalidSpec;
    }
    let quota = code.to_ascii_lowercase().contains("quota")
        || code == "AuthorizationFailed"
        || matches!(status, Some(401 | 403))
        || (code == "OperationNotAllowed" && matches!(status, Some(409) | None));
    if quota {
        return ErrorClass::QuotaOrAuthorization;
    }
    if status == Some(400) {
        return ErrorClass::InvalidSpec;
    }
    ErrorClass::Transient
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: &str) -> ControllerError {
        ControllerError::Azure(AzureError::Api {
            status,
            code: code.to_string(),
            message: "test".to_string(),
        })
    }

    #[test]
    fn test_invalid_spec_codes() {
        assert_eq!(api(400, "InvalidParameter").class(), ErrorClass::InvalidSpec);
        assert_eq!(api(404, "PlatformImageNotFound").class(), ErrorClass::InvalidSpec);
        assert_eq!(api(409, "SkuNotAvailable").class(), ErrorClass::InvalidSpec);
        assert_eq!(api(400, "SomethingElse").class(), ErrorClass::InvalidSpec);
    }

    #[test]
    fn test_quota_and_authorization() {
        assert_eq!(api(409, "OperationNotAllowed").class(), ErrorClass::QuotaOrAuthorization);
        assert_eq!(api(403, "AuthorizationFailed").class(), ErrorClass::QuotaOrAuthorization);
        assert_eq!(api(401, "InvalidAuthenticationToken").class(), ErrorClass::QuotaOrAuthorization);
        assert_eq!(api(409, "QuotaExceeded").class(), ErrorClass::QuotaOrAuthorization);
        let failed = ControllerError::Azure(AzureError::OperationFailed {
            code: "OperationNotAllowed".to_string(),
            message: "quota".to_string(),
        });
        assert_eq!(failed.class(), ErrorClass::QuotaOrAuthorization);
    }

    #[test]
    fn test_transient() {
        assert_eq!(api(500, "InternalServerError").class(), ErrorClass::Transient);
        assert_eq!(api(429, "TooManyRequests").class(), ErrorClass::Transient);
        assert_eq!(api(409, "Conflict").class(), ErrorClass::Transient);
        assert_eq!(ControllerError::Watch("closed".to_string()).class(), ErrorClass::Transient);
    }

    #[test]
    fn test_local_failures() {
        assert_eq!(ControllerError::Cancelled.class(), ErrorClass::Cancelled);
        assert_eq!(
            ControllerError::Azure(AzureError::Cancelled).class(),
            ErrorClass::Cancelled
        );
        assert_eq!(
            ControllerError::InvalidConfig("zone and availability set".to_string()).class(),
            ErrorClass::InvalidSpec
        );
        let sku = ControllerError::Sku(SkuError::NotFound {
            name: "Standard_NX_notreal".to_string(),
            region: "eastus".to_string(),
        });
        assert_eq!(sku.class(), ErrorClass::InvalidSpec);
        assert_eq!(sku.reason(), "InvalidConfiguration");
    }
}
