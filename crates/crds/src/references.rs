//! Kubernetes object references used by Machine API resources
//!
//! Provides the Secret and Node references carried by machine specs and statuses.
//! Follows the Kubernetes `SecretReference` / `ObjectReference` pattern with a name
//! and an optional namespace that defaults to the referencing object's namespace.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a Secret holding credentials or bootstrap data
///
/// The namespace is optional; when absent the Secret is looked up in the
/// namespace of the Machine that references it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the Secret
    pub name: String,

    /// Namespace of the Secret (defaults to same namespace as the referencing resource)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretReference {
    /// Create a new reference in the same namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Create a new reference with an explicit namespace
    pub fn with_namespace(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Resolve the namespace, falling back to the referencing object's namespace
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_namespace)
    }
}

/// Reference to the Node backed by a Machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeReference {
    /// Name of the Node
    pub name: String,

    /// UID of the Node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_reference_namespace_fallback() {
        let same_ns = SecretReference::new("azure-cloud-credentials");
        assert_eq!(same_ns.namespace_or("openshift-machine-api"), "openshift-machine-api");

        let other_ns = SecretReference::with_namespace("worker-user-data", "kube-system");
        assert_eq!(other_ns.namespace_or("openshift-machine-api"), "kube-system");
    }

    #[test]
    fn test_secret_reference_serializes_camel_case_without_empty_namespace() {
        let reference = SecretReference::new("creds");
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json, serde_json::json!({"name": "creds"}));
    }
}
