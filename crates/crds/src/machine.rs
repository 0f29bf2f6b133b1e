//! Machine CRD
//!
//! Declarative description of a single virtual machine. The provider-specific
//! part of the spec is carried as raw JSON in `spec.providerSpec.value` and
//! decoded by the provider into [`crate::AzureMachineProviderSpec`].

use crate::conditions::Condition;
use crate::references::NodeReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known labels and annotations on Machine and MachineSet objects
pub mod labels {
    /// Name of the MachineSet that owns a Machine
    pub const MACHINE_SET: &str = "machine.openshift.io/cluster-api-machineset";
    /// Cluster (infrastructure) ID a Machine belongs to
    pub const CLUSTER_ID: &str = "machine.openshift.io/cluster-api-cluster";
    /// VM size of the backing instance
    pub const INSTANCE_TYPE: &str = "machine.openshift.io/instance-type";
    /// Region of the backing instance
    pub const REGION: &str = "machine.openshift.io/region";
    /// Availability zone of the backing instance
    pub const ZONE: &str = "machine.openshift.io/zone";
    /// Present on machines backed by spot instances
    pub const INTERRUPTIBLE_INSTANCE: &str = "machine.openshift.io/interruptible-instance";
    /// Annotation carrying the last observed VM provisioning state
    pub const INSTANCE_STATE: &str = "machine.openshift.io/instance-state";
    /// Node annotation naming the Machine (`namespace/name`) that backs the Node
    pub const NODE_MACHINE: &str = "machine.openshift.io/machine";
}

/// Finalizer held on a Machine until its cloud resources are gone
pub const MACHINE_FINALIZER: &str = "machine.machine.openshift.io";

/// Machine spec
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    shortname = "ma",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".metadata.labels.machine\\.openshift\\.io/instance-type"}"#,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".metadata.labels.machine\\.openshift\\.io/region"}"#,
    printcolumn = r#"{"name":"Zone","type":"string","jsonPath":".metadata.labels.machine\\.openshift\\.io/zone"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Labels and annotations propagated to the Node
    #[serde(default)]
    pub metadata: ObjectMetaTemplate,

    /// Provider-specific configuration
    #[serde(default)]
    pub provider_spec: ProviderSpec,

    /// Which API is authoritative for this Machine
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "authoritativeAPI")]
    #[schemars(rename = "authoritativeAPI")]
    pub authoritative_api: Option<AuthoritativeApi>,
}

/// Subset of object metadata that can be templated onto Nodes and Machines
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetaTemplate {
    /// Labels to apply
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations to apply
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Opaque provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Raw provider configuration document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::preserve_unknown_fields")]
    pub value: Option<serde_json::Value>,
}

/// API that owns reconciliation of a Machine or MachineSet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum AuthoritativeApi {
    /// Reconciled by this provider
    #[default]
    MachineAPI,
    /// Reconciled by Cluster API
    ClusterAPI,
    /// Ownership is being handed over
    Migrating,
}

/// Machine status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<MachinePhase>,

    /// Provider ID of the backing VM, used to join the VM to its Node
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "providerID")]
    #[schemars(rename = "providerID")]
    pub provider_id: Option<String>,

    /// Addresses of the backing VM
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Observed conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Machine-readable terminal error reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    /// Human-readable terminal error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Raw provider status document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::preserve_unknown_fields")]
    pub provider_status: Option<serde_json::Value>,

    /// Node backed by this Machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<NodeReference>,

    /// Last time the status was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,

    /// Which API currently owns reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "authoritativeAPI")]
    #[schemars(rename = "authoritativeAPI")]
    pub authoritative_api: Option<AuthoritativeApi>,
}

/// Machine lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachinePhase {
    /// VM creation requested
    Provisioning,
    /// VM exists and has an identity
    Provisioned,
    /// VM has joined the cluster as a Node
    Running,
    /// Cloud resources are being removed
    Deleting,
    /// Cloud resources are gone
    Deleted,
    /// Terminal failure; requires a new Machine
    Failed,
}

impl MachinePhase {
    /// Phase name as written to `status.phase`
    pub fn as_str(&self) -> &'static str {
        match self {
            MachinePhase::Provisioning => "Provisioning",
            MachinePhase::Provisioned => "Provisioned",
            MachinePhase::Running => "Running",
            MachinePhase::Deleting => "Deleting",
            MachinePhase::Deleted => "Deleted",
            MachinePhase::Failed => "Failed",
        }
    }
}

/// Address of a Machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineAddress {
    /// Address kind
    #[serde(rename = "type")]
    #[schemars(rename = "type")]
    pub address_type: AddressType,

    /// The address itself
    pub address: String,
}

impl MachineAddress {
    /// Create a new address
    pub fn new(address_type: AddressType, address: impl Into<String>) -> Self {
        Self {
            address_type,
            address: address.into(),
        }
    }
}

/// Kind of a Machine address
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddressType {
    /// Private IP address
    InternalIP,
    /// Public IP address
    ExternalIP,
    /// Private DNS name
    InternalDNS,
    /// Public DNS name
    ExternalDNS,
    /// Host name
    Hostname,
}

impl Machine {
    /// `namespace/name` key used in logs and backoff bookkeeping
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or("default"),
            self.metadata.name.as_deref().unwrap_or("<unknown>")
        )
    }

    /// Whether the Machine has been marked for deletion
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the Machine currently carries the provider finalizer
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == MACHINE_FINALIZER))
    }

    /// Current phase, if any
    pub fn phase(&self) -> Option<MachinePhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_machine_status_round_trips_provider_id_name() {
        let status = MachineStatus {
            phase: Some(MachinePhase::Provisioning),
            provider_id: Some("azure:///subscriptions/abc/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/m".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "Provisioning");
        assert!(json.get("providerID").is_some());
        assert!(json.get("addresses").is_none(), "empty addresses should be skipped");
    }

    #[test]
    fn test_machine_finalizer_and_key() {
        let machine = Machine {
            metadata: ObjectMeta {
                name: Some("worker-0".to_string()),
                namespace: Some("openshift-machine-api".to_string()),
                finalizers: Some(vec![MACHINE_FINALIZER.to_string()]),
                ..Default::default()
            },
            spec: MachineSpec::default(),
            status: None,
        };
        assert!(machine.has_finalizer());
        assert!(!machine.is_deleting());
        assert_eq!(machine.key(), "openshift-machine-api/worker-0");
    }

    #[test]
    fn test_address_type_serializes_upstream_names() {
        let address = MachineAddress::new(AddressType::InternalIP, "10.0.0.4");
        let json = serde_json::to_value(&address).unwrap();
        assert_eq!(json, serde_json::json!({"type": "InternalIP", "address": "10.0.0.4"}));
    }
}
