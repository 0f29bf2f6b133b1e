//! MachineSet CRD
//!
//! A group of interchangeable Machines stamped from a common template. The Azure
//! provider only reads the template's VM size to publish scale-from-zero hints.

use crate::machine::{AuthoritativeApi, MachineSpec, ObjectMetaTemplate};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotations read by the cluster autoscaler when scaling a MachineSet from zero
pub mod annotations {
    /// Integer vCPU count of one Machine
    pub const CPU: &str = "machine.openshift.io/vCPU";
    /// Integer memory of one Machine in MiB
    pub const MEMORY_MB: &str = "machine.openshift.io/memoryMb";
    /// Integer GPU count of one Machine
    pub const GPU: &str = "machine.openshift.io/GPU";
}

/// MachineSet spec
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "MachineSet",
    namespaced,
    status = "MachineSetStatus",
    shortname = "ms",
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Desired number of Machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Label selector matching the Machines owned by this set
    #[serde(default)]
    pub selector: MachineSetSelector,

    /// Template for new Machines
    #[serde(default)]
    pub template: MachineTemplateSpec,

    /// Which API is authoritative for this MachineSet
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "authoritativeAPI")]
    #[schemars(rename = "authoritativeAPI")]
    pub authoritative_api: Option<AuthoritativeApi>,
}

/// Equality-based label selector
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSelector {
    /// Labels a Machine must carry
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

/// Template used to stamp Machines
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateSpec {
    /// Metadata applied to each Machine
    #[serde(default)]
    pub metadata: ObjectMetaTemplate,

    /// Spec applied to each Machine
    #[serde(default)]
    pub spec: MachineSpec,
}

/// MachineSet status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetStatus {
    /// Observed number of Machines
    #[serde(default)]
    pub replicas: i32,

    /// Machines with a Node that is ready
    #[serde(default)]
    pub ready_replicas: i32,

    /// Machines available for workloads
    #[serde(default)]
    pub available_replicas: i32,

    /// Generation observed by the MachineSet controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Which API currently owns reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "authoritativeAPI")]
    #[schemars(rename = "authoritativeAPI")]
    pub authoritative_api: Option<AuthoritativeApi>,
}

impl MachineSet {
    /// `namespace/name` key used in logs and backoff bookkeeping
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or("default"),
            self.metadata.name.as_deref().unwrap_or("<unknown>")
        )
    }

    /// Annotation value currently set on the MachineSet
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}
