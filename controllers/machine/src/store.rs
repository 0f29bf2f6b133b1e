//! Write-back of Machine and MachineSet changes
//!
//! Reconcilers never write objects directly; they hand merge patches to a
//! store. The Kubernetes-backed store sends them to the API server, the test
//! store in `test_utils` records them.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{Machine, MachineSet};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::Value;
use tracing::debug;

/// Patches applied to Machines
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Merge-patch object metadata (labels, annotations, finalizers)
    async fn patch_metadata(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError>;

    /// Merge-patch the status subresource
    async fn patch_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError>;
}

/// Patches applied to MachineSets
#[async_trait]
pub trait MachineSetStore: Send + Sync {
    /// Merge-patch object metadata
    async fn patch_metadata(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError>;
}

/// Store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MachineStore for KubeStore {
    async fn patch_metadata(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError> {
        debug!("Patching Machine {}/{} metadata", namespace, name);
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await?;
        Ok(())
    }

    async fn patch_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError> {
        debug!("Patching Machine {}/{} status", namespace, name);
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch)).await?;
        Ok(())
    }
}

#[async_trait]
impl MachineSetStore for KubeStore {
    async fn patch_metadata(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError> {
        debug!("Patching MachineSet {}/{} metadata", namespace, name);
        let api: Api<MachineSet> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await?;
        Ok(())
    }
}
