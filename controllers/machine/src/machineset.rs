//! MachineSet capacity annotations
//!
//! The autoscaler sizes scale-from-zero decisions from the vCPU, memory and
//! GPU of a MachineSet's VM size. Those figures come from the SKU catalogue
//! and are kept on the MachineSet as annotations.

use crate::credentials::Credentials;
use crate::error::ControllerError;
use crate::events::{actions, reasons as event_reasons};
use crate::reconciler::{Reconciler, migration_gated};
use crate::skus::SkuError;
use crds::{AzureMachineProviderSpec, MachineSet, annotations};
use kube::Resource;
use kube::runtime::events::EventType;
use kube_runtime::controller::Action;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue after the VM size was missing from the catalogue
pub const SKU_NOT_FOUND_REQUEUE: Duration = Duration::from_secs(30);

impl Reconciler {
    /// Keep the capacity annotations of one MachineSet in line with its VM size
    pub async fn reconcile_machine_set(&self, machine_set: &MachineSet) -> Result<Action, ControllerError> {
        let key = machine_set.key();
        let authoritative = machine_set.status.as_ref().and_then(|s| s.authoritative_api);
        if migration_gated(self.features, authoritative) {
            debug!("Skipping MachineSet {}: not authoritative", key);
            return Ok(Action::await_change());
        }
        if machine_set.metadata.deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }

        let provider_spec = AzureMachineProviderSpec::from_provider_spec(&machine_set.spec.template.spec.provider_spec)?;
        let namespace = machine_set.metadata.namespace.as_deref().unwrap_or("default");
        let secret = provider_spec
            .credentials_secret
            .as_ref()
            .ok_or_else(|| ControllerError::InvalidConfig("providerSpec.credentialsSecret is required".to_string()))?;
        let data = self
            .scopes
            .secrets
            .read(secret.namespace_or(namespace), &secret.name)
            .await?;
        let credentials = Credentials::from_data(&data)?;
        let cloud = self.scopes.clients.client(&credentials).await?;

        let region = provider_spec
            .location
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| credentials.region.clone());
        let cancel = self.cancel.child_token();
        let sku = match self
            .skus
            .vm_size(
                cloud.client.as_ref(),
                cloud.environment.profile.skus,
                &region,
                &provider_spec.vm_size,
                &cancel,
            )
            .await
        {
            Ok(sku) => sku,
            Err(SkuError::NotFound { name, region }) => {
                let message = format!("Unknown instance type {name} in region {region}");
                warn!("MachineSet {}: {}", key, message);
                self.events
                    .publish(
                        &machine_set.object_ref(&()),
                        EventType::Warning,
                        event_reasons::FAILED,
                        actions::ANNOTATE,
                        Some(message),
                    )
                    .await;
                return Ok(Action::requeue(SKU_NOT_FOUND_REQUEUE));
            }
            Err(e) => return Err(e.into()),
        };

        let desired = BTreeMap::from([
            (annotations::CPU, sku.vcpus.to_string()),
            (annotations::MEMORY_MB, sku.memory_mib.to_string()),
            (annotations::GPU, sku.gpus.to_string()),
        ]);
        let stale: BTreeMap<&str, String> = desired
            .into_iter()
            .filter(|(k, v)| machine_set.annotation(k) != Some(v.as_str()))
            .collect();
        if stale.is_empty() {
            debug!("MachineSet {} annotations are current", key);
        } else {
            info!("Annotating MachineSet {} with capacity of {}", key, sku.name);
            let name = machine_set.metadata.name.as_deref().unwrap_or_default();
            self.machine_sets
                .patch_metadata(namespace, name, &json!({"metadata": {"annotations": stale}}))
                .await?;
        }

        self.reset_backoff(&key);
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::features::FeatureGates;
    use crate::test_utils::*;
    use crds::{MachineSetSpec, MachineSpec, MachineTemplateSpec, ProviderSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::Value;

    fn machine_set_for(provider_spec: Value, annotations: &[(&str, &str)]) -> MachineSet {
        MachineSet {
            metadata: ObjectMeta {
                name: Some(MACHINE_SET.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: MachineSetSpec {
                replicas: Some(1),
                template: MachineTemplateSpec {
                    spec: MachineSpec {
                        provider_spec: ProviderSpec {
                            value: Some(provider_spec),
                        },
                        ..Default::default()
                    },
                    ..Default::default()
                },
                ..Default::default()
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn test_annotates_capacity_of_vm_size() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(FeatureGates::default());
        let machine_set = machine_set_for(provider_spec_value(), &[("owner", "team-a")]);

        reconciler.reconcile_machine_set(&machine_set).await.unwrap();

        let patch = harness.store.last_machine_set_patch().unwrap();
        assert_eq!(
            patch,
            json!({"metadata": {"annotations": {
                "machine.openshift.io/vCPU": "4",
                "machine.openshift.io/memoryMb": "16384",
                "machine.openshift.io/GPU": "0",
            }}})
        );
    }

    #[tokio::test]
    async fn test_current_annotations_are_not_patched() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(FeatureGates::default());
        let machine_set = machine_set_for(
            provider_spec_value(),
            &[
                (annotations::CPU, "4"),
                (annotations::MEMORY_MB, "16384"),
                (annotations::GPU, "0"),
            ],
        );

        reconciler.reconcile_machine_set(&machine_set).await.unwrap();
        assert!(harness.store.patches().is_empty());
    }

    #[tokio::test]
    async fn test_only_stale_annotations_are_patched() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(FeatureGates::default());
        let machine_set = machine_set_for(
            provider_spec_value(),
            &[(annotations::CPU, "2"), (annotations::MEMORY_MB, "16384")],
        );

        reconciler.reconcile_machine_set(&machine_set).await.unwrap();

        let patch = harness.store.last_machine_set_patch().unwrap();
        let written = patch["metadata"]["annotations"].as_object().unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[annotations::CPU], "4");
        assert_eq!(written[annotations::GPU], "0");
    }

    #[tokio::test]
    async fn test_unknown_vm_size_warns_and_requeues() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(FeatureGates::default());
        let mut value = provider_spec_value();
        value["vmSize"] = json!("Standard_Nope");
        let machine_set = machine_set_for(value, &[]);

        let action = reconciler.reconcile_machine_set(&machine_set).await.unwrap();

        assert_eq!(action, Action::requeue(SKU_NOT_FOUND_REQUEUE));
        assert!(harness.store.patches().is_empty());
        let warnings = harness.events.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].action, actions::ANNOTATE);
        assert!(warnings[0].note.as_deref().unwrap().contains("Standard_Nope"));
    }

    #[tokio::test]
    async fn test_missing_provider_spec_is_invalid() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(FeatureGates::default());
        let mut machine_set = machine_set_for(provider_spec_value(), &[]);
        machine_set.spec.template.spec.provider_spec.value = None;

        let err = reconciler.reconcile_machine_set(&machine_set).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidSpec);
    }
}
