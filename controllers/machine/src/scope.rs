//! Per-reconcile machine scope
//!
//! A scope is built once per reconcile from the Machine, its credentials and
//! user-data Secrets, and an ARM client. The actuator mutates the scope's
//! working copy of the Machine; [`MachineScope::flush`] writes back whatever
//! changed in at most two patches (metadata, then status).

use crate::credentials::{AzureClientFactory, Credentials, SecretReader};
use crate::decode::VmView;
use crate::error::ControllerError;
use crate::naming;
use crate::reconcile_helpers::merge_string_map;
use crate::services::AzureContext;
use crate::store::MachineStore;
use azure_client::Environment;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use crds::{
    AzureMachineProviderSpec, AzureMachineProviderStatus, Condition, Machine, MachineAddress, MachinePhase,
    MachineStatus, PROVIDER_API_VERSION, VmState, labels, set_condition,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Key of the bootstrap data in the user-data Secret
pub const USER_DATA_KEY: &str = "userData";

/// Builds scopes; shared by every reconcile
#[derive(Clone)]
pub struct ScopeFactory {
    /// Secret access
    pub secrets: Arc<dyn SecretReader>,
    /// ARM clients
    pub clients: Arc<dyn AzureClientFactory>,
    /// Machine write-back
    pub store: Arc<dyn MachineStore>,
    /// Async-operation poll interval
    pub poll_interval: Duration,
}

impl std::fmt::Debug for ScopeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeFactory")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ScopeFactory {
    /// Build the scope for `machine`
    pub async fn scope(&self, machine: Machine, cancel: CancellationToken) -> Result<MachineScope, ControllerError> {
        let provider_spec = AzureMachineProviderSpec::from_provider_spec(&machine.spec.provider_spec)?;
        let provider_status =
            AzureMachineProviderStatus::from_raw(machine.status.as_ref().and_then(|s| s.provider_status.as_ref()))?;
        let namespace = machine.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());

        let secret = provider_spec
            .credentials_secret
            .as_ref()
            .ok_or_else(|| ControllerError::InvalidConfig("providerSpec.credentialsSecret is required".to_string()))?;
        let data = self
            .secrets
            .read(secret.namespace_or(&namespace), &secret.name)
            .await?;
        let credentials = Credentials::from_data(&data)?;

        let user_data = match &provider_spec.user_data_secret {
            Some(secret) => {
                let data = self
                    .secrets
                    .read(secret.namespace_or(&namespace), &secret.name)
                    .await?;
                let raw = data.get(USER_DATA_KEY).ok_or_else(|| {
                    ControllerError::InvalidConfig(format!("secret {} has no {USER_DATA_KEY} key", secret.name))
                })?;
                Some(STANDARD.encode(raw))
            }
            None => None,
        };

        let cloud = self.clients.client(&credentials).await?;
        let azure = AzureContext {
            client: cloud.client,
            profile: cloud.environment.profile.clone(),
            stack_hub: cloud.environment.is_stack_hub(),
            poll_interval: self.poll_interval,
            cancel,
        };

        let cluster_name = machine
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::CLUSTER_ID))
            .filter(|c| !c.is_empty())
            .cloned()
            .unwrap_or_else(|| credentials.resource_prefix.clone());
        let location = provider_spec
            .location
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| credentials.region.clone());
        let resource_group = match provider_spec
            .resource_group
            .clone()
            .filter(|rg| !rg.is_empty())
            .or_else(|| credentials.resource_group.clone())
        {
            Some(rg) => rg,
            None => naming::resource_group_name(&cluster_name)?,
        };
        let network_resource_group = provider_spec
            .network_resource_group
            .clone()
            .filter(|rg| !rg.is_empty())
            .unwrap_or_else(|| resource_group.clone());

        Ok(MachineScope {
            original: machine.clone(),
            machine,
            provider_spec,
            provider_status,
            credentials,
            azure,
            environment: cloud.environment,
            cluster_name,
            location,
            resource_group,
            network_resource_group,
            user_data,
            store: Arc::clone(&self.store),
        })
    }
}

/// Everything one reconcile of one Machine needs
pub struct MachineScope {
    /// Working copy, mutated by the actuator
    pub machine: Machine,
    original: Machine,
    /// Decoded provider spec
    pub provider_spec: AzureMachineProviderSpec,
    /// Decoded provider status, written back on flush
    pub provider_status: AzureMachineProviderStatus,
    /// Cloud credentials
    pub credentials: Credentials,
    /// ARM access
    pub azure: AzureContext,
    /// Cloud environment
    pub environment: Environment,
    /// Cluster (infrastructure) name
    pub cluster_name: String,
    /// Region
    pub location: String,
    /// Resource group of the VM and its dependents
    pub resource_group: String,
    /// Resource group of the virtual network
    pub network_resource_group: String,
    /// Base64 bootstrap data
    pub user_data: Option<String>,
    store: Arc<dyn MachineStore>,
}

impl std::fmt::Debug for MachineScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineScope")
            .field("machine", &self.key())
            .field("cluster_name", &self.cluster_name)
            .field("location", &self.location)
            .field("resource_group", &self.resource_group)
            .finish_non_exhaustive()
    }
}

impl MachineScope {
    /// Machine name
    pub fn name(&self) -> &str {
        self.machine.metadata.name.as_deref().unwrap_or_default()
    }

    /// Machine namespace
    pub fn namespace(&self) -> &str {
        self.machine.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        self.machine.key()
    }

    /// Subscription the Machine's resources live in
    pub fn subscription_id(&self) -> &str {
        self.azure.subscription_id()
    }

    /// Whether the scope talks to Azure Stack Hub
    pub fn is_stack_hub(&self) -> bool {
        self.azure.stack_hub
    }

    /// MachineSet the Machine belongs to, from its label
    pub fn machine_set(&self) -> Option<&str> {
        self.machine
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::MACHINE_SET))
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Provider ID currently in status
    pub fn provider_id(&self) -> Option<&str> {
        self.machine.status.as_ref().and_then(|s| s.provider_id.as_deref())
    }

    /// Whether a Node backs the Machine
    pub fn has_node_ref(&self) -> bool {
        self.machine.status.as_ref().is_some_and(|s| s.node_ref.is_some())
    }

    fn status_mut(&mut self) -> &mut MachineStatus {
        self.machine.status.get_or_insert_with(MachineStatus::default)
    }

    /// Record the provider ID
    pub fn set_provider_id(&mut self, provider_id: String) {
        self.status_mut().provider_id = Some(provider_id);
    }

    /// Replace the Machine's addresses
    pub fn set_addresses(&mut self, addresses: Vec<MachineAddress>) {
        self.status_mut().addresses = addresses;
    }

    /// Set the lifecycle phase
    pub fn set_phase(&mut self, phase: MachinePhase) {
        self.status_mut().phase = Some(phase);
    }

    /// Insert or replace a condition by type
    pub fn set_condition(&mut self, condition: Condition) {
        set_condition(&mut self.status_mut().conditions, condition);
    }

    /// Record a terminal error
    pub fn set_error(&mut self, reason: &str, message: impl Into<String>) {
        let status = self.status_mut();
        status.error_reason = Some(reason.to_string());
        status.error_message = Some(message.into());
    }

    /// Clear a previously recorded terminal error
    pub fn clear_error(&mut self) {
        let status = self.status_mut();
        status.error_reason = None;
        status.error_message = None;
    }

    /// Record VM identity and state from a decoded VM
    pub fn reflect_instance(&mut self, vm: &VmView) {
        if let Some(vm_id) = &vm.properties.vm_id {
            self.provider_status.vm_id = Some(vm_id.clone());
        }
        // A document without a provisioning state keeps the last one seen
        let state = vm.properties.provisioning_state.is_some().then(|| vm.state());
        if state.is_some() {
            self.provider_status.vm_state = state;
        }

        let mut desired_labels = BTreeMap::new();
        if let Some(size) = &vm.properties.hardware_profile.vm_size {
            desired_labels.insert(labels::INSTANCE_TYPE.to_string(), size.clone());
        }
        if let Some(location) = &vm.location {
            desired_labels.insert(labels::REGION.to_string(), location.clone());
        }
        if let Some(zone) = vm.zones.first() {
            desired_labels.insert(labels::ZONE.to_string(), zone.clone());
        }
        if self.provider_spec.spot_vm_options.is_some() {
            desired_labels.insert(labels::INTERRUPTIBLE_INSTANCE.to_string(), String::new());
        }
        merge_string_map(
            self.machine.metadata.labels.get_or_insert_with(BTreeMap::new),
            &desired_labels,
        );

        if let Some(state) = state {
            let desired_annotations =
                BTreeMap::from([(labels::INSTANCE_STATE.to_string(), state.as_str().to_string())]);
            merge_string_map(
                self.machine.metadata.annotations.get_or_insert_with(BTreeMap::new),
                &desired_annotations,
            );
        }
    }

    /// Last observed VM state
    pub fn vm_state(&self) -> Option<VmState> {
        self.provider_status.vm_state
    }

    fn metadata_patch(&self) -> Option<Value> {
        fn changed(
            before: Option<&BTreeMap<String, String>>,
            after: Option<&BTreeMap<String, String>>,
        ) -> BTreeMap<String, String> {
            let empty = BTreeMap::new();
            let before = before.unwrap_or(&empty);
            after
                .unwrap_or(&empty)
                .iter()
                .filter(|(k, v)| before.get(*k) != Some(*v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }

        let labels = changed(
            self.original.metadata.labels.as_ref(),
            self.machine.metadata.labels.as_ref(),
        );
        let annotations = changed(
            self.original.metadata.annotations.as_ref(),
            self.machine.metadata.annotations.as_ref(),
        );
        if labels.is_empty() && annotations.is_empty() {
            return None;
        }
        let mut metadata = serde_json::Map::new();
        if !labels.is_empty() {
            metadata.insert("labels".to_string(), json!(labels));
        }
        if !annotations.is_empty() {
            metadata.insert("annotations".to_string(), json!(annotations));
        }
        Some(json!({ "metadata": metadata }))
    }

    fn sync_provider_status(&mut self) -> Result<(), ControllerError> {
        let mut provider_status = self.provider_status.clone();
        provider_status.api_version = Some(PROVIDER_API_VERSION.to_string());
        provider_status.kind = Some(AzureMachineProviderStatus::KIND.to_string());
        let encoded = serde_json::to_value(&provider_status)?;

        let unchanged = self
            .machine
            .status
            .as_ref()
            .and_then(|s| s.provider_status.as_ref())
            .is_some_and(|current| AzureMachineProviderStatus::from_raw(Some(current)).ok().as_ref() == Some(&provider_status));
        if !unchanged {
            self.status_mut().provider_status = Some(encoded);
        }
        Ok(())
    }

    /// Write back metadata and status changes, if any
    pub async fn flush(&mut self) -> Result<(), ControllerError> {
        let namespace = self.namespace().to_string();
        let name = self.name().to_string();

        if let Some(patch) = self.metadata_patch() {
            debug!("Updating labels and annotations of {}/{}", namespace, name);
            self.store.patch_metadata(&namespace, &name, &patch).await?;
        }

        self.sync_provider_status()?;
        let before = self.original.status.clone().unwrap_or_default();
        let after = self.machine.status.clone().unwrap_or_default();
        if after != before {
            let mut status = after;
            status.last_updated = Some(Utc::now());
            let mut body = serde_json::to_value(&status)?;
            // Merge patches only remove keys that are explicitly null.
            if let Some(fields) = body.as_object_mut() {
                if status.error_reason.is_none() && before.error_reason.is_some() {
                    fields.insert("errorReason".to_string(), Value::Null);
                }
                if status.error_message.is_none() && before.error_message.is_some() {
                    fields.insert("errorMessage".to_string(), Value::Null);
                }
            }
            debug!("Updating status of {}/{}", namespace, name);
            self.store
                .patch_status(&namespace, &name, &json!({ "status": body }))
                .await?;
            self.machine.status = Some(status);
        }

        self.original = self.machine.clone();
        Ok(())
    }
}
