//! Test utilities for unit testing the actuator and reconcilers
//!
//! A [`Harness`] wires a [`MockAzureClient`], in-memory Secrets, a recording
//! store and a recording event publisher into the same factories the
//! controller uses at runtime.

use crate::actuator::Actuator;
use crate::credentials::{AzureClientFactory, CloudClient, Credentials, SecretReader, keys};
use crate::error::ControllerError;
use crate::events::EventPublisher;
use crate::features::FeatureGates;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::scope::{MachineScope, ScopeFactory, USER_DATA_KEY};
use crate::skus::{DEFAULT_TTL, SkuCache};
use crate::store::{MachineSetStore, MachineStore};
use async_trait::async_trait;
use azure_client::{ApiProfile, CloudName, Environment, MockAzureClient, vm_sku};
use crds::{Machine, MachineSpec, ProviderSpec, labels};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "openshift-machine-api";
pub const SUBSCRIPTION: &str = "abc";
pub const CLUSTER: &str = "mycluster";
pub const MACHINE_SET: &str = "mycluster-worker-eastus1";
pub const CREDENTIALS_SECRET: &str = "azure-cloud-credentials";
pub const USER_DATA_SECRET: &str = "worker-user-data";

/// Which object a recorded patch went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchTarget {
    MachineMetadata,
    MachineStatus,
    MachineSetMetadata,
}

#[derive(Debug, Clone)]
pub struct RecordedPatch {
    pub target: PatchTarget,
    pub namespace: String,
    pub name: String,
    pub patch: Value,
}

/// Store that records every patch instead of sending it
#[derive(Debug, Default)]
pub struct RecordingStore {
    patches: Mutex<Vec<RecordedPatch>>,
}

impl RecordingStore {
    pub fn patches(&self) -> Vec<RecordedPatch> {
        self.patches.lock().unwrap().clone()
    }

    fn last(&self, target: PatchTarget) -> Option<Value> {
        self.patches()
            .into_iter()
            .rev()
            .find(|p| p.target == target)
            .map(|p| p.patch)
    }

    pub fn last_status_patch(&self) -> Option<Value> {
        self.last(PatchTarget::MachineStatus)
    }

    pub fn last_metadata_patch(&self) -> Option<Value> {
        self.last(PatchTarget::MachineMetadata)
    }

    pub fn last_machine_set_patch(&self) -> Option<Value> {
        self.last(PatchTarget::MachineSetMetadata)
    }

    fn record(&self, target: PatchTarget, namespace: &str, name: &str, patch: &Value) {
        self.patches.lock().unwrap().push(RecordedPatch {
            target,
            namespace: namespace.to_string(),
            name: name.to_string(),
            patch: patch.clone(),
        });
    }
}

#[async_trait]
impl MachineStore for RecordingStore {
    async fn patch_metadata(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError> {
        self.record(PatchTarget::MachineMetadata, namespace, name, patch);
        Ok(())
    }

    async fn patch_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError> {
        self.record(PatchTarget::MachineStatus, namespace, name, patch);
        Ok(())
    }
}

#[async_trait]
impl MachineSetStore for RecordingStore {
    async fn patch_metadata(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError> {
        self.record(PatchTarget::MachineSetMetadata, namespace, name, patch);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub object: Option<String>,
    pub type_: EventType,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

/// Event publisher that keeps events in memory
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }

    pub fn warnings(&self) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.type_ == EventType::Warning)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            object: resource_ref.name.clone(),
            type_,
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}

/// Secrets held in memory
#[derive(Debug, Default)]
pub struct MapSecretReader {
    secrets: Mutex<HashMap<(String, String), BTreeMap<String, String>>>,
}

impl MapSecretReader {
    pub fn insert(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let data = data
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), data);
    }
}

#[async_trait]
impl SecretReader for MapSecretReader {
    async fn read(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, ControllerError> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ControllerError::Credentials(format!("secret {namespace}/{name} not found")))
    }
}

/// Factory that always hands out the same mock client
#[derive(Debug, Clone)]
pub struct MockClientFactory {
    pub mock: MockAzureClient,
    pub environment: Environment,
}

#[async_trait]
impl AzureClientFactory for MockClientFactory {
    async fn client(&self, _credentials: &Credentials) -> Result<CloudClient, ControllerError> {
        Ok(CloudClient {
            client: Arc::new(self.mock.clone()),
            environment: self.environment.clone(),
        })
    }
}

pub fn stack_hub_environment() -> Environment {
    Environment {
        name: CloudName::AzureStackCloud,
        resource_manager_endpoint: "https://management.local.azurestack.external".to_string(),
        active_directory_endpoint: "https://adfs.local.azurestack.external".to_string(),
        token_audience: "https://management.adfs.azurestack.local/".to_string(),
        profile: ApiProfile::HYBRID,
    }
}

/// Everything a test needs to drive the actuator against the mock cloud
pub struct Harness {
    pub mock: MockAzureClient,
    pub store: Arc<RecordingStore>,
    pub events: Arc<RecordingEventPublisher>,
    pub secrets: Arc<MapSecretReader>,
    pub factory: ScopeFactory,
    pub skus: Arc<SkuCache>,
    pub metrics: Arc<Metrics>,
    pub cancel: CancellationToken,
}

impl Harness {
    /// Public cloud harness with one VM size in eastus
    pub fn new() -> Self {
        Self::with_environment(Environment::public())
    }

    /// Azure Stack Hub harness
    pub fn stack_hub() -> Self {
        Self::with_environment(stack_hub_environment())
    }

    fn with_environment(environment: Environment) -> Self {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        mock.add_sku(vm_sku(
            "Standard_D4s_v3",
            &["eastus"],
            &[
                ("vCPUs", "4"),
                ("MemoryGB", "16"),
                ("GPUs", "0"),
                ("AcceleratedNetworkingEnabled", "True"),
            ],
        ));

        let secrets = Arc::new(MapSecretReader::default());
        secrets.insert(
            NAMESPACE,
            CREDENTIALS_SECRET,
            &[
                (keys::SUBSCRIPTION_ID, SUBSCRIPTION),
                (keys::CLIENT_ID, "client"),
                (keys::CLIENT_SECRET, "secret"),
                (keys::TENANT_ID, "tenant"),
                (keys::REGION, "eastus"),
                (keys::RESOURCE_PREFIX, CLUSTER),
            ],
        );
        secrets.insert(NAMESPACE, USER_DATA_SECRET, &[(USER_DATA_KEY, "ignition")]);

        let store = Arc::new(RecordingStore::default());
        let factory = ScopeFactory {
            secrets: secrets.clone(),
            clients: Arc::new(MockClientFactory {
                mock: mock.clone(),
                environment,
            }),
            store: store.clone(),
            poll_interval: Duration::from_millis(10),
        };

        Self {
            mock,
            store,
            events: Arc::new(RecordingEventPublisher::default()),
            secrets,
            factory,
            skus: Arc::new(SkuCache::new(DEFAULT_TTL)),
            metrics: Arc::new(Metrics::new().unwrap()),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn scope(&self, machine: Machine) -> Result<MachineScope, ControllerError> {
        self.factory.scope(machine, self.cancel.clone()).await
    }

    pub async fn scope_with(&self, machine: Machine, cancel: CancellationToken) -> Result<MachineScope, ControllerError> {
        self.factory.scope(machine, cancel).await
    }

    pub fn actuator(&self) -> Actuator {
        Actuator::new(self.skus.clone(), self.events.clone(), self.metrics.clone())
    }

    pub fn reconciler(&self, features: FeatureGates) -> Reconciler {
        Reconciler::new(
            self.factory.clone(),
            self.store.clone(),
            self.skus.clone(),
            self.events.clone(),
            self.metrics.clone(),
            features,
            self.cancel.clone(),
        )
    }
}

/// Machine in the test namespace owned by the test MachineSet
pub fn test_machine(name: &str, provider_spec: Value) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some(format!("uid-{name}")),
            labels: Some(BTreeMap::from([
                (labels::CLUSTER_ID.to_string(), CLUSTER.to_string()),
                (labels::MACHINE_SET.to_string(), MACHINE_SET.to_string()),
            ])),
            ..Default::default()
        },
        spec: MachineSpec {
            provider_spec: ProviderSpec {
                value: Some(provider_spec),
            },
            ..Default::default()
        },
        status: None,
    }
}

/// Zonal worker in eastus with no public IP
pub fn provider_spec_value() -> Value {
    json!({
        "apiVersion": "machine.openshift.io/v1beta1",
        "kind": "AzureMachineProviderSpec",
        "location": "eastus",
        "resourceGroup": "my-rg",
        "vmSize": "Standard_D4s_v3",
        "zone": "1",
        "vnet": "my-vnet",
        "subnet": "my-subnet",
        "image": {"publisher": "azureopenshift", "offer": "aro4", "sku": "aro_414", "version": "414.92.2023"},
        "osDisk": {"osType": "Linux", "diskSizeGB": 128, "managedDisk": {"storageAccountType": "Premium_LRS"}},
        "credentialsSecret": {"name": CREDENTIALS_SECRET, "namespace": NAMESPACE},
        "userDataSecret": {"name": USER_DATA_SECRET}
    })
}
