//! Machine reconciliation
//!
//! The [`Reconciler`] is the shared context of both watchers. Machine
//! reconciles live here; MachineSet reconciles are in
//! [`crate::machineset`].

use crate::actuator::Actuator;
use crate::backoff::BackoffState;
use crate::error::{ControllerError, ErrorClass};
use crate::events::{EventPublisher, actions, reasons as event_reasons};
use crate::features::FeatureGates;
use crate::metrics::Metrics;
use crate::scope::{MachineScope, ScopeFactory};
use crate::skus::SkuCache;
use crate::store::{MachineSetStore, MachineStore};
use crds::{
    AuthoritativeApi, Condition, ConditionStatus, MACHINE_FINALIZER, Machine, MachinePhase, condition_types, reasons,
};
use kube::Resource;
use kube::runtime::events::EventType;
use kube_runtime::controller::Action;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Requeue after a successful reconcile, to refresh status
pub const RESYNC_PERIOD: Duration = Duration::from_secs(10 * 60);
/// Requeue after a cancelled reconcile
pub const CANCELLED_REQUEUE: Duration = Duration::from_secs(5);

/// Whether the migration gate hands this object to another API
pub(crate) fn migration_gated(features: FeatureGates, authoritative: Option<AuthoritativeApi>) -> bool {
    features.machine_api_migration && authoritative.unwrap_or_default() != AuthoritativeApi::MachineAPI
}

/// Shared state of every reconcile
pub struct Reconciler {
    pub(crate) scopes: ScopeFactory,
    pub(crate) actuator: Actuator,
    pub(crate) machine_sets: Arc<dyn MachineSetStore>,
    pub(crate) skus: Arc<SkuCache>,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) features: FeatureGates,
    pub(crate) cancel: CancellationToken,
    /// Error count tracking per object (namespace/name -> BackoffState)
    backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(
        scopes: ScopeFactory,
        machine_sets: Arc<dyn MachineSetStore>,
        skus: Arc<SkuCache>,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<Metrics>,
        features: FeatureGates,
        cancel: CancellationToken,
    ) -> Self {
        let actuator = Actuator::new(Arc::clone(&skus), Arc::clone(&events), Arc::clone(&metrics));
        Self {
            scopes,
            actuator,
            machine_sets,
            skus,
            events,
            metrics,
            features,
            cancel,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    fn machines(&self) -> &Arc<dyn MachineStore> {
        &self.scopes.store
    }

    /// Requeue decision after a failed reconcile of `key`
    pub fn error_action(&self, key: &str, error: &ControllerError) -> Action {
        match error.class() {
            ErrorClass::InvalidSpec => {
                debug!("{} needs a spec change before it can make progress", key);
                Action::await_change()
            }
            ErrorClass::Cancelled => Action::requeue(CANCELLED_REQUEUE),
            class => {
                let mut states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
                let state = states.entry(key.to_string()).or_default();
                let delay = state.record_failure(class);
                info!(
                    "Requeueing {} in {}s after {} consecutive failures",
                    key,
                    delay.as_secs(),
                    state.error_count
                );
                Action::requeue(delay)
            }
        }
    }

    pub(crate) fn reset_backoff(&self, key: &str) {
        let mut states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = states.get_mut(key) {
            state.reset();
        }
    }

    pub(crate) fn forget_backoff(&self, key: &str) {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Reconcile one Machine
    pub async fn reconcile_machine(&self, machine: &Machine) -> Result<Action, ControllerError> {
        let key = machine.key();
        let authoritative = machine.status.as_ref().and_then(|s| s.authoritative_api);
        if migration_gated(self.features, authoritative) {
            debug!("Skipping Machine {}: not authoritative", key);
            return Ok(Action::await_change());
        }

        if machine.is_deleting() {
            return self.finalize_machine(machine).await;
        }
        self.metrics.machine_seen(&key);

        if !machine.has_finalizer() {
            self.set_finalizer(machine, true).await?;
        }
        if machine.phase() == Some(MachinePhase::Failed) {
            debug!("Skipping failed Machine {}", key);
            return Ok(Action::await_change());
        }

        let mut scope = self.scope(machine).await?;
        if self.actuator.exists(&scope).await? {
            self.actuator.update(&mut scope).await?;
        } else if let Some(provider_id) = scope.provider_id().map(str::to_string) {
            self.mark_instance_missing(&mut scope, &provider_id).await?;
            return Ok(Action::await_change());
        } else {
            self.actuator.create(&mut scope).await?;
        }

        self.reset_backoff(&key);
        Ok(Action::requeue(RESYNC_PERIOD))
    }

    async fn finalize_machine(&self, machine: &Machine) -> Result<Action, ControllerError> {
        let key = machine.key();
        if !machine.has_finalizer() {
            self.metrics.machine_gone(&key);
            return Ok(Action::await_change());
        }

        let mut scope = self.scope(machine).await?;
        self.actuator.delete(&mut scope).await?;
        self.set_finalizer(machine, false).await?;

        info!("Machine {} finalized", key);
        self.metrics.machine_gone(&key);
        self.forget_backoff(&key);
        Ok(Action::await_change())
    }

    /// Build the scope, recording terminal configuration errors on the Machine
    async fn scope(&self, machine: &Machine) -> Result<MachineScope, ControllerError> {
        match self.scopes.scope(machine.clone(), self.cancel.child_token()).await {
            Ok(scope) => Ok(scope),
            Err(e) => {
                if e.class() == ErrorClass::InvalidSpec && !machine.is_deleting() {
                    self.record_invalid_configuration(machine, &e).await;
                }
                Err(e)
            }
        }
    }

    async fn record_invalid_configuration(&self, machine: &Machine, error: &ControllerError) {
        let namespace = machine.metadata.namespace.as_deref().unwrap_or("default");
        let name = machine.metadata.name.as_deref().unwrap_or_default();
        let patch = json!({"status": {
            "phase": MachinePhase::Failed,
            "errorReason": reasons::INVALID_CONFIGURATION,
            "errorMessage": error.to_string(),
        }});
        if let Err(e) = self.machines().patch_status(namespace, name, &patch).await {
            warn!("Failed to record invalid configuration on {}: {}", machine.key(), e);
        }
        self.events
            .publish(
                &machine.object_ref(&()),
                EventType::Warning,
                event_reasons::FAILED,
                actions::UPDATE,
                Some(error.to_string()),
            )
            .await;
    }

    /// The VM behind a provisioned Machine is gone
    async fn mark_instance_missing(&self, scope: &mut MachineScope, provider_id: &str) -> Result<(), ControllerError> {
        let message = format!("virtual machine {provider_id} no longer exists");
        warn!("Machine {}: {}", scope.key(), message);
        scope.set_phase(MachinePhase::Failed);
        scope.set_error(reasons::INVALID_CONFIGURATION, message.clone());
        scope.set_condition(Condition::new(
            condition_types::MACHINE_READY,
            ConditionStatus::False,
            reasons::VM_NOT_READY,
            message.clone(),
        ));
        scope.flush().await?;
        self.events
            .publish(
                &scope.machine.object_ref(&()),
                EventType::Warning,
                event_reasons::FAILED,
                actions::UPDATE,
                Some(message),
            )
            .await;
        Ok(())
    }

    async fn set_finalizer(&self, machine: &Machine, present: bool) -> Result<(), ControllerError> {
        let mut finalizers: Vec<String> = machine
            .metadata
            .finalizers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != MACHINE_FINALIZER)
            .collect();
        if present {
            finalizers.push(MACHINE_FINALIZER.to_string());
        }
        debug!(
            "{} finalizer on Machine {}",
            if present { "Adding" } else { "Removing" },
            machine.key()
        );
        let namespace = machine.metadata.namespace.as_deref().unwrap_or("default");
        let name = machine.metadata.name.as_deref().unwrap_or_default();
        self.machines()
            .patch_metadata(namespace, name, &json!({"metadata": {"finalizers": finalizers}}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use azure_client::resource_id;
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn with_finalizer(mut machine: Machine) -> Machine {
        machine.metadata.finalizers = Some(vec![MACHINE_FINALIZER.to_string()]);
        machine
    }

    fn finalizer_patches(harness: &Harness) -> Vec<serde_json::Value> {
        harness
            .store
            .patches()
            .into_iter()
            .filter(|p| p.target == PatchTarget::MachineMetadata && !p.patch["metadata"]["finalizers"].is_null())
            .map(|p| p.patch)
            .collect()
    }

    #[tokio::test]
    async fn test_first_reconcile_adds_finalizer_and_creates() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(FeatureGates::default());
        let machine = test_machine("worker-0", provider_spec_value());

        let action = reconciler.reconcile_machine(&machine).await.unwrap();
        assert_eq!(action, Action::requeue(RESYNC_PERIOD));

        let finalizers = finalizer_patches(&harness);
        assert_eq!(finalizers.len(), 1);
        assert_eq!(finalizers[0]["metadata"]["finalizers"][0], MACHINE_FINALIZER);
        let vm = resource_id::resource_id(SUBSCRIPTION, "my-rg", resource_id::VIRTUAL_MACHINES, "worker-0");
        assert!(harness.mock.contains(&vm));
        assert!(harness.metrics.encode().unwrap().contains("mapi_machine_items 1"));
    }

    #[tokio::test]
    async fn test_deleting_machine_is_finalized() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(FeatureGates::default());
        let machine = with_finalizer(test_machine("worker-0", provider_spec_value()));
        reconciler.reconcile_machine(&machine).await.unwrap();

        let mut deleting = machine.clone();
        deleting.metadata.deletion_timestamp = Some(Time(Utc::now()));
        reconciler.reconcile_machine(&deleting).await.unwrap();

        let vm = resource_id::resource_id(SUBSCRIPTION, "my-rg", resource_id::VIRTUAL_MACHINES, "worker-0");
        assert!(!harness.mock.contains(&vm));
        let finalizers = finalizer_patches(&harness);
        assert_eq!(finalizers.last().unwrap()["metadata"]["finalizers"], json!([]));
        assert!(harness.metrics.encode().unwrap().contains("mapi_machine_items 0"));
    }

    #[tokio::test]
    async fn test_failed_machine_is_left_alone() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(FeatureGates::default());
        let mut machine = with_finalizer(test_machine("worker-0", provider_spec_value()));
        machine.status = Some(crds::MachineStatus {
            phase: Some(MachinePhase::Failed),
            ..Default::default()
        });

        let action = reconciler.reconcile_machine(&machine).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(harness.mock.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_migration_gate_skips_cluster_api_machines() {
        let harness = Harness::new();
        let gates = FeatureGates {
            machine_api_migration: true,
            ..Default::default()
        };
        let reconciler = harness.reconciler(gates);
        let mut machine = test_machine("worker-0", provider_spec_value());
        machine.status = Some(crds::MachineStatus {
            authoritative_api: Some(AuthoritativeApi::ClusterAPI),
            ..Default::default()
        });

        reconciler.reconcile_machine(&machine).await.unwrap();
        assert!(harness.store.patches().is_empty());
        assert!(harness.mock.mutations().is_empty());

        let reconciler = harness.reconciler(FeatureGates::default());
        reconciler.reconcile_machine(&machine).await.unwrap();
        assert!(!harness.mock.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_missing_vm_fails_provisioned_machine() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(FeatureGates::default());
        let mut machine = with_finalizer(test_machine("worker-0", provider_spec_value()));
        machine.status = Some(crds::MachineStatus {
            provider_id: Some(
                "azure:///subscriptions/abc/resourceGroups/my-rg/providers/Microsoft.Compute/virtualMachines/worker-0"
                    .to_string(),
            ),
            phase: Some(MachinePhase::Provisioned),
            ..Default::default()
        });

        let action = reconciler.reconcile_machine(&machine).await.unwrap();
        assert_eq!(action, Action::await_change());
        let patch = harness.store.last_status_patch().unwrap();
        assert_eq!(patch["status"]["phase"], "Failed");
        assert!(harness.mock.mutations().is_empty());
        assert_eq!(harness.events.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_credentials_secret_fails_machine() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(FeatureGates::default());
        let mut value = provider_spec_value();
        value["credentialsSecret"] = json!({"name": "missing"});
        let machine = with_finalizer(test_machine("worker-0", value));

        let err = reconciler.reconcile_machine(&machine).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidSpec);
        assert_eq!(reconciler.error_action(&machine.key(), &err), Action::await_change());
        let patch = harness.store.last_status_patch().unwrap();
        assert_eq!(patch["status"]["phase"], "Failed");
        assert_eq!(patch["status"]["errorReason"], reasons::INVALID_CONFIGURATION);
    }

    #[test]
    fn test_error_action_backs_off_per_key() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(FeatureGates::default());
        let transient = ControllerError::Watch("connection reset".to_string());

        assert_eq!(
            reconciler.error_action("ns/a", &transient),
            Action::requeue(Duration::from_secs(60))
        );
        assert_eq!(
            reconciler.error_action("ns/a", &transient),
            Action::requeue(Duration::from_secs(60))
        );
        assert_eq!(
            reconciler.error_action("ns/a", &transient),
            Action::requeue(Duration::from_secs(120))
        );
        assert_eq!(
            reconciler.error_action("ns/b", &transient),
            Action::requeue(Duration::from_secs(60))
        );
        assert_eq!(
            reconciler.error_action("ns/a", &ControllerError::Cancelled),
            Action::requeue(CANCELLED_REQUEUE)
        );

        reconciler.reset_backoff("ns/a");
        assert_eq!(
            reconciler.error_action("ns/a", &transient),
            Action::requeue(Duration::from_secs(60))
        );
    }
}
