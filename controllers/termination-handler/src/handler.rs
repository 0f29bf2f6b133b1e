//! Poll scheduled events and retire the Machine of a terminating node

use crate::error::HandlerError;
use crate::metadata::{MetadataSource, ScheduledEvent};
use async_trait::async_trait;
use crds::{Condition, ConditionStatus, Machine, condition_types, labels, reasons, set_condition};
use k8s_openapi::api::core::v1::Node;
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Kubernetes operations the handler needs
#[async_trait]
pub trait MachineApi: Send + Sync {
    /// Value of the Node's machine annotation
    async fn node_machine(&self, node: &str) -> Result<Option<String>, HandlerError>;

    /// Fetch a Machine; `None` when it is gone
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, HandlerError>;

    /// Merge-patch the Machine status
    async fn patch_machine_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), HandlerError>;

    /// Delete a Machine; absent Machines are not an error
    async fn delete_machine(&self, namespace: &str, name: &str) -> Result<(), HandlerError>;
}

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == 404)
}

/// [`MachineApi`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeMachineApi {
    client: Client,
}

impl std::fmt::Debug for KubeMachineApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeMachineApi").finish_non_exhaustive()
    }
}

impl KubeMachineApi {
    /// Create the API
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MachineApi for KubeMachineApi {
    async fn node_machine(&self, node: &str) -> Result<Option<String>, HandlerError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node = api.get(node).await?;
        Ok(node
            .metadata
            .annotations
            .and_then(|mut a| a.remove(labels::NODE_MACHINE)))
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, HandlerError> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(machine) => Ok(Some(machine)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_machine_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), HandlerError> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn delete_machine(&self, namespace: &str, name: &str) -> Result<(), HandlerError> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// How the handler stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The Machine was marked and deleted
    Terminated {
        /// `namespace/name` of the Machine
        machine: String,
    },
    /// Shutdown was requested first
    Shutdown,
}

/// Watches one node for termination notices
pub struct Handler {
    metadata: Arc<dyn MetadataSource>,
    machines: Arc<dyn MachineApi>,
    node_name: String,
    namespace: String,
    poll_interval: Duration,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("node_name", &self.node_name)
            .field("namespace", &self.namespace)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Handler {
    /// Create a handler for `node_name`; `namespace` applies to annotations
    /// that carry only a Machine name
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        machines: Arc<dyn MachineApi>,
        node_name: &str,
        namespace: &str,
        poll_interval: Duration,
    ) -> Self {
        Self {
            metadata,
            machines,
            node_name: node_name.to_string(),
            namespace: namespace.to_string(),
            poll_interval,
        }
    }

    /// Resolve the Machine of this node as `(namespace, name)`
    async fn machine_of_node(&self) -> Result<(String, String), HandlerError> {
        let annotation = self
            .machines
            .node_machine(&self.node_name)
            .await?
            .filter(|a| !a.is_empty())
            .ok_or_else(|| HandlerError::MachineNotAnnotated(self.node_name.clone()))?;
        Ok(match annotation.split_once('/') {
            Some((namespace, name)) => (namespace.to_string(), name.to_string()),
            None => (self.namespace.clone(), annotation),
        })
    }

    /// Poll until a termination notice names this node, then mark and delete
    /// its Machine. Metadata errors are logged and retried.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<Outcome, HandlerError> {
        let (namespace, name) = self.machine_of_node().await?;
        info!(
            node = %self.node_name,
            machine = %format!("{namespace}/{name}"),
            interval_secs = self.poll_interval.as_secs(),
            "Watching for scheduled termination"
        );

        loop {
            match self.metadata.scheduled_events().await {
                Ok(events) => {
                    if let Some(event) = events.termination_for(&self.node_name) {
                        self.terminate(&namespace, &name, event).await?;
                        return Ok(Outcome::Terminated {
                            machine: format!("{namespace}/{name}"),
                        });
                    }
                    debug!(events = events.events.len(), "No termination scheduled");
                }
                Err(e) => warn!("Failed to fetch scheduled events: {}", e),
            }

            tokio::select! {
                () = shutdown.cancelled() => return Ok(Outcome::Shutdown),
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn terminate(&self, namespace: &str, name: &str, event: &ScheduledEvent) -> Result<(), HandlerError> {
        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            not_before = %event.not_before,
            "Node {} is scheduled for termination, deleting Machine {}/{}",
            self.node_name,
            namespace,
            name
        );

        let Some(machine) = self.machines.get_machine(namespace, name).await? else {
            warn!("Machine {}/{} is already gone", namespace, name);
            return Ok(());
        };

        let mut conditions = machine.status.map(|s| s.conditions).unwrap_or_default();
        set_condition(
            &mut conditions,
            Condition::new(
                condition_types::TERMINATED,
                ConditionStatus::True,
                reasons::INSTANCE_TERMINATED,
                format!("The VM was terminated by Azure: {} event {}", event.event_type, event.event_id),
            ),
        );
        let patch = json!({"status": {"conditions": serde_json::to_value(&conditions)?}});
        self.machines.patch_machine_status(namespace, name, &patch).await?;
        self.machines.delete_machine(namespace, name).await
    }
}
