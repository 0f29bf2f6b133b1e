//! Kubernetes Events on Machines and MachineSets
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! the reconcile that emitted it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Reporting component of every Event
pub const CONTROLLER_NAME: &str = "machine-controller-azure";

/// Publishes Events on an object
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventPublisher").finish_non_exhaustive()
    }
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Event reasons
pub mod reasons {
    /// VM created
    pub const CREATE: &str = "Create";
    /// VM reconciled
    pub const UPDATE: &str = "Update";
    /// VM and dependents deleted
    pub const DELETE: &str = "Delete";
    /// Lookup or validation failed outside an actuator verb
    pub const FAILED: &str = "Failed";
    /// Create failed
    pub const FAILED_CREATE: &str = "FailedCreate";
    /// Update failed
    pub const FAILED_UPDATE: &str = "FailedUpdate";
    /// Delete failed
    pub const FAILED_DELETE: &str = "FailedDelete";
}

/// Event actions
pub mod actions {
    /// Actuator Create
    pub const CREATE: &str = "Create";
    /// Actuator Update
    pub const UPDATE: &str = "Update";
    /// Actuator Delete
    pub const DELETE: &str = "Delete";
    /// MachineSet sizing
    pub const ANNOTATE: &str = "Annotate";
}
