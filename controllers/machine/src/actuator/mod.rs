//! Machine actuator
//!
//! Four entry points: [`Actuator::exists`], [`Actuator::create`],
//! [`Actuator::update`] and [`Actuator::delete`]. Each works on a
//! [`MachineScope`] and writes status back through the scope before
//! returning, whether or not the verb succeeded.
//!
//! Creation walks [`CREATE_STEPS`] in order. Every step is Get, then create
//! if absent, so an interrupted create resumes on the next reconcile without
//! duplicating resources.

mod create;
mod delete;
pub mod plan;
pub mod status;
mod update;
pub mod validation;


use crate::decode::VmView;
use crate::error::{ControllerError, ErrorClass};
use crate::events::{EventPublisher, actions, reasons as event_reasons};
use crate::metrics::Metrics;
use crate::naming;
use crate::scope::MachineScope;
use crate::services::ResourceService;
use crate::services::virtual_machines::{VirtualMachines, VmSpec};
use crate::skus::{Sku, SkuCache};
use crds::{Condition, ConditionStatus, MachinePhase, VmState, condition_types, reasons};
use kube::Resource;
use kube::runtime::events::EventType;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Resources ensured by Create, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    /// Resource group (shared, never deleted)
    ResourceGroup,
    /// Public IP, when requested
    PublicIp,
    /// Primary NIC
    NetworkInterface,
    /// Availability set, for Machines outside zones
    AvailabilitySet,
    /// Data disks
    DataDisks,
    /// Virtual machine
    VirtualMachine,
    /// VM extensions
    Extensions,
}

/// Create order
pub const CREATE_STEPS: &[CreateStep] = &[
    CreateStep::ResourceGroup,
    CreateStep::PublicIp,
    CreateStep::NetworkInterface,
    CreateStep::AvailabilitySet,
    CreateStep::DataDisks,
    CreateStep::VirtualMachine,
    CreateStep::Extensions,
];

/// Actuator verb, for events and failure handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Create
    Create,
    /// Update
    Update,
    /// Delete
    Delete,
}

impl Verb {
    fn failure_reason(self) -> &'static str {
        match self {
            Verb::Create => event_reasons::FAILED_CREATE,
            Verb::Update => event_reasons::FAILED_UPDATE,
            Verb::Delete => event_reasons::FAILED_DELETE,
        }
    }

    fn action(self) -> &'static str {
        match self {
            Verb::Create => actions::CREATE,
            Verb::Update => actions::UPDATE,
            Verb::Delete => actions::DELETE,
        }
    }
}

/// Shared actuator state
#[derive(Clone)]
pub struct Actuator {
    skus: Arc<SkuCache>,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator").finish_non_exhaustive()
    }
}

impl Actuator {
    /// Create an actuator
    pub fn new(skus: Arc<SkuCache>, events: Arc<dyn EventPublisher>, metrics: Arc<Metrics>) -> Self {
        Self { skus, events, metrics }
    }

    /// Whether the Machine's VM exists and is not being deleted. Never mutates.
    pub async fn exists(&self, scope: &MachineScope) -> Result<bool, ControllerError> {
        let vm_name = naming::vm_name(scope.name())?;
        let spec = VmSpec::reference(vm_name, scope.resource_group.clone());
        let Some(document) = VirtualMachines::new(&scope.azure).get(&spec).await? else {
            debug!("Virtual machine of {} does not exist", scope.key());
            return Ok(false);
        };
        let state = VmView::decode(&document).state();
        Ok(state != VmState::Deleting)
    }

    /// Create the VM and everything it depends on
    pub async fn create(&self, scope: &mut MachineScope) -> Result<(), ControllerError> {
        let result = create::run(self, scope).await;
        self.finish(scope, Verb::Create, result).await
    }

    /// Converge drift on an existing VM and refresh status
    pub async fn update(&self, scope: &mut MachineScope) -> Result<(), ControllerError> {
        let result = update::run(self, scope).await;
        self.finish(scope, Verb::Update, result).await
    }

    /// Delete the VM and its dependents
    pub async fn delete(&self, scope: &mut MachineScope) -> Result<(), ControllerError> {
        let result = delete::run(scope).await;
        if result.is_ok() {
            self.event(
                scope,
                EventType::Normal,
                event_reasons::DELETE,
                actions::DELETE,
                format!("Deleted Machine {}", scope.name()),
            )
            .await;
        }
        self.finish(scope, Verb::Delete, result).await
    }

    /// SKU of the Machine's VM size in its region
    async fn sku(&self, scope: &MachineScope) -> Result<Sku, ControllerError> {
        let sku = self
            .skus
            .vm_size(
                scope.azure.client.as_ref(),
                scope.azure.profile.skus,
                &scope.location,
                &scope.provider_spec.vm_size,
                &scope.azure.cancel,
            )
            .await?;
        Ok(sku)
    }

    async fn event(&self, scope: &MachineScope, type_: EventType, reason: &str, action: &str, note: String) {
        let reference = scope.machine.object_ref(&());
        self.events.publish(&reference, type_, reason, action, Some(note)).await;
    }

    /// Record the outcome of a verb in status and events, then flush
    async fn finish(
        &self,
        scope: &mut MachineScope,
        verb: Verb,
        result: Result<(), ControllerError>,
    ) -> Result<(), ControllerError> {
        let Err(err) = result else {
            return scope.flush().await;
        };

        let class = err.class();
        if class == ErrorClass::Cancelled {
            debug!("{:?} of {} was cancelled", verb, scope.key());
        } else {
            error!(machine = %scope.key(), "{:?} failed: {}", verb, err);
            self.record_failure(scope, verb, &err);
            self.event(scope, EventType::Warning, verb.failure_reason(), verb.action(), err.to_string())
                .await;
            if verb == Verb::Create {
                self.metrics.record_create_failure(scope.namespace(), err.reason());
            }
        }

        if let Err(flush_err) = scope.flush().await {
            warn!("Failed to write status of {} after {:?} failure: {}", scope.key(), verb, flush_err);
        }
        Err(err)
    }

    fn record_failure(&self, scope: &mut MachineScope, verb: Verb, err: &ControllerError) {
        if verb == Verb::Delete {
            return;
        }
        match err.class() {
            ErrorClass::InvalidSpec => {
                scope.set_phase(MachinePhase::Failed);
                scope.set_error(reasons::INVALID_CONFIGURATION, err.to_string());
                let condition_type = match verb {
                    Verb::Create => condition_types::MACHINE_CREATED,
                    _ => condition_types::MACHINE_READY,
                };
                scope.set_condition(Condition::new(
                    condition_type,
                    ConditionStatus::False,
                    reasons::INVALID_CONFIGURATION,
                    err.to_string(),
                ));
            }
            ErrorClass::Transient | ErrorClass::QuotaOrAuthorization => {
                scope.set_condition(Condition::new(
                    condition_types::MACHINE_READY,
                    ConditionStatus::False,
                    err.reason(),
                    err.to_string(),
                ));
            }
            ErrorClass::Cancelled => {}
        }
    }
}
