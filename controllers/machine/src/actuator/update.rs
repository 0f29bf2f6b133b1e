use super::create::ensure_step;
use super::plan::{ResourcePlan, plan};
use super::{Actuator, CREATE_STEPS, status, validation};
use crate::decode::VmView;
use crate::error::ControllerError;
use crate::events::{actions, reasons as event_reasons};
use crate::scope::MachineScope;
use crate::services::interface_load_balancers::{self, in_sync};
use crate::services::tags::{Tags, TagsSpec, missing};
use crate::services::virtual_machines::VirtualMachines;
use crate::services::{AzureContext, ResourceService};
use azure_client::AzureError;
use kube::runtime::events::EventType;
use tracing::{debug, info, warn};

/// Power states that need a start
const STOPPED_POWER_STATES: &[&str] = &["stopped", "deallocated"];

/// Re-ensure the plan, converge drift, then refresh status
pub(super) async fn run(actuator: &Actuator, scope: &mut MachineScope) -> Result<(), ControllerError> {
    debug!("Updating Machine {}", scope.key());

    validation::validate_spec(&scope.provider_spec)?;
    let sku = actuator.sku(scope).await?;
    let plan = plan(scope, &sku)?;

    for step in CREATE_STEPS {
        ensure_step(&scope.azure, &plan, *step).await?;
    }

    let mut changed = reconcile_backend_pools(&scope.azure, &plan).await?;
    changed |= reconcile_tags(&scope.azure, &plan).await?;

    let vms = VirtualMachines::new(&scope.azure);
    let vm = vms
        .get(&plan.vm)
        .await?
        .ok_or_else(|| AzureError::NotFound(format!("virtual machine {}", plan.vm.name)))?;
    let power_state = VmView::decode(&vm).power_state().map(str::to_string);
    let vm = match power_state.as_deref() {
        Some(power) if STOPPED_POWER_STATES.contains(&power) => {
            info!("Virtual machine {} is {}, starting it", plan.vm.name, power);
            vms.start(&plan.vm).await?;
            changed = true;
            vms.get(&plan.vm).await?.unwrap_or(vm)
        }
        _ => vm,
    };

    let view = status::reflect(scope, &vm, &plan.nic_id()).await?;
    let state = view.state();
    scope.set_condition(status::ready_condition(state));
    if let Some(phase) = status::phase_after_update(state, scope.provider_id().is_some(), scope.has_node_ref()) {
        scope.set_phase(phase);
    }

    if changed {
        actuator
            .event(
                scope,
                EventType::Normal,
                event_reasons::UPDATE,
                actions::UPDATE,
                format!("Updated virtual machine {}", plan.vm.name),
            )
            .await;
    }
    Ok(())
}

/// Bring NIC backend pool membership to the plan. Returns whether it wrote.
async fn reconcile_backend_pools(ctx: &AzureContext, plan: &ResourcePlan) -> Result<bool, ControllerError> {
    let service = interface_load_balancers::for_context(ctx);
    let desired = plan.backend_pools();
    let Some(nic) = service.get(&desired).await? else {
        return Ok(false);
    };
    if in_sync(&nic, &desired.backend_pool_ids) {
        return Ok(false);
    }
    if !service.capabilities().create_or_update {
        warn!(
            "Backend pools of {} have drifted but cannot be updated on this cloud, leaving them",
            desired.nic_id
        );
        return Ok(false);
    }
    service.create_or_update(&desired).await?;
    Ok(true)
}

/// Upsert missing tags on the VM and NIC. Returns whether it wrote.
async fn reconcile_tags(ctx: &AzureContext, plan: &ResourcePlan) -> Result<bool, ControllerError> {
    let tags = Tags::new(ctx);
    let mut changed = false;
    for scope in [VirtualMachines::new(ctx).id(&plan.vm), plan.nic_id()] {
        let spec = TagsSpec {
            scope,
            tags: plan.tags.clone(),
        };
        let current = tags.get(&spec).await?.unwrap_or_default();
        if missing(&current, &spec.tags).is_empty() {
            continue;
        }
        tags.create_or_update(&spec).await?;
        changed = true;
    }
    Ok(changed)
}
