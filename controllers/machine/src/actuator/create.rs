use super::plan::{ResourcePlan, plan};
use super::{Actuator, CREATE_STEPS, CreateStep, status, validation};
use crate::error::ControllerError;
use crate::events::{actions, reasons as event_reasons};
use crate::scope::MachineScope;
use crate::services::availability_sets::AvailabilitySets;
use crate::services::disks::Disks;
use crate::services::groups::Groups;
use crate::services::network_interfaces::NetworkInterfaces;
use crate::services::public_ips::PublicIps;
use crate::services::virtual_machines::VirtualMachines;
use crate::services::vm_extensions::VmExtensions;
use crate::services::{AzureContext, ResourceService, ensure};
use azure_client::AzureError;
use crds::{Condition, ConditionStatus, MachinePhase, condition_types, reasons};
use kube::runtime::events::EventType;
use tokio::time::Instant;
use tracing::{debug, info};

/// Validate, plan and build the plan's resources, then reflect the VM
pub(super) async fn run(actuator: &Actuator, scope: &mut MachineScope) -> Result<(), ControllerError> {
    let started = Instant::now();
    info!("Creating Machine {}", scope.key());

    validation::validate_spec(&scope.provider_spec)?;
    let sku = actuator.sku(scope).await?;
    validation::validate_sku(&scope.provider_spec, &sku)?;
    let plan = plan(scope, &sku)?;

    for step in CREATE_STEPS {
        ensure_step(&scope.azure, &plan, *step).await?;
    }

    let vm = VirtualMachines::new(&scope.azure)
        .get(&plan.vm)
        .await?
        .ok_or_else(|| AzureError::NotFound(format!("virtual machine {} after create", plan.vm.name)))?;
    let view = status::reflect(scope, &vm, &plan.nic_id()).await?;

    scope.set_phase(MachinePhase::Provisioning);
    scope.clear_error();
    scope.set_condition(Condition::new(
        condition_types::MACHINE_CREATED,
        ConditionStatus::True,
        reasons::MACHINE_CREATION_SUCCEEDED,
        "virtual machine created",
    ));
    scope.set_condition(status::ready_condition(view.state()));

    actuator
        .metrics
        .observe_create_duration(scope.namespace(), started.elapsed());
    actuator
        .event(
            scope,
            EventType::Normal,
            event_reasons::CREATE,
            actions::CREATE,
            format!("Created virtual machine {}", plan.vm.name),
        )
        .await;
    Ok(())
}

/// Ensure one step of the plan. Existing resources are left as they are.
pub(super) async fn ensure_step(ctx: &AzureContext, plan: &ResourcePlan, step: CreateStep) -> Result<(), ControllerError> {
    debug!("Ensuring {:?} for {}", step, plan.vm.name);
    match step {
        CreateStep::ResourceGroup => {
            ensure(&Groups::new(ctx), &plan.group).await?;
        }
        CreateStep::PublicIp => {
            if let Some(public_ip) = &plan.public_ip {
                ensure(&PublicIps::new(ctx), public_ip).await?;
            }
        }
        CreateStep::NetworkInterface => {
            ensure(&NetworkInterfaces::new(ctx), &plan.nic).await?;
        }
        CreateStep::AvailabilitySet => {
            if let Some(set) = &plan.availability_set {
                ensure(&AvailabilitySets::new(ctx), set).await?;
            }
        }
        CreateStep::DataDisks => {
            let disks = Disks::new(ctx);
            for planned in &plan.data_disks {
                ensure(&disks, &planned.disk).await?;
            }
        }
        CreateStep::VirtualMachine => {
            ensure(&VirtualMachines::new(ctx), &plan.vm).await?;
        }
        CreateStep::Extensions => {
            let extensions = VmExtensions::new(ctx);
            for extension in &plan.extensions {
                ensure(&extensions, extension).await?;
            }
        }
    }
    Ok(())
}
