use super::plan::availability_set_name;
use crate::error::ControllerError;
use crate::naming::{self, NamingError};
use crate::scope::MachineScope;
use crate::services::ResourceService;
use crate::services::availability_sets::{AvailabilitySetSpec, AvailabilitySets};
use crate::services::disks::{DiskSpec, Disks};
use crate::services::network_interfaces::{NetworkInterfaces, NicSpec};
use crate::services::public_ips::{PublicIpSpec, PublicIps};
use crate::services::virtual_machines::{VirtualMachines, VmSpec};
use azure_client::AzureError;
use crds::{DiskDeletionPolicy, MachinePhase};
use tracing::{debug, info, warn};

/// Name of a resource Create could have made. A name that breaks the
/// naming rules was never created, so there is nothing to delete.
fn created(name: Result<String, NamingError>) -> Option<String> {
    match name {
        Ok(name) => Some(name),
        Err(e) => {
            debug!("Nothing to delete: {}", e);
            None
        }
    }
}

/// Delete VM, NIC, public IP, OS disk, data disks, then the availability set
/// if it is empty. The resource group stays.
pub(super) async fn run(scope: &mut MachineScope) -> Result<(), ControllerError> {
    info!("Deleting Machine {}", scope.key());
    scope.set_phase(MachinePhase::Deleting);

    let ctx = scope.azure.clone();
    let rg = scope.resource_group.clone();
    let machine = scope.name().to_string();

    if let Some(name) = created(naming::vm_name(&machine)) {
        VirtualMachines::new(&ctx)
            .delete(&VmSpec::reference(name, rg.clone()))
            .await?;
    }

    if let Some(name) = created(naming::nic_name(&machine)) {
        NetworkInterfaces::new(&ctx)
            .delete(&NicSpec {
                name,
                resource_group: rg.clone(),
                ..Default::default()
            })
            .await?;
    }

    if let Some(name) = created(naming::public_ip_name(&machine)) {
        PublicIps::new(&ctx)
            .delete(&PublicIpSpec {
                name,
                resource_group: rg.clone(),
                ..Default::default()
            })
            .await?;
    }

    let disks = Disks::new(&ctx);
    if let Some(name) = created(naming::os_disk_name(&machine)) {
        disks.delete(&DiskSpec::reference(name, rg.clone())).await?;
    }
    for disk in &scope.provider_spec.data_disks {
        let Some(name) = created(naming::data_disk_name(&machine, &disk.name_suffix)) else {
            continue;
        };
        if disk.deletion_policy == DiskDeletionPolicy::Detach {
            info!("Keeping data disk {} of {}", name, scope.key());
            continue;
        }
        disks.delete(&DiskSpec::reference(name, rg.clone())).await?;
    }

    let availability_set = match availability_set_name(scope) {
        Ok(name) => name,
        Err(ControllerError::Naming(e)) => created(Err(e)),
        Err(e) => return Err(e),
    };
    if let Some(name) = availability_set {
        let spec = AvailabilitySetSpec {
            name,
            resource_group: rg.clone(),
            ..Default::default()
        };
        if let Err(e) = AvailabilitySets::new(&ctx).delete(&spec).await {
            if matches!(e, AzureError::Cancelled) {
                return Err(e.into());
            }
            warn!("Failed to delete availability set {}: {}", spec.name, e);
        }
    }

    scope.set_phase(MachinePhase::Deleted);
    info!("Deleted Machine {}", scope.key());
    Ok(())
}
