//! Desired Azure resources of one Machine
//!
//! [`ResourcePlan`] is a pure function of the scope and the VM size's SKU.
//! The create sequence and the delete sequence both work from it, so names
//! and IDs are derived in one place.

use super::validation;
use crate::error::ControllerError;
use crate::naming;
use crate::scope::MachineScope;
use crate::services::availability_sets::AvailabilitySetSpec;
use crate::services::disks::DiskSpec;
use crate::services::groups::GroupSpec;
use crate::services::interface_load_balancers::BackendPoolSpec;
use crate::services::network_interfaces::NicSpec;
use crate::services::public_ips::{PublicIpSpec, dns_label};
use crate::services::virtual_machines::{DataDiskAttachment, OsDiskSpec, VmSpec};
use crate::services::vm_extensions::ExtensionSpec;
use crate::skus::Sku;
use azure_client::resource_id;
use crds::{DiskDeletionPolicy, VmIdentity};
use std::collections::BTreeMap;

/// Value of the cluster ownership tag
pub const CLUSTER_TAG_OWNED: &str = "owned";

/// Ownership tag key for `cluster`
pub fn cluster_tag(cluster: &str) -> String {
    format!("kubernetes.io_cluster.{cluster}")
}

/// A data disk and what happens to it when the Machine goes away
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDataDisk {
    /// Disk resource
    pub disk: DiskSpec,
    /// Deletion policy
    pub deletion_policy: DiskDeletionPolicy,
}

/// Every resource a Machine owns or references
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePlan {
    /// Resource group
    pub group: GroupSpec,
    /// Public IP, when requested
    pub public_ip: Option<PublicIpSpec>,
    /// Primary NIC
    pub nic: NicSpec,
    /// Availability set, for Machines outside zones
    pub availability_set: Option<AvailabilitySetSpec>,
    /// Data disks
    pub data_disks: Vec<PlannedDataDisk>,
    /// Virtual machine
    pub vm: VmSpec,
    /// VM extensions
    pub extensions: Vec<ExtensionSpec>,
    /// Tags every resource carries
    pub tags: BTreeMap<String, String>,
}

impl ResourcePlan {
    /// NIC backend pool membership
    pub fn backend_pools(&self) -> BackendPoolSpec {
        BackendPoolSpec {
            nic_id: self.nic_id(),
            backend_pool_ids: self.nic.backend_pool_ids.clone(),
        }
    }

    /// Resource ID of the NIC
    pub fn nic_id(&self) -> String {
        self.vm.nic_id.clone()
    }
}

/// Tags of every resource: the provider spec's, plus cluster ownership
pub fn resource_tags(scope: &MachineScope) -> BTreeMap<String, String> {
    let mut tags = scope.provider_spec.tags.clone();
    tags.insert(cluster_tag(&scope.cluster_name), CLUSTER_TAG_OWNED.to_string());
    tags
}

/// Name of the Machine's availability set, if it has one.
///
/// Zonal and spot Machines never join a set. Otherwise an explicit name from
/// the provider spec wins over the per-MachineSet default.
pub fn availability_set_name(scope: &MachineScope) -> Result<Option<String>, ControllerError> {
    let spec = &scope.provider_spec;
    if spec.zone.as_deref().is_some_and(|z| !z.is_empty()) || spec.spot_vm_options.is_some() {
        return Ok(None);
    }
    if let Some(name) = spec.availability_set.as_deref().filter(|n| !n.is_empty()) {
        return Ok(Some(name.to_string()));
    }
    match scope.machine_set() {
        Some(machine_set) => Ok(Some(naming::availability_set_name(&scope.cluster_name, machine_set)?)),
        None => Ok(None),
    }
}

fn qualify(scope: &MachineScope, resource_group: &str, resource_type: &str, name_or_id: &str) -> String {
    if name_or_id.starts_with('/') {
        name_or_id.to_string()
    } else {
        resource_id::resource_id(scope.subscription_id(), resource_group, resource_type, name_or_id)
    }
}

/// Build the plan for `scope`
pub fn plan(scope: &MachineScope, sku: &Sku) -> Result<ResourcePlan, ControllerError> {
    let spec = &scope.provider_spec;
    let machine = scope.name();
    let subscription = scope.subscription_id();
    let rg = scope.resource_group.clone();
    let network_rg = scope.network_resource_group.clone();
    let location = scope.location.clone();
    let zone = spec.zone.clone().filter(|z| !z.is_empty());
    let tags = resource_tags(scope);

    let vm_name = naming::vm_name(machine)?;
    let nic_name = naming::nic_name(machine)?;
    let os_disk_name = naming::os_disk_name(machine)?;

    let public_ip = if spec.public_ip {
        let name = naming::public_ip_name(machine)?;
        Some(PublicIpSpec {
            dns_label: dns_label(&name),
            name,
            resource_group: rg.clone(),
            location: location.clone(),
            zone: zone.clone(),
            tags: tags.clone(),
        })
    } else {
        None
    };

    let nic = NicSpec {
        name: nic_name.clone(),
        resource_group: rg.clone(),
        location: location.clone(),
        subnet_id: resource_id::subnet_id(subscription, &network_rg, &spec.vnet, &spec.subnet),
        public_ip_id: public_ip.as_ref().map(|pip| {
            resource_id::resource_id(subscription, &rg, resource_id::PUBLIC_IP_ADDRESSES, &pip.name)
        }),
        accelerated_networking: validation::accelerated_networking(spec, sku, scope.is_stack_hub())?,
        application_security_group_ids: spec
            .application_security_groups
            .iter()
            .map(|asg| qualify(scope, &network_rg, resource_id::APPLICATION_SECURITY_GROUPS, asg))
            .collect(),
        backend_pool_ids: spec
            .backend_pools
            .iter()
            .map(|pool| {
                let pool_rg = pool.resource_group.as_deref().unwrap_or(&network_rg);
                resource_id::backend_pool_id(subscription, pool_rg, &pool.load_balancer, &pool.name)
            })
            .collect(),
        tags: tags.clone(),
    };
    let nic_id = resource_id::resource_id(subscription, &rg, resource_id::NETWORK_INTERFACES, &nic_name);

    let availability_set = availability_set_name(scope)?.map(|name| AvailabilitySetSpec {
        name,
        resource_group: rg.clone(),
        location: location.clone(),
        tags: tags.clone(),
    });
    let availability_set_id = availability_set
        .as_ref()
        .map(|set| resource_id::resource_id(subscription, &rg, resource_id::AVAILABILITY_SETS, &set.name));

    let mut data_disks = Vec::with_capacity(spec.data_disks.len());
    let mut attachments = Vec::with_capacity(spec.data_disks.len());
    for disk in &spec.data_disks {
        let name = naming::data_disk_name(machine, &disk.name_suffix)?;
        attachments.push(DataDiskAttachment {
            name: name.clone(),
            disk_id: resource_id::resource_id(subscription, &rg, resource_id::DISKS, &name),
            lun: disk.lun,
            caching: disk.caching_type.clone(),
        });
        data_disks.push(PlannedDataDisk {
            disk: DiskSpec {
                name,
                resource_group: rg.clone(),
                location: location.clone(),
                zone: zone.clone(),
                size_gb: disk.disk_size_gb,
                storage_account_type: disk.managed_disk.storage_account_type.clone(),
                disk_encryption_set_id: disk.managed_disk.disk_encryption_set.as_ref().map(|d| d.id.clone()),
                tags: tags.clone(),
            },
            deletion_policy: disk.deletion_policy,
        });
    }

    let identity = match &spec.identity {
        VmIdentity::UserAssigned { identities } => VmIdentity::UserAssigned {
            identities: identities
                .iter()
                .map(|id| qualify(scope, &rg, resource_id::USER_ASSIGNED_IDENTITIES, id))
                .collect(),
        },
        other => other.clone(),
    };

    let vm = VmSpec {
        name: vm_name.clone(),
        resource_group: rg.clone(),
        location: location.clone(),
        zone,
        size: spec.vm_size.clone(),
        image: spec.image.clone(),
        os_disk: OsDiskSpec {
            name: os_disk_name,
            os_type: spec.os_disk.os_type.clone(),
            size_gb: spec.os_disk.disk_size_gb,
            storage_account_type: spec.os_disk.managed_disk.storage_account_type.clone(),
            caching: spec.os_disk.caching_type.clone(),
            disk_encryption_set_id: spec
                .os_disk
                .managed_disk
                .disk_encryption_set
                .as_ref()
                .map(|d| d.id.clone()),
        },
        data_disks: attachments,
        nic_id,
        availability_set_id,
        identity,
        security_profile: spec.security_profile.clone(),
        boot_diagnostics: spec.diagnostics.as_ref().and_then(|d| d.boot.clone()),
        ssh_public_key: spec.ssh_public_key.clone().filter(|k| !k.is_empty()),
        user_data: scope.user_data.clone(),
        spot_max_price: spec.spot_vm_options.as_ref().map(|o| o.max_price.clone()),
        tags: tags.clone(),
    };

    let extensions = spec
        .vm_extensions
        .iter()
        .map(|ext| ExtensionSpec {
            name: ext.name.clone(),
            vm_name: vm_name.clone(),
            resource_group: rg.clone(),
            location: location.clone(),
            publisher: ext.publisher.clone(),
            extension_type: ext.extension_type.clone(),
            version: ext.version.clone(),
            settings: ext.settings.clone(),
            protected_settings: ext.protected_settings.clone(),
            tags: tags.clone(),
        })
        .collect();

    Ok(ResourcePlan {
        group: GroupSpec {
            name: rg,
            location,
            tags: tags.clone(),
        },
        public_ip,
        nic,
        availability_set,
        data_disks,
        vm,
        extensions,
        tags,
    })
}
