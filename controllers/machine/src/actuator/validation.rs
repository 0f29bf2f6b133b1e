//! Provider spec checks run before any cloud mutation

use crate::error::ControllerError;
use crate::skus::Sku;
use crds::{AzureMachineProviderSpec, BootDiagnosticsStorage, VmIdentity};
use std::collections::HashSet;
use tracing::warn;

/// Highest LUN Azure accepts
pub const MAX_LUN: i32 = 63;

fn invalid(message: impl Into<String>) -> ControllerError {
    ControllerError::InvalidConfig(message.into())
}

/// Required fields, mutually exclusive fields and data disk layout
pub fn validate_spec(spec: &AzureMachineProviderSpec) -> Result<(), ControllerError> {
    if spec.vm_size.is_empty() {
        return Err(invalid("vmSize is required"));
    }
    if spec.vnet.is_empty() {
        return Err(invalid("vnet is required"));
    }
    if spec.subnet.is_empty() {
        return Err(invalid("subnet is required"));
    }
    if !spec.image.is_resource_id() && !spec.image.is_marketplace() {
        return Err(invalid(
            "image needs either resourceID or publisher, offer, sku and version",
        ));
    }
    let zoned = spec.zone.as_deref().is_some_and(|z| !z.is_empty());
    let in_set = spec.availability_set.as_deref().is_some_and(|s| !s.is_empty());
    if zoned && in_set {
        return Err(invalid("zone and availabilitySet are mutually exclusive"));
    }
    if spec.os_disk.disk_size_gb < 0 {
        return Err(invalid("osDisk.diskSizeGB must not be negative"));
    }

    let mut luns = HashSet::new();
    let mut suffixes = HashSet::new();
    for disk in &spec.data_disks {
        if disk.name_suffix.is_empty() {
            return Err(invalid("dataDisks[].nameSuffix is required"));
        }
        if disk.disk_size_gb <= 0 {
            return Err(invalid(format!(
                "data disk {} needs a positive diskSizeGB",
                disk.name_suffix
            )));
        }
        if !(0..=MAX_LUN).contains(&disk.lun) {
            return Err(invalid(format!(
                "data disk {} has lun {} outside 0-{MAX_LUN}",
                disk.name_suffix, disk.lun
            )));
        }
        if !luns.insert(disk.lun) {
            return Err(invalid(format!("lun {} is used by more than one data disk", disk.lun)));
        }
        if !suffixes.insert(disk.name_suffix.as_str()) {
            return Err(invalid(format!(
                "nameSuffix {} is used by more than one data disk",
                disk.name_suffix
            )));
        }
    }

    if let VmIdentity::UserAssigned { identities } = &spec.identity {
        if identities.is_empty() {
            return Err(invalid("UserAssigned identity needs at least one identity"));
        }
    }
    let customer_managed_without_uri = spec
        .diagnostics
        .as_ref()
        .and_then(|d| d.boot.as_ref())
        .is_some_and(|boot| {
            boot.storage_account_type == BootDiagnosticsStorage::CustomerManaged
                && boot
                    .customer_managed
                    .as_ref()
                    .is_none_or(|c| c.storage_account_uri.is_empty())
        });
    if customer_managed_without_uri {
        return Err(invalid("CustomerManaged boot diagnostics need a storageAccountURI"));
    }
    Ok(())
}

/// Checks that depend on the SKU's capabilities in the region
pub fn validate_sku(spec: &AzureMachineProviderSpec, sku: &Sku) -> Result<(), ControllerError> {
    if let Some(zone) = spec.zone.as_deref().filter(|z| !z.is_empty()) {
        if !sku.zones.is_empty() && !sku.zones.iter().any(|z| z == zone) {
            return Err(invalid(format!(
                "vmSize {} is not offered in zone {zone} (zones: {})",
                sku.name,
                sku.zones.join(",")
            )));
        }
    }
    Ok(())
}

/// Whether the NIC gets accelerated networking.
///
/// A request the SKU cannot honour is invalid; on Azure Stack Hub the flag is
/// dropped with a warning.
pub fn accelerated_networking(
    spec: &AzureMachineProviderSpec,
    sku: &Sku,
    stack_hub: bool,
) -> Result<bool, ControllerError> {
    if !spec.accelerated_networking {
        return Ok(false);
    }
    if stack_hub {
        warn!("Accelerated networking is not available on Azure Stack Hub, ignoring it");
        return Ok(false);
    }
    if !sku.accelerated_networking {
        return Err(invalid(format!(
            "vmSize {} does not support accelerated networking",
            sku.name
        )));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{BootDiagnostics, DataDisk, Diagnostics, Image};
    use std::collections::BTreeSet;

    fn spec() -> AzureMachineProviderSpec {
        AzureMachineProviderSpec {
            vm_size: "Standard_D4s_v3".to_string(),
            vnet: "my-vnet".to_string(),
            subnet: "my-subnet".to_string(),
            image: Image {
                resource_id: "/resourceGroups/rg/providers/Microsoft.Compute/images/rhcos".to_string(),
                ..Default::default()
            },
            zone: Some("1".to_string()),
            ..Default::default()
        }
    }

    fn sku(accelerated: bool) -> Sku {
        Sku {
            name: "Standard_D4s_v3".to_string(),
            resource_type: "virtualMachines".to_string(),
            vcpus: 4,
            memory_mib: 16384,
            gpus: 0,
            accelerated_networking: accelerated,
            premium_io: true,
            hyperv_generations: BTreeSet::new(),
            ultra_ssd: false,
            zones: vec!["1".to_string(), "2".to_string()],
        }
    }

    fn data_disk(suffix: &str, lun: i32) -> DataDisk {
        DataDisk {
            name_suffix: suffix.to_string(),
            disk_size_gb: 64,
            lun,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_spec() {
        validate_spec(&spec()).unwrap();
    }

    #[test]
    fn test_required_fields() {
        let mut missing_size = spec();
        missing_size.vm_size.clear();
        assert!(validate_spec(&missing_size).is_err());

        let mut missing_subnet = spec();
        missing_subnet.subnet.clear();
        assert!(validate_spec(&missing_subnet).is_err());

        let mut no_image = spec();
        no_image.image = Image::default();
        assert!(validate_spec(&no_image).is_err());
    }

    #[test]
    fn test_zone_and_availability_set_are_exclusive() {
        let mut both = spec();
        both.availability_set = Some("my-as".to_string());
        let err = validate_spec(&both).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));

        let mut set_only = spec();
        set_only.zone = None;
        set_only.availability_set = Some("my-as".to_string());
        validate_spec(&set_only).unwrap();
    }

    #[test]
    fn test_data_disk_layout() {
        let mut duplicate_lun = spec();
        duplicate_lun.data_disks = vec![data_disk("etcd", 0), data_disk("logs", 0)];
        assert!(validate_spec(&duplicate_lun).is_err());

        let mut bad_lun = spec();
        bad_lun.data_disks = vec![data_disk("etcd", 64)];
        assert!(validate_spec(&bad_lun).is_err());

        let mut ok = spec();
        ok.data_disks = vec![data_disk("etcd", 0), data_disk("logs", 1)];
        validate_spec(&ok).unwrap();
    }

    #[test]
    fn test_customer_managed_diagnostics_need_uri() {
        let mut diagnostics = spec();
        diagnostics.diagnostics = Some(Diagnostics {
            boot: Some(BootDiagnostics {
                storage_account_type: BootDiagnosticsStorage::CustomerManaged,
                customer_managed: None,
            }),
        });
        assert!(validate_spec(&diagnostics).is_err());
    }

    #[test]
    fn test_zone_must_be_offered() {
        let mut zone3 = spec();
        zone3.zone = Some("3".to_string());
        assert!(validate_sku(&zone3, &sku(false)).is_err());
        validate_sku(&spec(), &sku(false)).unwrap();
    }

    #[test]
    fn test_accelerated_networking() {
        let mut requested = spec();
        requested.accelerated_networking = true;
        assert!(accelerated_networking(&requested, &sku(true), false).unwrap());
        assert!(accelerated_networking(&requested, &sku(false), false).is_err());
        assert!(!accelerated_networking(&requested, &sku(false), true).unwrap());
        assert!(!accelerated_networking(&spec(), &sku(true), false).unwrap());
    }
}
