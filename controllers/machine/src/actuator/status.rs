//! Machine status from the cloud's view of the VM

use crate::decode::{NicView, PublicIpView, VmView};
use crate::error::ControllerError;
use crate::naming;
use crate::scope::MachineScope;
use crds::{AddressType, Condition, ConditionStatus, MachineAddress, MachinePhase, VmState, condition_types, reasons};
use serde_json::Value;
use tracing::debug;

/// Addresses of a VM from its NIC and, if attached, its public IP
pub fn addresses(host: &str, nic: &NicView, public_ip: Option<&PublicIpView>) -> Vec<MachineAddress> {
    let mut addresses = vec![MachineAddress::new(AddressType::Hostname, host)];
    if let Some(ip) = nic.private_ip() {
        addresses.push(MachineAddress::new(AddressType::InternalIP, ip));
    }
    addresses.push(MachineAddress::new(
        AddressType::InternalDNS,
        nic.internal_dns_name(host).unwrap_or_else(|| host.to_string()),
    ));
    if let Some(pip) = public_ip {
        if let Some(ip) = &pip.properties.ip_address {
            addresses.push(MachineAddress::new(AddressType::ExternalIP, ip.clone()));
        }
        if let Some(fqdn) = &pip.properties.dns_settings.fqdn {
            addresses.push(MachineAddress::new(AddressType::ExternalDNS, fqdn.clone()));
        }
    }
    addresses
}

/// `MachineReady` for a VM state
pub fn ready_condition(state: VmState) -> Condition {
    match state {
        VmState::Succeeded => Condition::new(
            condition_types::MACHINE_READY,
            ConditionStatus::True,
            reasons::VM_PROVISIONED,
            "virtual machine is provisioned",
        ),
        VmState::Failed => Condition::new(
            condition_types::MACHINE_READY,
            ConditionStatus::False,
            reasons::VM_PROVISIONING_FAILED,
            "virtual machine provisioning failed",
        ),
        other => Condition::new(
            condition_types::MACHINE_READY,
            ConditionStatus::False,
            reasons::VM_NOT_READY,
            format!("virtual machine is {}", other.as_str()),
        ),
    }
}

/// Decode `vm`, read its NIC and public IP, and record identity and addresses
pub async fn reflect(scope: &mut MachineScope, vm: &Value, nic_id: &str) -> Result<VmView, ControllerError> {
    let view = VmView::decode(vm);
    scope.reflect_instance(&view);

    if scope.provider_id().is_none() {
        let vm_name = naming::vm_name(scope.name())?;
        let provider_id = naming::provider_id(scope.subscription_id(), &scope.resource_group, &vm_name);
        debug!("Setting provider ID of {} to {}", scope.key(), provider_id);
        scope.set_provider_id(provider_id);
    }

    let network = scope.azure.profile.network;
    let nic_id = view.primary_nic_id().unwrap_or(nic_id).to_string();
    let nic = scope
        .azure
        .get_optional(&nic_id, network, None)
        .await?
        .map(|doc| NicView::decode(&doc))
        .unwrap_or_default();
    let public_ip = match nic.public_ip_id() {
        Some(pip_id) => scope
            .azure
            .get_optional(pip_id, network, None)
            .await?
            .map(|doc| PublicIpView::decode(&doc)),
        None => None,
    };

    let host = view
        .properties
        .os_profile
        .computer_name
        .clone()
        .unwrap_or_else(|| scope.name().to_string());
    scope.set_addresses(addresses(&host, &nic, public_ip.as_ref()));
    Ok(view)
}

/// Phase after an Update observed `state`
pub fn phase_after_update(state: VmState, has_provider_id: bool, has_node_ref: bool) -> Option<MachinePhase> {
    if has_node_ref {
        return Some(MachinePhase::Running);
    }
    if state == VmState::Succeeded && has_provider_id {
        return Some(MachinePhase::Provisioned);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_addresses_with_public_ip() {
        let nic = NicView::decode(&json!({"properties": {
            "ipConfigurations": [{"properties": {"privateIPAddress": "10.0.0.4", "primary": true}}],
            "dnsSettings": {"internalDomainNameSuffix": "abc.internal.cloudapp.net"}
        }}));
        let pip = PublicIpView::decode(&json!({"properties": {
            "ipAddress": "20.0.0.5",
            "dnsSettings": {"fqdn": "worker-0.eastus.cloudapp.azure.com"}
        }}));
        let addresses = addresses("worker-0", &nic, Some(&pip));
        let find = |t: AddressType| {
            addresses
                .iter()
                .find(|a| a.address_type == t)
                .map(|a| a.address.as_str())
        };
        assert_eq!(find(AddressType::InternalIP), Some("10.0.0.4"));
        assert_eq!(find(AddressType::InternalDNS), Some("worker-0.abc.internal.cloudapp.net"));
        assert_eq!(find(AddressType::ExternalIP), Some("20.0.0.5"));
        assert_eq!(find(AddressType::ExternalDNS), Some("worker-0.eastus.cloudapp.azure.com"));
        assert_eq!(find(AddressType::Hostname), Some("worker-0"));
    }

    #[test]
    fn test_addresses_without_nic_details() {
        let addresses = addresses("worker-0", &NicView::default(), None);
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[1].address, "worker-0");
    }

    #[test]
    fn test_ready_condition() {
        assert_eq!(ready_condition(VmState::Succeeded).status, ConditionStatus::True);
        let creating = ready_condition(VmState::Creating);
        assert_eq!(creating.status, ConditionStatus::False);
        assert_eq!(creating.reason.as_deref(), Some(reasons::VM_NOT_READY));
        assert_eq!(
            ready_condition(VmState::Failed).reason.as_deref(),
            Some(reasons::VM_PROVISIONING_FAILED)
        );
    }

    #[test]
    fn test_phase_after_update() {
        assert_eq!(phase_after_update(VmState::Succeeded, true, true), Some(MachinePhase::Running));
        assert_eq!(phase_after_update(VmState::Succeeded, true, false), Some(MachinePhase::Provisioned));
        assert_eq!(phase_after_update(VmState::Creating, true, false), None);
    }
}
