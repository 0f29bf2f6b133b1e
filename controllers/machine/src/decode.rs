//! Projections of ARM response documents
//!
//! Only the fields the actuator consumes are lifted. Every field is optional
//! and decoded leniently: a sub-document of the wrong shape decodes to its
//! empty value without affecting its siblings.

use crds::VmState;
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn project<T: DeserializeOwned + Default>(document: &Value) -> T {
    serde_json::from_value(document.clone()).unwrap_or_default()
}

/// Reference to another resource
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SubResource {
    /// Resource ID
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
}

/// Virtual machine projection
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmView {
    /// Resource ID
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    /// Resource name
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    /// Region
    #[serde(default, deserialize_with = "lenient")]
    pub location: Option<String>,
    /// Availability zones
    #[serde(default, deserialize_with = "lenient")]
    pub zones: Vec<String>,
    /// Resource tags
    #[serde(default, deserialize_with = "lenient")]
    pub tags: BTreeMap<String, String>,
    /// Properties
    #[serde(default, deserialize_with = "lenient")]
    pub properties: VmProperties,
}

/// Virtual machine properties
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmProperties {
    /// ARM provisioning state
    #[serde(default, deserialize_with = "lenient")]
    pub provisioning_state: Option<String>,
    /// Azure-assigned unique ID
    #[serde(default, deserialize_with = "lenient")]
    pub vm_id: Option<String>,
    /// Hardware profile
    #[serde(default, deserialize_with = "lenient")]
    pub hardware_profile: HardwareProfile,
    /// OS profile
    #[serde(default, deserialize_with = "lenient")]
    pub os_profile: OsProfile,
    /// Instance view (present with `$expand=instanceView`)
    #[serde(default, deserialize_with = "lenient")]
    pub instance_view: InstanceView,
    /// Network profile
    #[serde(default, deserialize_with = "lenient")]
    pub network_profile: NetworkProfile,
    /// Availability set membership
    #[serde(default, deserialize_with = "lenient")]
    pub availability_set: Option<SubResource>,
    /// "Regular" or "Spot"
    #[serde(default, deserialize_with = "lenient")]
    pub priority: Option<String>,
}

/// Hardware profile
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    /// VM size
    #[serde(default, deserialize_with = "lenient")]
    pub vm_size: Option<String>,
}

/// OS profile
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OsProfile {
    /// Guest host name
    #[serde(default, deserialize_with = "lenient")]
    pub computer_name: Option<String>,
}

/// Instance view
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    /// Status entries (`ProvisioningState/*`, `PowerState/*`)
    #[serde(default, deserialize_with = "lenient")]
    pub statuses: Vec<InstanceStatus>,
}

/// Instance view status entry
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    /// Status code
    #[serde(default, deserialize_with = "lenient")]
    pub code: Option<String>,
    /// Display string
    #[serde(default, deserialize_with = "lenient")]
    pub display_status: Option<String>,
}

/// Network profile
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    /// Attached NICs
    #[serde(default, deserialize_with = "lenient")]
    pub network_interfaces: Vec<NicReference>,
}

/// NIC attached to a VM
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NicReference {
    /// NIC resource ID
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    /// Attachment properties
    #[serde(default, deserialize_with = "lenient")]
    pub properties: NicReferenceProperties,
}

/// Attachment properties of a NIC
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NicReferenceProperties {
    /// Whether the NIC is primary
    #[serde(default, deserialize_with = "lenient")]
    pub primary: Option<bool>,
}

impl VmView {
    /// Decode a VM document
    pub fn decode(document: &Value) -> Self {
        project(document)
    }

    /// Provisioning state
    pub fn state(&self) -> VmState {
        self.properties
            .provisioning_state
            .as_deref()
            .map_or(VmState::Unknown, VmState::from_provisioning_state)
    }

    /// Power state from the instance view (e.g. "running", "deallocated")
    pub fn power_state(&self) -> Option<&str> {
        self.properties
            .instance_view
            .statuses
            .iter()
            .filter_map(|s| s.code.as_deref())
            .find_map(|code| code.strip_prefix("PowerState/"))
    }

    /// Primary NIC ID, falling back to the first NIC
    pub fn primary_nic_id(&self) -> Option<&str> {
        let nics = &self.properties.network_profile.network_interfaces;
        nics.iter()
            .find(|n| n.properties.primary == Some(true))
            .or_else(|| nics.first())
            .and_then(|n| n.id.as_deref())
    }
}

/// Network interface projection
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct NicView {
    /// Resource ID
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    /// Properties
    #[serde(default, deserialize_with = "lenient")]
    pub properties: NicProperties,
}

/// Network interface properties
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NicProperties {
    /// IP configurations
    #[serde(default, deserialize_with = "lenient")]
    pub ip_configurations: Vec<IpConfiguration>,
    /// DNS settings
    #[serde(default, deserialize_with = "lenient")]
    pub dns_settings: NicDnsSettings,
    /// Accelerated networking flag
    #[serde(default, deserialize_with = "lenient")]
    pub enable_accelerated_networking: Option<bool>,
}

/// NIC DNS settings
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NicDnsSettings {
    /// Internal DNS suffix assigned by Azure
    #[serde(default, deserialize_with = "lenient")]
    pub internal_domain_name_suffix: Option<String>,
}

/// NIC IP configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct IpConfiguration {
    /// Configuration name
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    /// Properties
    #[serde(default, deserialize_with = "lenient")]
    pub properties: IpConfigurationProperties,
}

/// NIC IP configuration properties
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IpConfigurationProperties {
    /// Private IP
    #[serde(default, rename = "privateIPAddress", deserialize_with = "lenient")]
    pub private_ip_address: Option<String>,
    /// Whether this is the primary configuration
    #[serde(default, deserialize_with = "lenient")]
    pub primary: Option<bool>,
    /// Attached public IP; may be a bare reference or an expanded document
    #[serde(default, rename = "publicIPAddress", deserialize_with = "lenient")]
    pub public_ip_address: Option<PublicIpView>,
    /// Load-balancer backend pools
    #[serde(default, deserialize_with = "lenient")]
    pub load_balancer_backend_address_pools: Vec<SubResource>,
    /// Subnet
    #[serde(default, deserialize_with = "lenient")]
    pub subnet: Option<SubResource>,
}

impl NicView {
    /// Decode a NIC document
    pub fn decode(document: &Value) -> Self {
        project(document)
    }

    /// Primary IP configuration, falling back to the first
    pub fn primary_ip_configuration(&self) -> Option<&IpConfiguration> {
        let configs = &self.properties.ip_configurations;
        configs
            .iter()
            .find(|c| c.properties.primary == Some(true))
            .or_else(|| configs.first())
    }

    /// Private IP of the primary configuration
    pub fn private_ip(&self) -> Option<&str> {
        self.primary_ip_configuration()
            .and_then(|c| c.properties.private_ip_address.as_deref())
    }

    /// Public IP ID of the primary configuration
    pub fn public_ip_id(&self) -> Option<&str> {
        self.primary_ip_configuration()
            .and_then(|c| c.properties.public_ip_address.as_ref())
            .and_then(|p| p.id.as_deref())
    }

    /// Backend pool IDs of the primary configuration
    pub fn backend_pool_ids(&self) -> Vec<String> {
        self.primary_ip_configuration()
            .map(|c| {
                c.properties
                    .load_balancer_backend_address_pools
                    .iter()
                    .filter_map(|p| p.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Internal DNS name of a host on this NIC
    pub fn internal_dns_name(&self, host: &str) -> Option<String> {
        self.properties
            .dns_settings
            .internal_domain_name_suffix
            .as_deref()
            .filter(|suffix| !suffix.is_empty())
            .map(|suffix| format!("{host}.{suffix}"))
    }
}

/// Public IP projection
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PublicIpView {
    /// Resource ID
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    /// Properties
    #[serde(default, deserialize_with = "lenient")]
    pub properties: PublicIpProperties,
}

/// Public IP properties
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpProperties {
    /// Allocated address
    #[serde(default, deserialize_with = "lenient")]
    pub ip_address: Option<String>,
    /// DNS settings
    #[serde(default, deserialize_with = "lenient")]
    pub dns_settings: PublicIpDnsSettings,
}

/// Public IP DNS settings
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpDnsSettings {
    /// Fully qualified domain name
    #[serde(default, deserialize_with = "lenient")]
    pub fqdn: Option<String>,
}

impl PublicIpView {
    /// Decode a public IP document
    pub fn decode(document: &Value) -> Self {
        project(document)
    }
}
