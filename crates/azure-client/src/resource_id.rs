//! ARM resource ID helpers
//!
//! Builds and parses `/subscriptions/{sub}/resourceGroups/{rg}/providers/{ns}/{type}/{name}`
//! identifiers, including child resources (`.../{type}/{name}/{childType}/{childName}`).

use crate::error::AzureError;

/// Provider namespace and type of a virtual machine
pub const VIRTUAL_MACHINES: &str = "Microsoft.Compute/virtualMachines";
/// Provider namespace and type of a managed disk
pub const DISKS: &str = "Microsoft.Compute/disks";
/// Provider namespace and type of an availability set
pub const AVAILABILITY_SETS: &str = "Microsoft.Compute/availabilitySets";
/// Provider namespace and type of a network interface
pub const NETWORK_INTERFACES: &str = "Microsoft.Network/networkInterfaces";
/// Provider namespace and type of a public IP address
pub const PUBLIC_IP_ADDRESSES: &str = "Microsoft.Network/publicIPAddresses";
/// Provider namespace and type of a virtual network
pub const VIRTUAL_NETWORKS: &str = "Microsoft.Network/virtualNetworks";
/// Provider namespace and type of a load balancer
pub const LOAD_BALANCERS: &str = "Microsoft.Network/loadBalancers";
/// Provider namespace and type of an application security group
pub const APPLICATION_SECURITY_GROUPS: &str = "Microsoft.Network/applicationSecurityGroups";
/// Provider namespace and type of a user-assigned identity
pub const USER_ASSIGNED_IDENTITIES: &str = "Microsoft.ManagedIdentity/userAssignedIdentities";

/// Resource group ID
pub fn resource_group_id(subscription_id: &str, resource_group: &str) -> String {
    format!("/subscriptions/{subscription_id}/resourceGroups/{resource_group}")
}

/// Top-level resource ID
pub fn resource_id(subscription_id: &str, resource_group: &str, resource_type: &str, name: &str) -> String {
    format!(
        "{}/providers/{resource_type}/{name}",
        resource_group_id(subscription_id, resource_group)
    )
}

/// Child resource ID (e.g. a subnet of a virtual network)
pub fn child_resource_id(parent_id: &str, child_type: &str, child_name: &str) -> String {
    format!("{parent_id}/{child_type}/{child_name}")
}

/// Subnet ID
pub fn subnet_id(subscription_id: &str, resource_group: &str, vnet: &str, subnet: &str) -> String {
    child_resource_id(
        &resource_id(subscription_id, resource_group, VIRTUAL_NETWORKS, vnet),
        "subnets",
        subnet,
    )
}

/// Load-balancer backend address pool ID
pub fn backend_pool_id(subscription_id: &str, resource_group: &str, load_balancer: &str, pool: &str) -> String {
    child_resource_id(
        &resource_id(subscription_id, resource_group, LOAD_BALANCERS, load_balancer),
        "backendAddressPools",
        pool,
    )
}

/// Tags scope of any resource (`{id}/providers/Microsoft.Resources/tags/default`)
pub fn tags_id(scope: &str) -> String {
    format!("{scope}/providers/Microsoft.Resources/tags/default")
}

/// Parsed top-level ARM resource ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    /// Subscription ID
    pub subscription_id: String,
    /// Resource group name
    pub resource_group: String,
    /// `Namespace/type`, absent for a resource group ID
    pub resource_type: Option<String>,
    /// Resource name, absent for a resource group ID
    pub name: Option<String>,
    /// Remaining child segments (`type/name` pairs)
    pub children: Vec<(String, String)>,
}

impl ResourceId {
    /// Parse an ARM resource ID. Segment keywords are matched case-insensitively.
    pub fn parse(id: &str) -> Result<Self, AzureError> {
        let invalid = || AzureError::InvalidRequest(format!("malformed resource ID: {id}"));
        let segments: Vec<&str> = id.trim_matches('/').split('/').collect();

        if segments.len() < 4
            || !segments[0].eq_ignore_ascii_case("subscriptions")
            || !segments[2].eq_ignore_ascii_case("resourceGroups")
        {
            return Err(invalid());
        }

        let mut parsed = ResourceId {
            subscription_id: segments[1].to_string(),
            resource_group: segments[3].to_string(),
            resource_type: None,
            name: None,
            children: Vec::new(),
        };

        if segments.len() == 4 {
            return Ok(parsed);
        }
        if segments.len() < 8 || !segments[4].eq_ignore_ascii_case("providers") {
            return Err(invalid());
        }
        parsed.resource_type = Some(format!("{}/{}", segments[5], segments[6]));
        parsed.name = Some(segments[7].to_string());

        let rest = &segments[8..];
        if rest.len() % 2 != 0 {
            return Err(invalid());
        }
        parsed.children = rest
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();
        Ok(parsed)
    }

    /// Whether the ID names a resource of `resource_type` (case-insensitive)
    pub fn is_type(&self, resource_type: &str) -> bool {
        self.children.is_empty()
            && self
                .resource_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(resource_type))
    }
}
