//! Azure resource names derived from Machine and cluster names
//!
//! Every name is checked against the Azure length limit for its kind and the
//! shared character rules; generation fails instead of truncating.

use thiserror::Error;

/// Virtual machine name limit (Linux)
pub const VM_NAME_MAX: usize = 64;
/// Public IP address name limit
pub const PUBLIC_IP_NAME_MAX: usize = 63;
/// Network interface name limit
pub const NIC_NAME_MAX: usize = 80;
/// Managed disk name limit
pub const DISK_NAME_MAX: usize = 80;
/// Availability set name limit
pub const AVAILABILITY_SET_NAME_MAX: usize = 80;
/// Resource group name limit
pub const RESOURCE_GROUP_NAME_MAX: usize = 90;

/// Provider prefix of a provider ID
pub const PROVIDER_NAME: &str = "azure";

/// Name generation failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamingError {
    /// Base name was empty
    #[error("{kind} name is empty")]
    Empty {
        /// Resource kind
        kind: &'static str,
    },

    /// Name exceeds the Azure limit for its kind
    #[error("{kind} name {name:?} is {len} characters, longer than the limit of {limit}")]
    TooLong {
        /// Resource kind
        kind: &'static str,
        /// Generated name
        name: String,
        /// Generated length
        len: usize,
        /// Azure limit
        limit: usize,
    },

    /// Name contains characters Azure rejects
    #[error("{kind} name {name:?} must start with a letter or digit and contain only letters, digits, '.', '_' or '-', and must not end with '.' or '-'")]
    InvalidCharacters {
        /// Resource kind
        kind: &'static str,
        /// Generated name
        name: String,
    },
}

fn check(kind: &'static str, name: String, limit: usize) -> Result<String, NamingError> {
    let Some(first) = name.chars().next() else {
        return Err(NamingError::Empty { kind });
    };
    let len = name.chars().count();
    if len > limit {
        return Err(NamingError::TooLong { kind, name, len, limit });
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !first.is_ascii_alphanumeric() || !valid_chars || name.ends_with('.') || name.ends_with('-') {
        return Err(NamingError::InvalidCharacters { kind, name });
    }
    Ok(name)
}

/// VM name: the Machine name
pub fn vm_name(machine: &str) -> Result<String, NamingError> {
    check("virtual machine", machine.to_string(), VM_NAME_MAX)
}

/// OS disk name: `{machine}_OSDisk`
pub fn os_disk_name(machine: &str) -> Result<String, NamingError> {
    if machine.is_empty() {
        return Err(NamingError::Empty { kind: "OS disk" });
    }
    check("OS disk", format!("{machine}_OSDisk"), DISK_NAME_MAX)
}

/// Data disk name: `{machine}_{suffix}`
pub fn data_disk_name(machine: &str, suffix: &str) -> Result<String, NamingError> {
    if machine.is_empty() || suffix.is_empty() {
        return Err(NamingError::Empty { kind: "data disk" });
    }
    check("data disk", format!("{machine}_{suffix}"), DISK_NAME_MAX)
}

/// Network interface name: `{machine}-nic`
pub fn nic_name(machine: &str) -> Result<String, NamingError> {
    if machine.is_empty() {
        return Err(NamingError::Empty { kind: "network interface" });
    }
    check("network interface", format!("{machine}-nic"), NIC_NAME_MAX)
}

/// Public IP name: the Machine name
pub fn public_ip_name(machine: &str) -> Result<String, NamingError> {
    check("public IP", machine.to_string(), PUBLIC_IP_NAME_MAX)
}

/// Availability set name: `{cluster}_{machine_set}-as`
pub fn availability_set_name(cluster: &str, machine_set: &str) -> Result<String, NamingError> {
    if cluster.is_empty() || machine_set.is_empty() {
        return Err(NamingError::Empty { kind: "availability set" });
    }
    check(
        "availability set",
        format!("{cluster}_{machine_set}-as"),
        AVAILABILITY_SET_NAME_MAX,
    )
}

/// Default resource group name: `{cluster}-rg`
pub fn resource_group_name(cluster: &str) -> Result<String, NamingError> {
    if cluster.is_empty() {
        return Err(NamingError::Empty { kind: "resource group" });
    }
    check("resource group", format!("{cluster}-rg"), RESOURCE_GROUP_NAME_MAX)
}

/// Provider ID joining a VM to its Node.
///
/// Subscription and resource group are lower-cased to match what the node
/// agent reports; the machine name keeps its case.
pub fn provider_id(subscription_id: &str, resource_group: &str, machine: &str) -> String {
    format!(
        "{PROVIDER_NAME}:///subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}",
        subscription_id.to_lowercase(),
        resource_group.to_lowercase(),
        machine
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_names() {
        assert_eq!(vm_name("worker-0").unwrap(), "worker-0");
        assert_eq!(os_disk_name("worker-0").unwrap(), "worker-0_OSDisk");
        assert_eq!(data_disk_name("worker-0", "etcd").unwrap(), "worker-0_etcd");
        assert_eq!(nic_name("worker-0").unwrap(), "worker-0-nic");
        assert_eq!(public_ip_name("worker-0").unwrap(), "worker-0");
        assert_eq!(availability_set_name("mycluster", "worker").unwrap(), "mycluster_worker-as");
        assert_eq!(resource_group_name("mycluster").unwrap(), "mycluster-rg");
    }

    #[test]
    fn test_public_ip_limit_is_63() {
        let ok = "a".repeat(63);
        assert!(public_ip_name(&ok).is_ok());

        let too_long = "a".repeat(64);
        assert_eq!(
            public_ip_name(&too_long),
            Err(NamingError::TooLong {
                kind: "public IP",
                name: too_long.clone(),
                len: 64,
                limit: 63
            })
        );
        // The same name is still a valid VM name
        assert!(vm_name(&too_long).is_ok());
    }

    #[test]
    fn test_nic_limit_counts_suffix() {
        assert!(nic_name(&"a".repeat(76)).is_ok());
        assert!(matches!(nic_name(&"a".repeat(77)), Err(NamingError::TooLong { limit: 80, .. })));
    }

    #[test]
    fn test_invalid_characters_are_rejected() {
        assert!(matches!(vm_name("worker 0"), Err(NamingError::InvalidCharacters { .. })));
        assert!(matches!(vm_name("-worker"), Err(NamingError::InvalidCharacters { .. })));
        assert!(matches!(vm_name("worker."), Err(NamingError::InvalidCharacters { .. })));
        assert!(matches!(vm_name(""), Err(NamingError::Empty { .. })));
    }

    #[test]
    fn test_names_are_deterministic_and_prefixed() {
        let inputs = ["a", "worker-0", "MixedCase.Name", "cluster-abc12-worker-eastus1-xyz9k"];
        for machine in inputs {
            for generate in [vm_name, os_disk_name, nic_name, public_ip_name] {
                let first = generate(machine).unwrap();
                assert_eq!(first, generate(machine).unwrap());
                assert!(first.starts_with(machine));
            }
            for cluster in inputs {
                let name = availability_set_name(cluster, machine).unwrap();
                assert!(name.starts_with(cluster));
                assert!(name.len() <= AVAILABILITY_SET_NAME_MAX);
            }
        }
    }

    #[test]
    fn test_generated_names_never_exceed_limits() {
        for len in 1..=100 {
            let machine = "m".repeat(len);
            if let Ok(name) = nic_name(&machine) {
                assert!(name.len() <= NIC_NAME_MAX);
            }
            if let Ok(name) = os_disk_name(&machine) {
                assert!(name.len() <= DISK_NAME_MAX);
            }
            if let Ok(name) = public_ip_name(&machine) {
                assert!(name.len() <= PUBLIC_IP_NAME_MAX);
            }
        }
    }

    #[test]
    fn test_provider_id_lowercases_subscription_and_group_only() {
        let id = provider_id("ABC-DEF", "My-RG", "Worker-0");
        assert_eq!(
            id,
            "azure:///subscriptions/abc-def/resourceGroups/my-rg/providers/Microsoft.Compute/virtualMachines/Worker-0"
        );
    }
}
