//! Feature gates
//!
//! Parsed from `--feature-gates Name=bool,Name=bool`. Unknown gates are
//! logged and ignored; a pair that is not `Name=bool` is a setup error.

use thiserror::Error;
use tracing::warn;

/// Skip Machines and MachineSets not owned by the Machine API
pub const MACHINE_API_MIGRATION: &str = "MachineAPIMigration";
/// Authenticate with a federated token when no client secret is present
pub const AZURE_WORKLOAD_IDENTITY: &str = "AzureWorkloadIdentity";

/// Malformed `--feature-gates` value
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid feature gate {pair:?}: expected Name=true|false")]
pub struct FeatureGateError {
    /// Offending pair
    pub pair: String,
}

/// Enabled feature gates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureGates {
    /// `MachineAPIMigration`
    pub machine_api_migration: bool,
    /// `AzureWorkloadIdentity`
    pub azure_workload_identity: bool,
}

impl FeatureGates {
    /// Parse a comma-separated list of `Name=bool` pairs
    pub fn parse(raw: &str) -> Result<Self, FeatureGateError> {
        let mut gates = Self::default();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let malformed = || FeatureGateError { pair: pair.to_string() };
            let (name, value) = pair.split_once('=').ok_or_else(malformed)?;
            let enabled: bool = value.trim().to_ascii_lowercase().parse().map_err(|_| malformed())?;
            match name.trim() {
                MACHINE_API_MIGRATION => gates.machine_api_migration = enabled,
                AZURE_WORKLOAD_IDENTITY => gates.azure_workload_identity = enabled,
                unknown => warn!("Ignoring unknown feature gate {}", unknown),
            }
        }
        Ok(gates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_gates() {
        let gates = FeatureGates::parse("MachineAPIMigration=true, AzureWorkloadIdentity=False").unwrap();
        assert!(gates.machine_api_migration);
        assert!(!gates.azure_workload_identity);
    }

    #[test]
    fn test_unknown_gates_are_ignored() {
        let gates = FeatureGates::parse("SomethingNew=true,AzureWorkloadIdentity=true").unwrap();
        assert!(gates.azure_workload_identity);
        assert!(!gates.machine_api_migration);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(FeatureGates::parse("").unwrap(), FeatureGates::default());
    }

    #[test]
    fn test_malformed_pairs() {
        assert!(FeatureGates::parse("MachineAPIMigration").is_err());
        assert_eq!(
            FeatureGates::parse("MachineAPIMigration=yes"),
            Err(FeatureGateError {
                pair: "MachineAPIMigration=yes".to_string()
            })
        );
    }
}
