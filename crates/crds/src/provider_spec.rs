//! Azure provider configuration
//!
//! Typed view of `Machine.spec.providerSpec.value` and
//! `Machine.status.providerStatus` for the Azure provider.

use crate::conditions::Condition;
use crate::machine::ProviderSpec;
use crate::references::SecretReference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// API version stamped on provider spec and status documents
pub const PROVIDER_API_VERSION: &str = "machine.openshift.io/v1beta1";

/// Errors decoding provider configuration
#[derive(Debug, Error)]
pub enum ProviderConfigError {
    /// `spec.providerSpec.value` is absent
    #[error("providerSpec.value is missing")]
    Missing,

    /// The document does not match the Azure provider schema
    #[error("failed to decode provider configuration: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Desired VM configuration for one Machine
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachineProviderSpec {
    /// Document API version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Document kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// VM SKU (e.g. "Standard_D4s_v3")
    #[serde(default)]
    pub vm_size: String,

    /// OS image
    #[serde(default)]
    pub image: Image,

    /// OS disk
    #[serde(default)]
    pub os_disk: OsDisk,

    /// Additional data disks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_disks: Vec<DataDisk>,

    /// Region; falls back to the credentials region when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Availability zone; mutually exclusive with `availabilitySet`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Availability set name; mutually exclusive with `zone`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_set: Option<String>,

    /// Resource group holding the VM and its dependents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    /// Resource group holding the virtual network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_resource_group: Option<String>,

    /// Virtual network name
    #[serde(default)]
    pub vnet: String,

    /// Subnet name
    #[serde(default)]
    pub subnet: String,

    /// Attach a public IP to the primary NIC
    #[serde(default, rename = "publicIP")]
    pub public_ip: bool,

    /// Request accelerated networking on the primary NIC
    #[serde(default)]
    pub accelerated_networking: bool,

    /// Application security groups (names in the network resource group)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub application_security_groups: Vec<String>,

    /// Load-balancer backend pools the primary NIC must belong to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backend_pools: Vec<BackendPoolRef>,

    /// Managed identity assigned to the VM
    #[serde(default)]
    pub identity: VmIdentity,

    /// Security profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_profile: Option<SecurityProfile>,

    /// Diagnostics profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,

    /// Secret holding bootstrap user data under the `userData` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret: Option<SecretReference>,

    /// Secret holding cloud credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret: Option<SecretReference>,

    /// Additional tags for every resource created for this Machine
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// SSH public key (base64) authorised for the admin user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,

    /// Run the VM as a spot instance
    #[serde(default, rename = "spotVMOptions", skip_serializing_if = "Option::is_none")]
    pub spot_vm_options: Option<SpotVmOptions>,

    /// VM extensions to install after creation
    #[serde(default, rename = "vmExtensions", skip_serializing_if = "Vec::is_empty")]
    pub vm_extensions: Vec<VmExtension>,
}

impl AzureMachineProviderSpec {
    /// Decode the provider spec embedded in a Machine
    pub fn from_provider_spec(spec: &ProviderSpec) -> Result<Self, ProviderConfigError> {
        let value = spec.value.as_ref().ok_or(ProviderConfigError::Missing)?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// OS image reference: either a marketplace image or a resource ID
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Marketplace publisher
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub publisher: String,
    /// Marketplace offer
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub offer: String,
    /// Marketplace SKU
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sku: String,
    /// Marketplace version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Image or gallery image version resource ID
    #[serde(default, rename = "resourceID", skip_serializing_if = "String::is_empty")]
    pub resource_id: String,
    /// Marketplace purchase plan handling
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub image_type: Option<ImageType>,
}

impl Image {
    /// Whether the image is referenced by resource ID
    pub fn is_resource_id(&self) -> bool {
        !self.resource_id.is_empty()
    }

    /// Whether all marketplace coordinates are present
    pub fn is_marketplace(&self) -> bool {
        !self.publisher.is_empty() && !self.offer.is_empty() && !self.sku.is_empty() && !self.version.is_empty()
    }
}

/// Marketplace image purchase plan handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageType {
    /// Image requires a purchase plan block
    MarketplaceWithPlan,
    /// Image has no purchase plan
    MarketplaceNoPlan,
}

/// OS disk configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    /// "Linux" or "Windows"
    #[serde(default = "default_os_type")]
    pub os_type: String,
    /// Size in GiB
    #[serde(default, rename = "diskSizeGB")]
    pub disk_size_gb: i32,
    /// Managed disk parameters
    #[serde(default)]
    pub managed_disk: ManagedDiskParameters,
    /// Host caching ("None", "ReadOnly", "ReadWrite")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching_type: Option<String>,
}

fn default_os_type() -> String {
    "Linux".to_string()
}

/// Managed disk parameters
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDiskParameters {
    /// Storage account type (e.g. "Premium_LRS")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_account_type: String,
    /// Customer-managed key encryption set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_encryption_set: Option<DiskEncryptionSet>,
}

/// Reference to a disk encryption set
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiskEncryptionSet {
    /// Resource ID of the disk encryption set
    pub id: String,
}

/// Data disk configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataDisk {
    /// Suffix appended to the machine name to form the disk name
    pub name_suffix: String,
    /// Size in GiB
    #[serde(rename = "diskSizeGB")]
    pub disk_size_gb: i32,
    /// Managed disk parameters
    #[serde(default)]
    pub managed_disk: ManagedDiskParameters,
    /// Logical unit number
    pub lun: i32,
    /// Host caching ("None", "ReadOnly", "ReadWrite")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching_type: Option<String>,
    /// What happens to the disk when the Machine is deleted
    #[serde(default)]
    pub deletion_policy: DiskDeletionPolicy,
}

/// Data disk deletion policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum DiskDeletionPolicy {
    /// Delete the disk with the Machine
    #[default]
    Delete,
    /// Keep the disk after the VM is gone
    Detach,
}

/// Load-balancer backend pool reference
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendPoolRef {
    /// Load balancer name
    pub load_balancer: String,
    /// Backend address pool name
    pub name: String,
    /// Resource group of the load balancer (defaults to the network resource group)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

/// Managed identity assignment
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum VmIdentity {
    /// No managed identity
    #[default]
    None,
    /// Platform-managed identity tied to the VM lifecycle
    SystemAssigned,
    /// Pre-existing user-assigned identities (resource IDs or names)
    UserAssigned {
        /// Identities to assign
        #[serde(default, rename = "userAssignedIdentities")]
        identities: Vec<String>,
    },
}

/// VM security profile
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityProfile {
    /// Security type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_type: Option<SecurityType>,
    /// Enable UEFI secure boot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_boot: Option<bool>,
    /// Enable the virtual TPM
    #[serde(default, rename = "vTPM", skip_serializing_if = "Option::is_none")]
    pub vtpm: Option<bool>,
    /// Encrypt temp disks and caches at the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_at_host: Option<bool>,
}

/// VM security type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SecurityType {
    /// No additional security features
    Standard,
    /// Trusted launch (secure boot and vTPM)
    TrustedLaunch,
    /// Confidential VM
    ConfidentialVM,
}

/// Diagnostics profile
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// Boot diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot: Option<BootDiagnostics>,
}

/// Boot diagnostics storage
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootDiagnostics {
    /// Where boot diagnostics are stored
    pub storage_account_type: BootDiagnosticsStorage,
    /// Customer-managed storage account, required for `CustomerManaged`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_managed: Option<CustomerManagedBootDiagnostics>,
}

/// Boot diagnostics storage kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum BootDiagnosticsStorage {
    /// Boot diagnostics off
    #[default]
    Disabled,
    /// Platform-managed storage account
    AzureManaged,
    /// Customer storage account
    CustomerManaged,
}

/// Customer-managed boot diagnostics storage
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomerManagedBootDiagnostics {
    /// Blob endpoint of the storage account
    #[serde(rename = "storageAccountURI")]
    pub storage_account_uri: String,
}

/// Spot instance options
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpotVmOptions {
    /// Maximum hourly price; absent or "-1" means capped at on-demand price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<String>,
}

/// VM extension to install on the VM
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmExtension {
    /// Extension name
    pub name: String,
    /// Publisher
    pub publisher: String,
    /// Extension type
    #[serde(rename = "type")]
    pub extension_type: String,
    /// Type handler version
    pub version: String,
    /// Public settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
    /// Protected settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_settings: Option<serde_json::Value>,
}

/// Observed VM state for one Machine
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachineProviderStatus {
    /// Document API version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Document kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Azure-assigned VM unique ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,

    /// Last observed VM provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_state: Option<VmState>,

    /// Provider conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl AzureMachineProviderStatus {
    /// Document kind stamped on written statuses
    pub const KIND: &'static str = "AzureMachineProviderStatus";

    /// Decode a raw provider status; absent documents decode to the default
    pub fn from_raw(raw: Option<&serde_json::Value>) -> Result<Self, ProviderConfigError> {
        match raw {
            Some(value) if !value.is_null() => Ok(serde_json::from_value(value.clone())?),
            _ => Ok(Self::default()),
        }
    }
}

/// VM provisioning state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VmState {
    /// Create in progress
    Creating,
    /// Update in progress
    Updating,
    /// Provisioned
    Succeeded,
    /// Provisioning failed
    Failed,
    /// Delete in progress
    Deleting,
    /// State not recognised
    Unknown,
}

impl VmState {
    /// Map an ARM `provisioningState` string, case-insensitively
    pub fn from_provisioning_state(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "creating" => VmState::Creating,
            "updating" => VmState::Updating,
            "succeeded" => VmState::Succeeded,
            "failed" => VmState::Failed,
            "deleting" => VmState::Deleting,
            _ => VmState::Unknown,
        }
    }

    /// State name as written to status and annotations
    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::Creating => "Creating",
            VmState::Updating => "Updating",
            VmState::Succeeded => "Succeeded",
            VmState::Failed => "Failed",
            VmState::Deleting => "Deleting",
            VmState::Unknown => "Unknown",
        }
    }
}
