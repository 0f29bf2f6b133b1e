//! Virtual machines

use super::{AzureContext, ResourceService, insert_some};
use async_trait::async_trait;
use azure_client::{AzureError, resource_id};
use crds::{BootDiagnostics, BootDiagnosticsStorage, Image, ImageType, SecurityProfile, SecurityType, VmIdentity};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::info;

/// Admin account created on every VM
pub const ADMIN_USERNAME: &str = "core";

/// OS disk created from the image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsDiskSpec {
    /// Disk name
    pub name: String,
    /// "Linux" or "Windows"
    pub os_type: String,
    /// Size in GiB
    pub size_gb: i32,
    /// Storage account type; empty leaves the platform default
    pub storage_account_type: String,
    /// Host caching
    pub caching: Option<String>,
    /// Customer-managed key encryption set
    pub disk_encryption_set_id: Option<String>,
}

/// Pre-created data disk attached to the VM
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataDiskAttachment {
    /// Disk name
    pub name: String,
    /// Disk resource ID
    pub disk_id: String,
    /// Logical unit number
    pub lun: i32,
    /// Host caching
    pub caching: Option<String>,
}

/// Desired virtual machine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmSpec {
    /// VM name, also the computer name
    pub name: String,
    /// Resource group
    pub resource_group: String,
    /// Region
    pub location: String,
    /// Availability zone
    pub zone: Option<String>,
    /// VM SKU
    pub size: String,
    /// OS image
    pub image: Image,
    /// OS disk
    pub os_disk: OsDiskSpec,
    /// Data disks to attach
    pub data_disks: Vec<DataDiskAttachment>,
    /// Primary NIC ID
    pub nic_id: String,
    /// Availability set ID
    pub availability_set_id: Option<String>,
    /// Managed identity, with user-assigned identities as resource IDs
    pub identity: VmIdentity,
    /// Security profile
    pub security_profile: Option<SecurityProfile>,
    /// Boot diagnostics
    pub boot_diagnostics: Option<BootDiagnostics>,
    /// Authorised SSH key
    pub ssh_public_key: Option<String>,
    /// Base64 bootstrap data
    pub user_data: Option<String>,
    /// Spot max price; `Some(None)` caps at the on-demand price
    pub spot_max_price: Option<Option<String>>,
    /// Tags
    pub tags: BTreeMap<String, String>,
}

impl VmSpec {
    /// Spec that only identifies a VM, for lookups and deletion
    pub fn reference(name: impl Into<String>, resource_group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_group: resource_group.into(),
            ..Default::default()
        }
    }
}

fn image_reference(image: &Image) -> Value {
    if image.is_resource_id() {
        json!({"id": image.resource_id})
    } else {
        json!({
            "publisher": image.publisher,
            "offer": image.offer,
            "sku": image.sku,
            "version": image.version,
        })
    }
}

fn identity(identity: &VmIdentity) -> Option<Value> {
    match identity {
        VmIdentity::None => None,
        VmIdentity::SystemAssigned => Some(json!({"type": "SystemAssigned"})),
        VmIdentity::UserAssigned { identities } => {
            let assigned: Map<String, Value> = identities.iter().map(|id| (id.clone(), json!({}))).collect();
            Some(json!({"type": "UserAssigned", "userAssignedIdentities": assigned}))
        }
    }
}

fn security_profile(profile: &SecurityProfile) -> Value {
    let mut body = Map::new();
    insert_some(
        &mut body,
        "securityType",
        profile.security_type.map(|t| {
            json!(match t {
                SecurityType::Standard => "Standard",
                SecurityType::TrustedLaunch => "TrustedLaunch",
                SecurityType::ConfidentialVM => "ConfidentialVM",
            })
        }),
    );
    if profile.secure_boot.is_some() || profile.vtpm.is_some() {
        let mut uefi = Map::new();
        insert_some(&mut uefi, "secureBootEnabled", profile.secure_boot.map(Value::Bool));
        insert_some(&mut uefi, "vTpmEnabled", profile.vtpm.map(Value::Bool));
        body.insert("uefiSettings".to_string(), Value::Object(uefi));
    }
    insert_some(&mut body, "encryptionAtHost", profile.encryption_at_host.map(Value::Bool));
    Value::Object(body)
}

fn boot_diagnostics(diagnostics: &BootDiagnostics) -> Value {
    match diagnostics.storage_account_type {
        BootDiagnosticsStorage::Disabled => json!({"bootDiagnostics": {"enabled": false}}),
        BootDiagnosticsStorage::AzureManaged => json!({"bootDiagnostics": {"enabled": true}}),
        BootDiagnosticsStorage::CustomerManaged => {
            let uri = diagnostics
                .customer_managed
                .as_ref()
                .map(|c| c.storage_account_uri.clone())
                .unwrap_or_default();
            json!({"bootDiagnostics": {"enabled": true, "storageUri": uri}})
        }
    }
}

fn max_price(raw: Option<&str>) -> f64 {
    raw.and_then(|p| p.trim().parse::<f64>().ok()).unwrap_or(-1.0)
}

fn os_profile(spec: &VmSpec, stack_hub: bool) -> Value {
    let mut profile = Map::new();
    profile.insert("computerName".to_string(), json!(spec.name));
    profile.insert("adminUsername".to_string(), json!(ADMIN_USERNAME));

    let linux = match &spec.ssh_public_key {
        Some(key) => json!({
            "disablePasswordAuthentication": true,
            "ssh": {"publicKeys": [{
                "path": format!("/home/{ADMIN_USERNAME}/.ssh/authorized_keys"),
                "keyData": key,
            }]},
        }),
        None => {
            // Linux VMs need a credential; generate one nobody knows.
            profile.insert(
                "adminPassword".to_string(),
                json!(format!("{}Aa1!", uuid::Uuid::new_v4().simple())),
            );
            json!({"disablePasswordAuthentication": false})
        }
    };
    if spec.os_disk.os_type.eq_ignore_ascii_case("linux") {
        profile.insert("linuxConfiguration".to_string(), linux);
    }
    if stack_hub {
        insert_some(&mut profile, "customData", spec.user_data.clone().map(Value::String));
    }
    Value::Object(profile)
}

fn storage_profile(spec: &VmSpec) -> Value {
    let mut managed_disk = Map::new();
    if !spec.os_disk.storage_account_type.is_empty() {
        managed_disk.insert("storageAccountType".to_string(), json!(spec.os_disk.storage_account_type));
    }
    insert_some(
        &mut managed_disk,
        "diskEncryptionSet",
        spec.os_disk.disk_encryption_set_id.as_ref().map(|id| json!({"id": id})),
    );

    let data_disks: Vec<Value> = spec
        .data_disks
        .iter()
        .map(|disk| {
            json!({
                "lun": disk.lun,
                "name": disk.name,
                "createOption": "Attach",
                "caching": disk.caching.as_deref().unwrap_or("None"),
                "managedDisk": {"id": disk.disk_id},
            })
        })
        .collect();

    json!({
        "imageReference": image_reference(&spec.image),
        "osDisk": {
            "name": spec.os_disk.name,
            "osType": spec.os_disk.os_type,
            "createOption": "FromImage",
            "caching": spec.os_disk.caching.as_deref().unwrap_or("ReadWrite"),
            "diskSizeGB": spec.os_disk.size_gb,
            "managedDisk": managed_disk,
        },
        "dataDisks": data_disks,
    })
}

/// Full PUT body for `spec`
pub fn body(spec: &VmSpec, stack_hub: bool) -> Value {
    let mut properties = Map::new();
    properties.insert("hardwareProfile".to_string(), json!({"vmSize": spec.size}));
    properties.insert("storageProfile".to_string(), storage_profile(spec));
    properties.insert("osProfile".to_string(), os_profile(spec, stack_hub));
    properties.insert(
        "networkProfile".to_string(),
        json!({"networkInterfaces": [{"id": spec.nic_id, "properties": {"primary": true}}]}),
    );
    insert_some(
        &mut properties,
        "availabilitySet",
        spec.availability_set_id.as_ref().map(|id| json!({"id": id})),
    );
    insert_some(
        &mut properties,
        "diagnosticsProfile",
        spec.boot_diagnostics.as_ref().map(boot_diagnostics),
    );
    if let Some(price) = &spec.spot_max_price {
        properties.insert("priority".to_string(), json!("Spot"));
        properties.insert("evictionPolicy".to_string(), json!("Delete"));
        properties.insert(
            "billingProfile".to_string(),
            json!({"maxPrice": max_price(price.as_deref())}),
        );
    }
    if !stack_hub {
        insert_some(&mut properties, "userData", spec.user_data.clone().map(Value::String));
        insert_some(
            &mut properties,
            "securityProfile",
            spec.security_profile.as_ref().map(security_profile),
        );
    }

    let mut body = Map::new();
    body.insert("location".to_string(), json!(spec.location));
    body.insert("tags".to_string(), json!(spec.tags));
    body.insert("properties".to_string(), Value::Object(properties));
    insert_some(&mut body, "identity", identity(&spec.identity));
    if spec.image.image_type == Some(ImageType::MarketplaceWithPlan) {
        body.insert(
            "plan".to_string(),
            json!({
                "name": spec.image.sku,
                "product": spec.image.offer,
                "publisher": spec.image.publisher,
            }),
        );
    }
    if !stack_hub {
        insert_some(&mut body, "zones", spec.zone.as_ref().map(|z| json!([z])));
    }
    Value::Object(body)
}

/// Virtual machine service
#[derive(Debug, Clone)]
pub struct VirtualMachines {
    ctx: AzureContext,
}

impl VirtualMachines {
    /// Create the service
    pub fn new(ctx: &AzureContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Resource ID of the VM named by `spec`
    pub fn id(&self, spec: &VmSpec) -> String {
        resource_id::resource_id(
            self.ctx.subscription_id(),
            &spec.resource_group,
            resource_id::VIRTUAL_MACHINES,
            &spec.name,
        )
    }

    /// Power on a stopped or deallocated VM
    pub async fn start(&self, spec: &VmSpec) -> Result<(), AzureError> {
        info!("Starting virtual machine {}/{}", spec.resource_group, spec.name);
        self.ctx.post(&self.id(spec), "start", self.ctx.profile.compute).await
    }
}

#[async_trait]
impl ResourceService for VirtualMachines {
    type Spec = VmSpec;

    async fn get(&self, spec: &VmSpec) -> Result<Option<Value>, AzureError> {
        self.ctx
            .get_optional(&self.id(spec), self.ctx.profile.compute, Some("instanceView"))
            .await
    }

    async fn create_or_update(&self, spec: &VmSpec) -> Result<(), AzureError> {
        info!(
            "Creating virtual machine {}/{} ({}, zone {})",
            spec.resource_group,
            spec.name,
            spec.size,
            spec.zone.as_deref().unwrap_or("none")
        );
        self.ctx
            .put(&self.id(spec), self.ctx.profile.compute, &body(spec, self.ctx.stack_hub))
            .await?;
        Ok(())
    }

    async fn delete(&self, spec: &VmSpec) -> Result<(), AzureError> {
        info!("Deleting virtual machine {}/{}", spec.resource_group, spec.name);
        self.ctx.delete(&self.id(spec), self.ctx.profile.compute).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::VmView;
    use crate::services::test_support::*;
    use azure_client::MockAzureClient;
    use crds::CustomerManagedBootDiagnostics;

    fn spec() -> VmSpec {
        VmSpec {
            name: "worker-0".to_string(),
            resource_group: "rg".to_string(),
            location: "eastus".to_string(),
            zone: Some("1".to_string()),
            size: "Standard_D4s_v3".to_string(),
            image: Image {
                publisher: "azureopenshift".to_string(),
                offer: "aro4".to_string(),
                sku: "aro_414".to_string(),
                version: "414.92.20230101".to_string(),
                ..Default::default()
            },
            os_disk: OsDiskSpec {
                name: "worker-0_OSDisk".to_string(),
                os_type: "Linux".to_string(),
                size_gb: 128,
                storage_account_type: "Premium_LRS".to_string(),
                caching: None,
                disk_encryption_set_id: None,
            },
            data_disks: vec![DataDiskAttachment {
                name: "worker-0_etcd".to_string(),
                disk_id: "/subscriptions/abc/resourceGroups/rg/providers/Microsoft.Compute/disks/worker-0_etcd".to_string(),
                lun: 0,
                caching: None,
            }],
            nic_id: "/subscriptions/abc/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/worker-0-nic".to_string(),
            user_data: Some("aWduaXRpb24=".to_string()),
            ssh_public_key: Some("ssh-rsa AAAA".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_body_marketplace_image_and_disks() {
        let body = body(&spec(), false);
        let storage = &body["properties"]["storageProfile"];
        assert_eq!(storage["imageReference"]["offer"], "aro4");
        assert_eq!(storage["osDisk"]["createOption"], "FromImage");
        assert_eq!(storage["osDisk"]["managedDisk"]["storageAccountType"], "Premium_LRS");
        assert_eq!(storage["dataDisks"][0]["createOption"], "Attach");
        assert_eq!(body["properties"]["userData"], "aWduaXRpb24=");
        assert_eq!(body["zones"], json!(["1"]));
        assert!(body.get("plan").is_none());
        assert!(body.get("identity").is_none());
        assert_eq!(
            body["properties"]["osProfile"]["linuxConfiguration"]["disablePasswordAuthentication"],
            true
        );
    }

    #[test]
    fn test_body_resource_id_image_with_identity_and_spot() {
        let mut spec = spec();
        spec.image = Image {
            resource_id: "/subscriptions/abc/resourceGroups/rg/providers/Microsoft.Compute/images/rhcos".to_string(),
            ..Default::default()
        };
        spec.identity = VmIdentity::UserAssigned {
            identities: vec!["/subscriptions/abc/resourceGroups/rg/providers/Microsoft.ManagedIdentity/userAssignedIdentities/id".to_string()],
        };
        spec.spot_max_price = Some(None);

        let body = body(&spec, false);
        assert!(body["properties"]["storageProfile"]["imageReference"]["id"].is_string());
        assert_eq!(body["identity"]["type"], "UserAssigned");
        assert_eq!(body["properties"]["priority"], "Spot");
        assert_eq!(body["properties"]["evictionPolicy"], "Delete");
        assert_eq!(body["properties"]["billingProfile"]["maxPrice"], -1.0);
    }

    #[test]
    fn test_body_plan_security_and_diagnostics() {
        let mut spec = spec();
        spec.image.image_type = Some(ImageType::MarketplaceWithPlan);
        spec.security_profile = Some(SecurityProfile {
            security_type: Some(SecurityType::TrustedLaunch),
            secure_boot: Some(true),
            vtpm: Some(true),
            encryption_at_host: None,
        });
        spec.boot_diagnostics = Some(BootDiagnostics {
            storage_account_type: BootDiagnosticsStorage::CustomerManaged,
            customer_managed: Some(CustomerManagedBootDiagnostics {
                storage_account_uri: "https://diag.blob.core.windows.net".to_string(),
            }),
        });
        spec.spot_max_price = Some(Some("0.25".to_string()));

        let body = body(&spec, false);
        assert_eq!(body["plan"]["product"], "aro4");
        assert_eq!(body["properties"]["securityProfile"]["securityType"], "TrustedLaunch");
        assert_eq!(body["properties"]["securityProfile"]["uefiSettings"]["vTpmEnabled"], true);
        assert_eq!(
            body["properties"]["diagnosticsProfile"]["bootDiagnostics"]["storageUri"],
            "https://diag.blob.core.windows.net"
        );
        assert_eq!(body["properties"]["billingProfile"]["maxPrice"], 0.25);
    }

    #[test]
    fn test_stack_hub_body_uses_custom_data() {
        let mut spec = spec();
        spec.ssh_public_key = None;
        spec.security_profile = Some(SecurityProfile::default());
        let body = body(&spec, true);
        assert!(body.get("zones").is_none());
        assert!(body["properties"].get("userData").is_none());
        assert!(body["properties"].get("securityProfile").is_none());
        assert_eq!(body["properties"]["osProfile"]["customData"], "aWduaXRpb24=");
        assert!(body["properties"]["osProfile"]["adminPassword"].is_string());
    }

    #[tokio::test]
    async fn test_create_get_and_start() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        let vms = VirtualMachines::new(&context(&mock));
        vms.create_or_update(&spec()).await.unwrap();

        let id = vms.id(&spec());
        mock.set_power_state(&id, "deallocated");
        let view = VmView::decode(&vms.get(&spec()).await.unwrap().unwrap());
        assert_eq!(view.power_state(), Some("deallocated"));

        vms.start(&spec()).await.unwrap();
        let view = VmView::decode(&vms.get(&spec()).await.unwrap().unwrap());
        assert_eq!(view.power_state(), Some("running"));
    }
}
