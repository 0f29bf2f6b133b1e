//! Managed disks
//!
//! Data disks are created empty ahead of the VM and attached by ID. OS disks
//! are created by the VM itself and only ever deleted through this service.

use super::{AzureContext, ResourceService, insert_some};
use async_trait::async_trait;
use azure_client::{AzureError, resource_id};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::info;

/// Desired managed disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskSpec {
    /// Disk name
    pub name: String,
    /// Resource group
    pub resource_group: String,
    /// Region
    pub location: String,
    /// Availability zone
    pub zone: Option<String>,
    /// Size in GiB
    pub size_gb: i32,
    /// Storage account type; empty leaves the platform default
    pub storage_account_type: String,
    /// Customer-managed key encryption set
    pub disk_encryption_set_id: Option<String>,
    /// Tags
    pub tags: BTreeMap<String, String>,
}

impl DiskSpec {
    /// Spec that only identifies a disk, for lookups and deletion
    pub fn reference(name: impl Into<String>, resource_group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_group: resource_group.into(),
            ..Default::default()
        }
    }
}

/// Managed disk service
#[derive(Debug, Clone)]
pub struct Disks {
    ctx: AzureContext,
}

impl Disks {
    /// Create the service
    pub fn new(ctx: &AzureContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Resource ID of the disk named by `spec`
    pub fn id(&self, spec: &DiskSpec) -> String {
        resource_id::resource_id(self.ctx.subscription_id(), &spec.resource_group, resource_id::DISKS, &spec.name)
    }

    fn body(&self, spec: &DiskSpec) -> Value {
        let mut properties = serde_json::Map::new();
        properties.insert("creationData".to_string(), json!({"createOption": "Empty"}));
        properties.insert("diskSizeGB".to_string(), json!(spec.size_gb));
        insert_some(
            &mut properties,
            "encryption",
            spec.disk_encryption_set_id.as_ref().map(|id| {
                json!({"diskEncryptionSetId": id, "type": "EncryptionAtRestWithCustomerKey"})
            }),
        );

        let mut body = serde_json::Map::new();
        body.insert("location".to_string(), json!(spec.location));
        body.insert("tags".to_string(), json!(spec.tags));
        body.insert("properties".to_string(), Value::Object(properties));
        if !spec.storage_account_type.is_empty() {
            body.insert("sku".to_string(), json!({"name": spec.storage_account_type}));
        }
        if !self.ctx.stack_hub {
            insert_some(&mut body, "zones", spec.zone.as_ref().map(|z| json!([z])));
        }
        Value::Object(body)
    }
}

#[async_trait]
impl ResourceService for Disks {
    type Spec = DiskSpec;

    async fn get(&self, spec: &DiskSpec) -> Result<Option<Value>, AzureError> {
        self.ctx.get_optional(&self.id(spec), self.ctx.profile.disks, None).await
    }

    async fn create_or_update(&self, spec: &DiskSpec) -> Result<(), AzureError> {
        info!("Creating disk {}/{} ({} GiB)", spec.resource_group, spec.name, spec.size_gb);
        self.ctx.put(&self.id(spec), self.ctx.profile.disks, &self.body(spec)).await?;
        Ok(())
    }

    async fn delete(&self, spec: &DiskSpec) -> Result<(), AzureError> {
        info!("Deleting disk {}/{}", spec.resource_group, spec.name);
        self.ctx.delete(&self.id(spec), self.ctx.profile.disks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;
    use azure_client::MockAzureClient;

    fn spec() -> DiskSpec {
        DiskSpec {
            name: "worker-0_etcd".to_string(),
            resource_group: "rg".to_string(),
            location: "eastus".to_string(),
            zone: Some("2".to_string()),
            size_gb: 256,
            storage_account_type: "Premium_LRS".to_string(),
            disk_encryption_set_id: Some("/subscriptions/abc/resourceGroups/rg/providers/Microsoft.Compute/diskEncryptionSets/des".to_string()),
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_body_for_empty_data_disk() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        let body = Disks::new(&context(&mock)).body(&spec());
        assert_eq!(body["properties"]["creationData"]["createOption"], "Empty");
        assert_eq!(body["properties"]["diskSizeGB"], 256);
        assert_eq!(body["sku"]["name"], "Premium_LRS");
        assert_eq!(body["zones"], json!(["2"]));
        assert_eq!(body["properties"]["encryption"]["type"], "EncryptionAtRestWithCustomerKey");
    }

    #[test]
    fn test_stack_hub_disks_have_no_zones() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        let body = Disks::new(&stack_hub_context(&mock)).body(&spec());
        assert!(body.get("zones").is_none());
    }

    #[tokio::test]
    async fn test_delete_by_reference() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        let disks = Disks::new(&context(&mock));
        disks.create_or_update(&spec()).await.unwrap();

        let reference = DiskSpec::reference("worker-0_etcd", "rg");
        assert!(disks.get(&reference).await.unwrap().is_some());
        disks.delete(&reference).await.unwrap();
        disks.delete(&reference).await.unwrap();
        assert!(disks.get(&reference).await.unwrap().is_none());
    }
}
