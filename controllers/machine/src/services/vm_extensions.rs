//! VM extensions

use super::{AzureContext, ResourceService, insert_some};
use async_trait::async_trait;
use azure_client::{AzureError, resource_id};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::info;

/// Desired extension on a VM
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionSpec {
    /// Extension name
    pub name: String,
    /// VM name
    pub vm_name: String,
    /// Resource group
    pub resource_group: String,
    /// Region
    pub location: String,
    /// Publisher
    pub publisher: String,
    /// Extension type
    pub extension_type: String,
    /// Type handler version
    pub version: String,
    /// Public settings
    pub settings: Option<Value>,
    /// Protected settings
    pub protected_settings: Option<Value>,
    /// Tags
    pub tags: BTreeMap<String, String>,
}

/// VM extension service
#[derive(Debug, Clone)]
pub struct VmExtensions {
    ctx: AzureContext,
}

impl VmExtensions {
    /// Create the service
    pub fn new(ctx: &AzureContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn id(&self, spec: &ExtensionSpec) -> String {
        let vm = resource_id::resource_id(
            self.ctx.subscription_id(),
            &spec.resource_group,
            resource_id::VIRTUAL_MACHINES,
            &spec.vm_name,
        );
        resource_id::child_resource_id(&vm, "extensions", &spec.name)
    }
}

#[async_trait]
impl ResourceService for VmExtensions {
    type Spec = ExtensionSpec;

    async fn get(&self, spec: &ExtensionSpec) -> Result<Option<Value>, AzureError> {
        self.ctx.get_optional(&self.id(spec), self.ctx.profile.compute, None).await
    }

    async fn create_or_update(&self, spec: &ExtensionSpec) -> Result<(), AzureError> {
        info!("Installing extension {} on {}", spec.name, spec.vm_name);
        let mut properties = Map::new();
        properties.insert("publisher".to_string(), json!(spec.publisher));
        properties.insert("type".to_string(), json!(spec.extension_type));
        properties.insert("typeHandlerVersion".to_string(), json!(spec.version));
        properties.insert("autoUpgradeMinorVersion".to_string(), json!(true));
        insert_some(&mut properties, "settings", spec.settings.clone());
        insert_some(&mut properties, "protectedSettings", spec.protected_settings.clone());

        let body = json!({"location": spec.location, "tags": spec.tags, "properties": properties});
        self.ctx.put(&self.id(spec), self.ctx.profile.compute, &body).await?;
        Ok(())
    }

    async fn delete(&self, spec: &ExtensionSpec) -> Result<(), AzureError> {
        info!("Removing extension {} from {}", spec.name, spec.vm_name);
        self.ctx.delete(&self.id(spec), self.ctx.profile.compute).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ensure;
    use crate::services::test_support::*;
    use azure_client::MockAzureClient;

    #[tokio::test]
    async fn test_extension_is_child_of_vm() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        let extensions = VmExtensions::new(&context(&mock));
        let spec = ExtensionSpec {
            name: "CustomScript".to_string(),
            vm_name: "worker-0".to_string(),
            resource_group: "rg".to_string(),
            location: "eastus".to_string(),
            publisher: "Microsoft.Azure.Extensions".to_string(),
            extension_type: "CustomScript".to_string(),
            version: "2.1".to_string(),
            settings: Some(json!({"commandToExecute": "true"})),
            protected_settings: None,
            tags: BTreeMap::new(),
        };

        assert!(ensure(&extensions, &spec).await.unwrap());
        assert!(!ensure(&extensions, &spec).await.unwrap());
        let id = "/subscriptions/abc/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/worker-0/extensions/CustomScript";
        let stored = mock.resource(id).unwrap();
        assert_eq!(stored["properties"]["typeHandlerVersion"], "2.1");
        assert!(stored["properties"].get("protectedSettings").is_none());
    }
}
