//! Network interfaces

use super::{AzureContext, ResourceService, insert_some};
use async_trait::async_trait;
use azure_client::{AzureError, resource_id};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::info;

/// Name of the single IP configuration on machine NICs
pub const IP_CONFIGURATION_NAME: &str = "pipConfig";

/// Desired network interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NicSpec {
    /// Interface name
    pub name: String,
    /// Resource group
    pub resource_group: String,
    /// Region
    pub location: String,
    /// Subnet ID
    pub subnet_id: String,
    /// Public IP to attach
    pub public_ip_id: Option<String>,
    /// Request accelerated networking
    pub accelerated_networking: bool,
    /// Application security group IDs
    pub application_security_group_ids: Vec<String>,
    /// Load-balancer backend pool IDs
    pub backend_pool_ids: Vec<String>,
    /// Tags
    pub tags: BTreeMap<String, String>,
}

fn id_refs(ids: &[String]) -> Value {
    Value::Array(ids.iter().map(|id| json!({"id": id})).collect())
}

/// Network interface service
#[derive(Debug, Clone)]
pub struct NetworkInterfaces {
    ctx: AzureContext,
}

impl NetworkInterfaces {
    /// Create the service
    pub fn new(ctx: &AzureContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Resource ID of the interface named by `spec`
    pub fn id(&self, spec: &NicSpec) -> String {
        resource_id::resource_id(
            self.ctx.subscription_id(),
            &spec.resource_group,
            resource_id::NETWORK_INTERFACES,
            &spec.name,
        )
    }

    fn body(&self, spec: &NicSpec) -> Value {
        let mut ip_properties = serde_json::Map::new();
        ip_properties.insert("primary".to_string(), json!(true));
        ip_properties.insert("privateIPAllocationMethod".to_string(), json!("Dynamic"));
        ip_properties.insert("subnet".to_string(), json!({"id": spec.subnet_id}));
        insert_some(
            &mut ip_properties,
            "publicIPAddress",
            spec.public_ip_id.as_ref().map(|id| json!({"id": id})),
        );
        if !spec.backend_pool_ids.is_empty() {
            ip_properties.insert(
                "loadBalancerBackendAddressPools".to_string(),
                id_refs(&spec.backend_pool_ids),
            );
        }
        if !spec.application_security_group_ids.is_empty() {
            ip_properties.insert(
                "applicationSecurityGroups".to_string(),
                id_refs(&spec.application_security_group_ids),
            );
        }

        let mut properties = serde_json::Map::new();
        properties.insert(
            "ipConfigurations".to_string(),
            json!([{"name": IP_CONFIGURATION_NAME, "properties": ip_properties}]),
        );
        if !self.ctx.stack_hub {
            properties.insert(
                "enableAcceleratedNetworking".to_string(),
                json!(spec.accelerated_networking),
            );
        }

        json!({
            "location": spec.location,
            "tags": spec.tags,
            "properties": properties,
        })
    }
}

#[async_trait]
impl ResourceService for NetworkInterfaces {
    type Spec = NicSpec;

    async fn get(&self, spec: &NicSpec) -> Result<Option<Value>, AzureError> {
        self.ctx.get_optional(&self.id(spec), self.ctx.profile.network, None).await
    }

    async fn create_or_update(&self, spec: &NicSpec) -> Result<(), AzureError> {
        info!("Creating network interface {}/{}", spec.resource_group, spec.name);
        self.ctx.put(&self.id(spec), self.ctx.profile.network, &self.body(spec)).await?;
        Ok(())
    }

    async fn delete(&self, spec: &NicSpec) -> Result<(), AzureError> {
        info!("Deleting network interface {}/{}", spec.resource_group, spec.name);
        self.ctx.delete(&self.id(spec), self.ctx.profile.network).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::NicView;
    use crate::services::test_support::*;
    use azure_client::MockAzureClient;

    fn spec() -> NicSpec {
        NicSpec {
            name: "worker-0-nic".to_string(),
            resource_group: "rg".to_string(),
            location: "eastus".to_string(),
            subnet_id: resource_id::subnet_id(SUBSCRIPTION, "net-rg", "vnet", "workers"),
            public_ip_id: None,
            accelerated_networking: true,
            application_security_group_ids: vec![],
            backend_pool_ids: vec![resource_id::backend_pool_id(SUBSCRIPTION, "net-rg", "internal", "pool")],
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_private_ip_and_pools() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        let nics = NetworkInterfaces::new(&context(&mock));
        nics.create_or_update(&spec()).await.unwrap();

        let view = NicView::decode(&mock.resource(&nics.id(&spec())).unwrap());
        assert!(view.private_ip().is_some_and(|ip| ip.starts_with("10.0.0.")));
        assert_eq!(view.backend_pool_ids(), spec().backend_pool_ids);
        assert_eq!(view.properties.enable_accelerated_networking, Some(true));
        assert_eq!(
            view.primary_ip_configuration().and_then(|c| c.name.as_deref()),
            Some(IP_CONFIGURATION_NAME)
        );
    }

    #[test]
    fn test_stack_hub_omits_accelerated_networking() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        let body = NetworkInterfaces::new(&stack_hub_context(&mock)).body(&spec());
        assert!(body["properties"].get("enableAcceleratedNetworking").is_none());
    }
}
