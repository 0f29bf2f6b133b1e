//! NIC backend pool membership
//!
//! Membership lives on the NIC's primary IP configuration, so updating it
//! means reading the NIC and writing it back whole. Azure Stack Hub only
//! exposes the read side.

use super::{AzureContext, Capabilities, ResourceService};
use async_trait::async_trait;
use azure_client::AzureError;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tracing::info;

/// Desired backend pool membership of one NIC
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendPoolSpec {
    /// NIC resource ID
    pub nic_id: String,
    /// Pools the primary IP configuration must belong to
    pub backend_pool_ids: Vec<String>,
}

fn normalized(ids: impl IntoIterator<Item = impl AsRef<str>>) -> BTreeSet<String> {
    ids.into_iter().map(|id| id.as_ref().to_ascii_lowercase()).collect()
}

fn primary_index(configs: &[Value]) -> usize {
    configs
        .iter()
        .position(|c| c.pointer("/properties/primary").and_then(Value::as_bool) == Some(true))
        .unwrap_or(0)
}

/// Pool IDs on the primary IP configuration of a NIC document
pub fn current_pools(nic: &Value) -> Vec<String> {
    let configs = nic
        .pointer("/properties/ipConfigurations")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    configs
        .get(primary_index(configs))
        .and_then(|c| c.pointer("/properties/loadBalancerBackendAddressPools"))
        .and_then(Value::as_array)
        .map(|pools| {
            pools
                .iter()
                .filter_map(|p| p.get("id").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Whether a NIC document already has exactly the desired pools
pub fn in_sync(nic: &Value, desired: &[String]) -> bool {
    normalized(current_pools(nic)) == normalized(desired)
}

/// Rewrite the primary configuration's pools; `false` if the NIC has no configuration
fn set_pools(nic: &mut Value, pools: &[String]) -> bool {
    let Some(configs) = nic
        .pointer_mut("/properties/ipConfigurations")
        .and_then(Value::as_array_mut)
    else {
        return false;
    };
    let index = primary_index(configs);
    let Some(properties) = configs
        .get_mut(index)
        .and_then(|c| c.as_object_mut())
        .map(|c| c.entry("properties").or_insert_with(|| json!({})))
        .and_then(Value::as_object_mut)
    else {
        return false;
    };
    let refs: Vec<Value> = pools.iter().map(|id| json!({"id": id})).collect();
    properties.insert("loadBalancerBackendAddressPools".to_string(), Value::Array(refs));
    true
}

/// Azure implementation: full read and write
#[derive(Debug, Clone)]
pub struct InterfaceLoadBalancers {
    ctx: AzureContext,
}

impl InterfaceLoadBalancers {
    /// Create the service
    pub fn new(ctx: &AzureContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    async fn write_pools(&self, nic_id: &str, pools: Vec<String>) -> Result<(), AzureError> {
        let mut nic = self
            .ctx
            .get_optional(nic_id, self.ctx.profile.network, None)
            .await?
            .ok_or_else(|| AzureError::NotFound(nic_id.to_string()))?;
        if normalized(current_pools(&nic)) == normalized(&pools) {
            return Ok(());
        }
        if !set_pools(&mut nic, &pools) {
            return Err(AzureError::InvalidRequest(format!(
                "network interface {nic_id} has no IP configuration"
            )));
        }
        info!("Updating backend pools of {} to {:?}", nic_id, pools);
        self.ctx.put(nic_id, self.ctx.profile.network, &nic).await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceService for InterfaceLoadBalancers {
    type Spec = BackendPoolSpec;

    async fn get(&self, spec: &BackendPoolSpec) -> Result<Option<Value>, AzureError> {
        self.ctx.get_optional(&spec.nic_id, self.ctx.profile.network, None).await
    }

    async fn create_or_update(&self, spec: &BackendPoolSpec) -> Result<(), AzureError> {
        self.write_pools(&spec.nic_id, spec.backend_pool_ids.clone()).await
    }

    /// Remove the spec's pools from the NIC, keeping any others
    async fn delete(&self, spec: &BackendPoolSpec) -> Result<(), AzureError> {
        let Some(nic) = self.get(spec).await? else {
            return Ok(());
        };
        let removed = normalized(&spec.backend_pool_ids);
        let remaining: Vec<String> = current_pools(&nic)
            .into_iter()
            .filter(|id| !removed.contains(&id.to_ascii_lowercase()))
            .collect();
        self.write_pools(&spec.nic_id, remaining).await
    }
}

/// Azure Stack Hub implementation: read only
#[derive(Debug, Clone)]
pub struct StackHubInterfaceLoadBalancers {
    ctx: AzureContext,
}

impl StackHubInterfaceLoadBalancers {
    /// Create the service
    pub fn new(ctx: &AzureContext) -> Self {
        Self { ctx: ctx.clone() }
    }
}

#[async_trait]
impl ResourceService for StackHubInterfaceLoadBalancers {
    type Spec = BackendPoolSpec;

    fn capabilities(&self) -> Capabilities {
        Capabilities::GET_ONLY
    }

    async fn get(&self, spec: &BackendPoolSpec) -> Result<Option<Value>, AzureError> {
        self.ctx.get_optional(&spec.nic_id, self.ctx.profile.network, None).await
    }

    async fn create_or_update(&self, _spec: &BackendPoolSpec) -> Result<(), AzureError> {
        Err(AzureError::NotImplemented(
            "updating NIC backend pools on Azure Stack Hub".to_string(),
        ))
    }

    async fn delete(&self, _spec: &BackendPoolSpec) -> Result<(), AzureError> {
        Err(AzureError::NotImplemented(
            "removing NIC backend pools on Azure Stack Hub".to_string(),
        ))
    }
}

/// Backend pool service for the context's cloud
pub fn for_context(ctx: &AzureContext) -> Box<dyn ResourceService<Spec = BackendPoolSpec>> {
    if ctx.stack_hub {
        Box::new(StackHubInterfaceLoadBalancers::new(ctx))
    } else {
        Box::new(InterfaceLoadBalancers::new(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;
    use azure_client::{MockAzureClient, MockVerb, resource_id};

    const POOL_A: &str = "/subscriptions/abc/resourceGroups/net/providers/Microsoft.Network/loadBalancers/lb/backendAddressPools/a";
    const POOL_B: &str = "/subscriptions/abc/resourceGroups/net/providers/Microsoft.Network/loadBalancers/lb/backendAddressPools/b";

    fn nic_id() -> String {
        resource_id::resource_id(SUBSCRIPTION, "rg", resource_id::NETWORK_INTERFACES, "worker-0-nic")
    }

    fn seed(mock: &MockAzureClient, pools: &[&str]) {
        let refs: Vec<Value> = pools.iter().map(|id| json!({"id": id})).collect();
        mock.insert_resource(
            &nic_id(),
            json!({
                "properties": {
                    "ipConfigurations": [{
                        "name": "pipConfig",
                        "properties": {"primary": true, "loadBalancerBackendAddressPools": refs}
                    }]
                }
            }),
        );
    }

    fn spec(pools: &[&str]) -> BackendPoolSpec {
        BackendPoolSpec {
            nic_id: nic_id(),
            backend_pool_ids: pools.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_drift_is_fixed_with_single_put() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        seed(&mock, &[]);
        let service = for_context(&context(&mock));

        service.create_or_update(&spec(&[POOL_A, POOL_B])).await.unwrap();
        let puts = mock.mutations_for("worker-0-nic");
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].verb, MockVerb::Put);
        assert!(in_sync(&mock.resource(&nic_id()).unwrap(), &spec(&[POOL_B, POOL_A]).backend_pool_ids));

        mock.clear_mutations();
        service.create_or_update(&spec(&[POOL_A, POOL_B])).await.unwrap();
        assert!(mock.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_only_named_pools() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        seed(&mock, &[POOL_A, POOL_B]);
        let service = InterfaceLoadBalancers::new(&context(&mock));

        service.delete(&spec(&[POOL_A])).await.unwrap();
        assert_eq!(current_pools(&mock.resource(&nic_id()).unwrap()), vec![POOL_B.to_string()]);
    }

    #[tokio::test]
    async fn test_stack_hub_is_read_only() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        seed(&mock, &[POOL_A]);
        let service = for_context(&stack_hub_context(&mock));

        assert_eq!(service.capabilities(), Capabilities::GET_ONLY);
        assert!(service.get(&spec(&[])).await.unwrap().is_some());
        let err = service.create_or_update(&spec(&[POOL_B])).await.unwrap_err();
        assert!(matches!(err, AzureError::NotImplemented(_)));
        assert!(mock.mutations().is_empty());
    }

    #[test]
    fn test_in_sync_ignores_case_and_order() {
        let nic = json!({"properties": {"ipConfigurations": [
            {"properties": {"primary": false, "loadBalancerBackendAddressPools": []}},
            {"properties": {"primary": true, "loadBalancerBackendAddressPools": [{"id": POOL_A.to_uppercase()}]}}
        ]}});
        assert!(in_sync(&nic, &[POOL_A.to_string()]));
        assert!(!in_sync(&nic, &[]));
    }
}
