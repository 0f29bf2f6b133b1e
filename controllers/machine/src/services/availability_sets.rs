//! Availability sets
//!
//! Sets are shared by every Machine of a MachineSet, so deletion only goes
//! ahead once no VM references the set.

use super::{AzureContext, ResourceService};
use async_trait::async_trait;
use azure_client::{AzureError, resource_id};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Fault domains per set
pub const FAULT_DOMAIN_COUNT: u32 = 2;
/// Update domains per set
pub const UPDATE_DOMAIN_COUNT: u32 = 5;

/// Desired availability set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilitySetSpec {
    /// Set name
    pub name: String,
    /// Resource group
    pub resource_group: String,
    /// Region
    pub location: String,
    /// Tags
    pub tags: BTreeMap<String, String>,
}

/// Availability set service
#[derive(Debug, Clone)]
pub struct AvailabilitySets {
    ctx: AzureContext,
}

impl AvailabilitySets {
    /// Create the service
    pub fn new(ctx: &AzureContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Resource ID of the set named by `spec`
    pub fn id(&self, spec: &AvailabilitySetSpec) -> String {
        resource_id::resource_id(
            self.ctx.subscription_id(),
            &spec.resource_group,
            resource_id::AVAILABILITY_SETS,
            &spec.name,
        )
    }
}

fn member_count(document: &Value) -> usize {
    document
        .pointer("/properties/virtualMachines")
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

#[async_trait]
impl ResourceService for AvailabilitySets {
    type Spec = AvailabilitySetSpec;

    async fn get(&self, spec: &AvailabilitySetSpec) -> Result<Option<Value>, AzureError> {
        self.ctx.get_optional(&self.id(spec), self.ctx.profile.compute, None).await
    }

    async fn create_or_update(&self, spec: &AvailabilitySetSpec) -> Result<(), AzureError> {
        info!("Creating availability set {}/{}", spec.resource_group, spec.name);
        let body = json!({
            "location": spec.location,
            "tags": spec.tags,
            "sku": {"name": "Aligned"},
            "properties": {
                "platformFaultDomainCount": FAULT_DOMAIN_COUNT,
                "platformUpdateDomainCount": UPDATE_DOMAIN_COUNT,
            },
        });
        self.ctx.put(&self.id(spec), self.ctx.profile.compute, &body).await?;
        Ok(())
    }

    async fn delete(&self, spec: &AvailabilitySetSpec) -> Result<(), AzureError> {
        let Some(document) = self.get(spec).await? else {
            return Ok(());
        };
        let members = member_count(&document);
        if members > 0 {
            debug!(
                "Keeping availability set {}: {} virtual machines still use it",
                spec.name, members
            );
            return Ok(());
        }
        info!("Deleting availability set {}/{}", spec.resource_group, spec.name);
        self.ctx.delete(&self.id(spec), self.ctx.profile.compute).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;
    use azure_client::MockAzureClient;

    fn spec() -> AvailabilitySetSpec {
        AvailabilitySetSpec {
            name: "mycluster_workers-as".to_string(),
            resource_group: "rg".to_string(),
            location: "eastus".to_string(),
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_sets_domain_counts() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        let sets = AvailabilitySets::new(&context(&mock));
        sets.create_or_update(&spec()).await.unwrap();

        let stored = mock.resource(&sets.id(&spec())).unwrap();
        assert_eq!(stored["properties"]["platformFaultDomainCount"], 2);
        assert_eq!(stored["properties"]["platformUpdateDomainCount"], 5);
        assert_eq!(stored["sku"]["name"], "Aligned");
    }

    #[tokio::test]
    async fn test_delete_keeps_set_in_use() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        let sets = AvailabilitySets::new(&context(&mock));
        let id = sets.id(&spec());
        mock.insert_resource(
            &id,
            json!({"properties": {"virtualMachines": [{"id": "/subscriptions/abc/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/other"}]}}),
        );

        sets.delete(&spec()).await.unwrap();
        assert!(mock.contains(&id));

        mock.insert_resource(&id, json!({"properties": {"virtualMachines": []}}));
        sets.delete(&spec()).await.unwrap();
        assert!(!mock.contains(&id));
    }
}
