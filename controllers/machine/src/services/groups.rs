//! Resource groups

use super::{AzureContext, ResourceService};
use async_trait::async_trait;
use azure_client::{AzureError, resource_id};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::info;

/// Desired resource group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSpec {
    /// Group name
    pub name: String,
    /// Region
    pub location: String,
    /// Tags
    pub tags: BTreeMap<String, String>,
}

/// Resource group service
#[derive(Debug, Clone)]
pub struct Groups {
    ctx: AzureContext,
}

impl Groups {
    /// Create the service
    pub fn new(ctx: &AzureContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn id(&self, spec: &GroupSpec) -> String {
        resource_id::resource_group_id(self.ctx.subscription_id(), &spec.name)
    }
}

#[async_trait]
impl ResourceService for Groups {
    type Spec = GroupSpec;

    async fn get(&self, spec: &GroupSpec) -> Result<Option<Value>, AzureError> {
        self.ctx.get_optional(&self.id(spec), self.ctx.profile.resources, None).await
    }

    async fn create_or_update(&self, spec: &GroupSpec) -> Result<(), AzureError> {
        info!("Creating resource group {} in {}", spec.name, spec.location);
        let body = json!({"location": spec.location, "tags": spec.tags});
        self.ctx.put(&self.id(spec), self.ctx.profile.resources, &body).await?;
        Ok(())
    }

    async fn delete(&self, spec: &GroupSpec) -> Result<(), AzureError> {
        info!("Deleting resource group {}", spec.name);
        self.ctx.delete(&self.id(spec), self.ctx.profile.resources).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ensure;
    use crate::services::test_support::*;
    use azure_client::{MockAzureClient, MockVerb};

    fn spec() -> GroupSpec {
        GroupSpec {
            name: "mycluster-rg".to_string(),
            location: "eastus".to_string(),
            tags: BTreeMap::from([("owner".to_string(), "mapi".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_ensure_creates_once() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        let groups = Groups::new(&context(&mock));

        assert!(ensure(&groups, &spec()).await.unwrap());
        assert!(!ensure(&groups, &spec()).await.unwrap());

        let puts: Vec<_> = mock.mutations().into_iter().filter(|m| m.verb == MockVerb::Put).collect();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].id, "/subscriptions/abc/resourceGroups/mycluster-rg");
    }

    #[tokio::test]
    async fn test_delete_missing_group() {
        let mock = MockAzureClient::new(SUBSCRIPTION);
        let groups = Groups::new(&context(&mock));
        groups.delete(&spec()).await.unwrap();
        assert!(groups.get(&spec()).await.unwrap().is_none());
    }
}
