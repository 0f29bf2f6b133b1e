//! Public IP addresses

use super::{AzureContext, ResourceService, insert_some};
use async_trait::async_trait;
use azure_client::{AzureError, resource_id};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::info;

/// Desired public IP
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicIpSpec {
    /// Address name
    pub name: String,
    /// Resource group
    pub resource_group: String,
    /// Region
    pub location: String,
    /// Availability zone
    pub zone: Option<String>,
    /// DNS label; yields `{label}.{region}.cloudapp.azure.com`
    pub dns_label: Option<String>,
    /// Tags
    pub tags: BTreeMap<String, String>,
}

/// DNS label for a public IP name, when the name is a valid label.
///
/// Labels are lower-case, 3 to 63 characters, start with a letter and end
/// with a letter or digit.
pub fn dns_label(name: &str) -> Option<String> {
    let label = name.to_ascii_lowercase();
    let valid_len = (3..=63).contains(&label.len());
    let starts = label.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let ends = label.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    let chars = label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    (valid_len && starts && ends && chars).then_some(label)
}

/// Public IP service
#[derive(Debug, Clone)]
pub struct PublicIps {
    ctx: AzureContext,
}

impl PublicIps {
    /// Create the service
    pub fn new(ctx: &AzureContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Resource ID of the address named by `spec`
    pub fn id(&self, spec: &PublicIpSpec) -> String {
        resource_id::resource_id(
            self.ctx.subscription_id(),
            &spec.resource_group,
            resource_id::PUBLIC_IP_ADDRESSES,
            &spec.name,
        )
    }

    fn body(&self, spec: &PublicIpSpec) -> Value {
        let sku = if self.ctx.stack_hub { "Basic" } else { "Standard" };
        let mut properties = serde_json::Map::new();
        properties.insert("publicIPAllocationMethod".to_string(), json!("Static"));
        properties.insert("publicIPAddressVersion".to_string(), json!("IPv4"));
        insert_some(
            &mut properties,
            "dnsSettings",
            spec.dns_label.as_ref().map(|label| json!({"domainNameLabel": label})),
        );

        let mut body = serde_json::Map::new();
        body.insert("location".to_string(), json!(spec.location));
        body.insert("tags".to_string(), json!(spec.tags));
        body.insert("sku".to_string(), json!({"name": sku}));
        body.insert("properties".to_string(), Value::Object(properties));
        if !self.ctx.stack_hub {
            insert_some(&mut body, "zones", spec.zone.as_ref().map(|z| json!([z])));
        }
        Value::Object(body)
    }
}

#[async_trait]
impl ResourceService for PublicIps {
    type Spec = PublicIpSpec;

    async fn get(&self, spec: &PublicIpSpec) -> Result<Option<Value>, AzureError> {
        self.ctx.get_optional(&self.id(spec), self.ctx.profile.network, None).await
    }

    async fn create_or_update(&self, spec: &PublicIpSpec) -> Result<(), AzureError> {
        info!("Creating public IP {}/{}", spec.resource_group, spec.name);
        self.ctx.put(&self.id(spec), self.ctx.profile.network, &self.body(spec)).await?;
        Ok(())
    }

    async fn delete(&self, spec: &PublicIpSpec) -> Result<(), AzureError> {
        info!("Deleting public IP {}/{}", spec.resource_group, spec.name);
        self.ctx.delete(&self.id(spec), self.ctx.profile.network).await
    }
}
