//! Resource tags
//!
//! Tags are reconciled through the `Microsoft.Resources/tags` scope so that
//! only missing or changed keys are written. Keys set by someone else are left
//! alone.

use super::{AzureContext, ResourceService};
use async_trait::async_trait;
use azure_client::{AzureError, resource_id};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Desired tags on a resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagsSpec {
    /// Resource ID the tags belong to
    pub scope: String,
    /// Tags that must be present
    pub tags: BTreeMap<String, String>,
}

/// Tags in `desired` that `current` lacks or holds with another value
pub fn missing(current: &Value, desired: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let current = current.pointer("/properties/tags").and_then(Value::as_object);
    desired
        .iter()
        .filter(|(key, value)| {
            current
                .and_then(|tags| tags.get(*key))
                .and_then(Value::as_str)
                != Some(value.as_str())
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Tags service
#[derive(Debug, Clone)]
pub struct Tags {
    ctx: AzureContext,
}

impl Tags {
    /// Create the service
    pub fn new(ctx: &AzureContext) -> Self {
        Self { ctx: ctx.clone() }
    }
}

#[async_trait]
impl ResourceService for Tags {
    type Spec = TagsSpec;

    async fn get(&self, spec: &TagsSpec) -> Result<Option<Value>, AzureError> {
        self.ctx
            .get_optional(&resource_id::tags_id(&spec.scope), self.ctx.profile.resources, None)
            .await
    }

    async fn create_or_update(&self, spec: &TagsSpec) -> Result<(), AzureError> {
        let current = self.get(spec).await?.unwrap_or_else(|| json!({}));
        let diff = missing(&current, &spec.tags);
        if diff.is_empty() {
            debug!("Tags on {} are up to date", spec.scope);
            return Ok(());
        }
        info!("Merging tags {:?} into {}", diff.keys().collect::<Vec<_>>(), spec.scope);
        let body = json!({"operation": "Merge", "properties": {"tags": diff}});
        self.ctx
            .patch(&resource_id::tags_id(&spec.scope), self.ctx.profile.resources, &body)
            .await?;
        Ok(())
    }

    async fn delete(&self, spec: &TagsSpec) -> Result<(), AzureError> {
        let body = json!({"operation": "Delete", "properties": {"tags": spec.tags}});
        match self
            .ctx
            .patch(&resource_id::tags_id(&spec.scope), self.ctx.profile.resources, &body)
            .await
        {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }
}
