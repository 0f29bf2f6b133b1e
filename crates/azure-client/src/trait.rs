//! AzureClient trait for mocking
//!
//! This trait abstracts the ARM client to enable mocking in unit tests.
//! The concrete `ArmClient` implements this trait, and tests use `MockAzureClient`.

use crate::error::AzureError;
use crate::models::{AsyncOperation, Poller, ResourceSku};
use serde_json::Value;

/// Trait for Azure Resource Manager operations
///
/// Resources are addressed by full ARM resource ID. Mutating verbs start a
/// long-running operation and return a [`Poller`]; callers drive it to
/// completion with [`AzureClientTrait::poll`].
#[async_trait::async_trait]
pub trait AzureClientTrait: Send + Sync {
    /// Subscription the client operates in
    fn subscription_id(&self) -> &str;

    /// GET a resource. `expand` maps to `$expand` (e.g. "instanceView").
    async fn get(&self, id: &str, api_version: &str, expand: Option<&str>) -> Result<Value, AzureError>;

    /// PUT (create or replace) a resource
    async fn begin_put(&self, id: &str, api_version: &str, body: &Value) -> Result<Poller, AzureError>;

    /// PATCH a resource; completes synchronously
    async fn patch(&self, id: &str, api_version: &str, body: &Value) -> Result<Value, AzureError>;

    /// DELETE a resource
    async fn begin_delete(&self, id: &str, api_version: &str) -> Result<Poller, AzureError>;

    /// POST an action on a resource (`{id}/{action}`)
    async fn begin_post(&self, id: &str, action: &str, api_version: &str) -> Result<Poller, AzureError>;

    /// Poll a long-running operation once
    async fn poll(&self, operation: &AsyncOperation) -> Result<Poller, AzureError>;

    /// List compute SKUs offered in `location`, following all pages
    async fn list_resource_skus(&self, location: &str, api_version: &str) -> Result<Vec<ResourceSku>, AzureError>;
}
