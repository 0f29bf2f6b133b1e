//! Azure resource services
//!
//! One service per resource kind, each exposing the same Get /
//! CreateOrUpdate / Delete contract over a declarative spec:
//!
//! - `get` returns `Ok(None)` when the resource does not exist
//! - `create_or_update` converges when called repeatedly with the same spec
//! - `delete` succeeds when the resource is already gone
//!
//! Long-running operations are polled to completion on the context's poll
//! interval. Every call observes the context's cancellation token.

pub mod availability_sets;
pub mod disks;
pub mod groups;
pub mod interface_load_balancers;
pub mod network_interfaces;
pub mod public_ips;
pub mod tags;
pub mod virtual_machines;
pub mod vm_extensions;

use async_trait::async_trait;
use azure_client::{ApiProfile, AzureClientTrait, AzureError, Poller};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default interval between async-operation polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Verbs a service implementation supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `create_or_update` is available
    pub create_or_update: bool,
    /// `delete` is available
    pub delete: bool,
}

impl Capabilities {
    /// Every verb
    pub const FULL: Capabilities = Capabilities {
        create_or_update: true,
        delete: true,
    };

    /// Only `get`
    pub const GET_ONLY: Capabilities = Capabilities {
        create_or_update: false,
        delete: false,
    };
}

/// Uniform resource service contract
#[async_trait]
pub trait ResourceService: Send + Sync {
    /// Declarative description of the resource
    type Spec: Send + Sync;

    /// Verbs this implementation supports; callers check before mutating
    fn capabilities(&self) -> Capabilities {
        Capabilities::FULL
    }

    /// Current document, `None` if absent
    async fn get(&self, spec: &Self::Spec) -> Result<Option<Value>, AzureError>;

    /// Create the resource or bring it to `spec`
    async fn create_or_update(&self, spec: &Self::Spec) -> Result<(), AzureError>;

    /// Delete the resource; absent resources are not an error
    async fn delete(&self, spec: &Self::Spec) -> Result<(), AzureError>;
}

/// Create the resource unless it already exists. Returns whether it was created.
pub async fn ensure<S>(service: &S, spec: &S::Spec) -> Result<bool, AzureError>
where
    S: ResourceService + ?Sized,
{
    if service.get(spec).await?.is_some() {
        return Ok(false);
    }
    service.create_or_update(spec).await?;
    Ok(true)
}

/// Everything a service needs to talk to ARM
#[derive(Clone)]
pub struct AzureContext {
    /// ARM client
    pub client: Arc<dyn AzureClientTrait>,
    /// API versions
    pub profile: ApiProfile,
    /// Azure Stack Hub profile
    pub stack_hub: bool,
    /// Interval between async-operation polls
    pub poll_interval: Duration,
    /// Cancels in-flight calls
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for AzureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureContext")
            .field("subscription_id", &self.client.subscription_id())
            .field("profile", &self.profile)
            .field("stack_hub", &self.stack_hub)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl AzureContext {
    /// Subscription every resource lives in
    pub fn subscription_id(&self) -> &str {
        self.client.subscription_id()
    }

    /// Run `call` unless the context is cancelled first
    pub async fn guard<T, F>(&self, call: F) -> Result<T, AzureError>
    where
        F: Future<Output = Result<T, AzureError>> + Send,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(AzureError::Cancelled),
            result = call => result,
        }
    }

    /// GET mapping NotFound to `None`
    pub async fn get_optional(
        &self,
        id: &str,
        api_version: &str,
        expand: Option<&str>,
    ) -> Result<Option<Value>, AzureError> {
        debug!("GET {}", id);
        match self.guard(self.client.get(id, api_version, expand)).await {
            Ok(document) => Ok(Some(document)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// PUT and wait for completion
    pub async fn put(&self, id: &str, api_version: &str, body: &Value) -> Result<Option<Value>, AzureError> {
        let poller = self.guard(self.client.begin_put(id, api_version, body)).await?;
        self.wait(poller).await
    }

    /// PATCH (synchronous)
    pub async fn patch(&self, id: &str, api_version: &str, body: &Value) -> Result<Value, AzureError> {
        self.guard(self.client.patch(id, api_version, body)).await
    }

    /// DELETE and wait for completion; NotFound counts as deleted
    pub async fn delete(&self, id: &str, api_version: &str) -> Result<(), AzureError> {
        match self.guard(self.client.begin_delete(id, api_version)).await {
            Ok(poller) => match self.wait(poller).await {
                Err(e) if e.is_not_found() => Ok(()),
                other => other.map(|_| ()),
            },
            Err(e) if e.is_not_found() => {
                debug!("{} already deleted", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// POST an action and wait for completion
    pub async fn post(&self, id: &str, action: &str, api_version: &str) -> Result<(), AzureError> {
        let poller = self.guard(self.client.begin_post(id, action, api_version)).await?;
        self.wait(poller).await.map(|_| ())
    }

    /// Poll an operation until it finishes or the context is cancelled
    pub async fn wait(&self, mut poller: Poller) -> Result<Option<Value>, AzureError> {
        loop {
            let operation = match poller {
                Poller::Done(document) => return Ok(document),
                Poller::Pending(operation) => operation,
            };
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(AzureError::Cancelled),
                () = tokio::time::sleep(self.poll_interval) => {}
            }
            debug!("Polling {:?} operation on {}", operation.method, operation.resource_id);
            poller = self.guard(self.client.poll(&operation)).await?;
        }
    }
}

/// Insert `value` under `key` unless it is `None`
pub(crate) fn insert_some(object: &mut serde_json::Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        object.insert(key.to_string(), value);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::AzureContext;
    use azure_client::{ApiProfile, MockAzureClient};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    pub const SUBSCRIPTION: &str = "abc";

    pub fn context(mock: &MockAzureClient) -> AzureContext {
        AzureContext {
            client: Arc::new(mock.clone()),
            profile: ApiProfile::LATEST,
            stack_hub: false,
            poll_interval: Duration::from_millis(10),
            cancel: CancellationToken::new(),
        }
    }

    pub fn stack_hub_context(mock: &MockAzureClient) -> AzureContext {
        AzureContext {
            profile: ApiProfile::HYBRID,
            stack_hub: true,
            ..context(mock)
        }
    }
}
