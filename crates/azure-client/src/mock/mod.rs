//! Mock AzureClient for unit testing
//!
//! This module provides an in-memory implementation of `AzureClientTrait` that
//! can be used in unit tests without an Azure subscription.
//!
//! - `documents.rs` - server-side enrichment of stored documents (IPs, VM IDs, power state)
//! - `skus.rs` - helpers for building SKU catalogue entries
//!
//! Documents are keyed by lower-cased resource ID. Every mutating call is
//! recorded in a mutation log; individual calls can be made to fail, and
//! operations on "held" resources stay pending until released.

mod documents;
mod skus;

pub use skus::vm_sku;

use crate::azure_trait::AzureClientTrait;
use crate::error::AzureError;
use crate::models::*;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Verb of a mock call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockVerb {
    /// GET
    Get,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// POST action
    Post,
}

/// A recorded mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Verb
    pub verb: MockVerb,
    /// Resource ID as passed by the caller
    pub id: String,
    /// Action name for POST calls
    pub action: Option<String>,
}

/// Error returned by an injected failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedFailure {
    /// HTTP status
    pub status: u16,
    /// ARM error code
    pub code: String,
    /// ARM error message
    pub message: String,
}

impl InjectedFailure {
    /// Build a failure
    pub fn new(status: u16, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    fn to_error(&self) -> AzureError {
        if self.status == 404 {
            return AzureError::NotFound(self.message.clone());
        }
        AzureError::Api {
            status: self.status,
            code: self.code.clone(),
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingOperation {
    method: OperationMethod,
    key: String,
}

#[derive(Debug, Default)]
struct State {
    resources: HashMap<String, Value>,
    mutations: Vec<Mutation>,
    failures: HashMap<(MockVerb, String), VecDeque<InjectedFailure>>,
    held: HashSet<String>,
    pending: HashMap<String, PendingOperation>,
    skus: Vec<ResourceSku>,
    sku_failures: VecDeque<InjectedFailure>,
    sku_delay: Option<Duration>,
    next_address: u32,
}

/// Mock AzureClient for testing
#[derive(Debug, Clone)]
pub struct MockAzureClient {
    subscription_id: String,
    state: Arc<Mutex<State>>,
    sku_list_calls: Arc<AtomicUsize>,
}

fn key(id: &str) -> String {
    id.trim_end_matches('/').to_ascii_lowercase()
}

const TAGS_SUFFIX: &str = "/providers/microsoft.resources/tags/default";

impl MockAzureClient {
    /// Create a new mock client for `subscription_id`
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            state: Arc::new(Mutex::new(State::default())),
            sku_list_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a document as-is (for test setup)
    pub fn insert_resource(&self, id: &str, mut document: Value) {
        if let Some(obj) = document.as_object_mut() {
            obj.entry("id").or_insert_with(|| json!(id));
        }
        self.state().resources.insert(key(id), document);
    }

    /// Current stored document
    pub fn resource(&self, id: &str) -> Option<Value> {
        self.state().resources.get(&key(id)).cloned()
    }

    /// Whether a document is stored under `id`
    pub fn contains(&self, id: &str) -> bool {
        self.state().resources.contains_key(&key(id))
    }

    /// Number of stored documents
    pub fn resource_count(&self) -> usize {
        self.state().resources.len()
    }

    /// Mutating calls issued so far
    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().mutations.clone()
    }

    /// Mutating calls on resources whose ID contains `fragment` (case-insensitive)
    pub fn mutations_for(&self, fragment: &str) -> Vec<Mutation> {
        let fragment = fragment.to_ascii_lowercase();
        self.mutations()
            .into_iter()
            .filter(|m| m.id.to_ascii_lowercase().contains(&fragment))
            .collect()
    }

    /// Forget recorded mutations
    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    /// Make the next `verb` call on `id` fail
    pub fn fail_next(&self, verb: MockVerb, id: &str, failure: InjectedFailure) {
        self.state()
            .failures
            .entry((verb, key(id)))
            .or_default()
            .push_back(failure);
    }

    /// Keep PUT/DELETE operations on `id` pending until [`Self::release`]
    pub fn hold(&self, id: &str) {
        self.state().held.insert(key(id));
    }

    /// Let held operations on `id` complete on their next poll
    pub fn release(&self, id: &str) {
        self.state().held.remove(&key(id));
    }

    /// Overwrite the power state reported in a VM's instance view
    pub fn set_power_state(&self, vm_id: &str, power_state: &str) {
        if let Some(doc) = self.state().resources.get_mut(&key(vm_id)) {
            documents::set_power_state(doc, power_state);
        }
    }

    /// Add a SKU to the catalogue
    pub fn add_sku(&self, sku: ResourceSku) {
        self.state().skus.push(sku);
    }

    /// Delay every SKU list call
    pub fn set_sku_list_delay(&self, delay: Duration) {
        self.state().sku_delay = Some(delay);
    }

    /// Make the next SKU list call fail
    pub fn fail_next_sku_list(&self, failure: InjectedFailure) {
        self.state().sku_failures.push_back(failure);
    }

    /// Number of SKU list calls served
    pub fn sku_list_calls(&self) -> usize {
        self.sku_list_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self, verb: MockVerb, id: &str) -> Result<(), AzureError> {
        let mut state = self.state();
        match state.failures.get_mut(&(verb, key(id))).and_then(VecDeque::pop_front) {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    fn record(&self, verb: MockVerb, id: &str, action: Option<&str>) {
        self.state().mutations.push(Mutation {
            verb,
            id: id.to_string(),
            action: action.map(str::to_string),
        });
    }

    fn start_pending(state: &mut State, id: &str, api_version: &str, method: OperationMethod) -> Poller {
        let url = format!("mock://operations/{}", uuid::Uuid::new_v4());
        state.pending.insert(
            url.clone(),
            PendingOperation {
                method,
                key: key(id),
            },
        );
        Poller::Pending(AsyncOperation {
            url,
            kind: OperationKind::AsyncOperation,
            method,
            resource_id: id.to_string(),
            api_version: api_version.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl AzureClientTrait for MockAzureClient {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn get(&self, id: &str, _api_version: &str, _expand: Option<&str>) -> Result<Value, AzureError> {
        self.take_failure(MockVerb::Get, id)?;
        let state = self.state();
        let lookup = key(id);

        if let Some(scope) = lookup.strip_suffix(TAGS_SUFFIX) {
            let resource = state
                .resources
                .get(scope)
                .ok_or_else(|| AzureError::NotFound(id.to_string()))?;
            let tags = resource.get("tags").cloned().unwrap_or_else(|| json!({}));
            return Ok(json!({"id": id, "properties": {"tags": tags}}));
        }

        state
            .resources
            .get(&lookup)
            .cloned()
            .ok_or_else(|| AzureError::NotFound(id.to_string()))
    }

    async fn begin_put(&self, id: &str, api_version: &str, body: &Value) -> Result<Poller, AzureError> {
        self.take_failure(MockVerb::Put, id)?;
        self.record(MockVerb::Put, id, None);

        let mut state = self.state();
        let lookup = key(id);
        let held = state.held.contains(&lookup);
        let existing = state.resources.get(&lookup).cloned();
        let address = state.next_address + 4;
        state.next_address += 1;

        let mut document = documents::enrich(id, body, existing.as_ref(), address, held);
        documents::link_availability_set(&mut state.resources, id, &document);
        if let Some(obj) = document.as_object_mut() {
            obj.insert("id".to_string(), json!(id));
        }
        state.resources.insert(lookup, document.clone());

        if held {
            return Ok(Self::start_pending(&mut state, id, api_version, OperationMethod::Put));
        }
        Ok(Poller::Done(Some(document)))
    }

    async fn patch(&self, id: &str, _api_version: &str, body: &Value) -> Result<Value, AzureError> {
        self.take_failure(MockVerb::Patch, id)?;
        self.record(MockVerb::Patch, id, None);

        let mut state = self.state();
        let lookup = key(id);

        if let Some(scope) = lookup.strip_suffix(TAGS_SUFFIX) {
            let resource = state
                .resources
                .get_mut(scope)
                .ok_or_else(|| AzureError::NotFound(id.to_string()))?;
            let tags = documents::apply_tags_patch(resource, body);
            return Ok(json!({"id": id, "properties": {"tags": tags}}));
        }

        let resource = state
            .resources
            .get_mut(&lookup)
            .ok_or_else(|| AzureError::NotFound(id.to_string()))?;
        documents::merge_patch(resource, body);
        Ok(resource.clone())
    }

    async fn begin_delete(&self, id: &str, api_version: &str) -> Result<Poller, AzureError> {
        self.take_failure(MockVerb::Delete, id)?;
        self.record(MockVerb::Delete, id, None);

        let mut state = self.state();
        let lookup = key(id);
        if !state.resources.contains_key(&lookup) {
            return Err(AzureError::NotFound(id.to_string()));
        }

        if state.held.contains(&lookup) {
            if let Some(doc) = state.resources.get_mut(&lookup) {
                documents::set_provisioning_state(doc, "Deleting");
            }
            return Ok(Self::start_pending(&mut state, id, api_version, OperationMethod::Delete));
        }

        state.resources.remove(&lookup);
        documents::unlink_availability_set(&mut state.resources, id);
        Ok(Poller::Done(None))
    }

    async fn begin_post(&self, id: &str, action: &str, _api_version: &str) -> Result<Poller, AzureError> {
        self.take_failure(MockVerb::Post, id)?;
        self.record(MockVerb::Post, id, Some(action));

        let mut state = self.state();
        let doc = state
            .resources
            .get_mut(&key(id))
            .ok_or_else(|| AzureError::NotFound(id.to_string()))?;
        match action {
            "start" | "restart" => documents::set_power_state(doc, "running"),
            "powerOff" => documents::set_power_state(doc, "stopped"),
            "deallocate" => documents::set_power_state(doc, "deallocated"),
            _ => {}
        }
        Ok(Poller::Done(None))
    }

    async fn poll(&self, operation: &AsyncOperation) -> Result<Poller, AzureError> {
        let mut state = self.state();
        let pending = state
            .pending
            .get(&operation.url)
            .cloned()
            .ok_or_else(|| AzureError::InvalidRequest(format!("unknown operation {}", operation.url)))?;

        if state.held.contains(&pending.key) {
            return Ok(Poller::Pending(operation.clone()));
        }
        state.pending.remove(&operation.url);

        match pending.method {
            OperationMethod::Delete => {
                state.resources.remove(&pending.key);
                documents::unlink_availability_set(&mut state.resources, &operation.resource_id);
                Ok(Poller::Done(None))
            }
            OperationMethod::Put | OperationMethod::Post => {
                let doc = state.resources.get_mut(&pending.key).map(|doc| {
                    documents::finish_provisioning(doc);
                    doc.clone()
                });
                Ok(Poller::Done(doc))
            }
        }
    }

    async fn list_resource_skus(&self, location: &str, _api_version: &str) -> Result<Vec<ResourceSku>, AzureError> {
        self.sku_list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().sku_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(failure) = state.sku_failures.pop_front() {
            return Err(failure.to_error());
        }
        Ok(state
            .skus
            .iter()
            .filter(|sku| sku.locations.iter().any(|l| l.eq_ignore_ascii_case(location)))
            .cloned()
            .collect())
    }
}

impl Default for MockAzureClient {
    fn default() -> Self {
        Self::new("00000000-0000-0000-0000-000000000000")
    }
}

/// Tags of a stored document as a map
pub fn tags_of(document: &Value) -> Map<String, Value> {
    document
        .get("tags")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_id::{self, NETWORK_INTERFACES, VIRTUAL_MACHINES};

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let mock = MockAzureClient::new("abc");
        let id = resource_id::resource_id("abc", "rg", NETWORK_INTERFACES, "worker-0-nic");
        let body = json!({"location": "eastus", "properties": {"ipConfigurations": [{"name": "pipConfig", "properties": {}}]}});

        let poller = mock.begin_put(&id, "2023-09-01", &body).await.unwrap();
        assert!(matches!(poller, Poller::Done(Some(_))));

        let doc = mock.get(&id.to_uppercase(), "2023-09-01", None).await.unwrap();
        let ip = &doc["properties"]["ipConfigurations"][0]["properties"]["privateIPAddress"];
        assert!(ip.as_str().is_some_and(|ip| ip.starts_with("10.0.0.")));

        mock.begin_delete(&id, "2023-09-01").await.unwrap();
        let err = mock.get(&id, "2023-09-01", None).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(mock.mutations().len(), 2);
    }

    #[tokio::test]
    async fn test_held_operation_stays_pending_until_released() {
        let mock = MockAzureClient::new("abc");
        let id = resource_id::resource_id("abc", "rg", VIRTUAL_MACHINES, "worker-0");
        mock.hold(&id);

        let Poller::Pending(op) = mock.begin_put(&id, "v", &json!({"properties": {}})).await.unwrap() else {
            panic!("expected pending operation");
        };
        let doc = mock.resource(&id).unwrap();
        assert_eq!(doc["properties"]["provisioningState"], "Creating");
        assert!(matches!(mock.poll(&op).await.unwrap(), Poller::Pending(_)));

        mock.release(&id);
        let Poller::Done(Some(doc)) = mock.poll(&op).await.unwrap() else {
            panic!("expected completed operation");
        };
        assert_eq!(doc["properties"]["provisioningState"], "Succeeded");
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let mock = MockAzureClient::new("abc");
        let id = resource_id::resource_group_id("abc", "rg");
        mock.fail_next(MockVerb::Put, &id, InjectedFailure::new(503, "ServiceUnavailable", "try later"));

        let err = mock.begin_put(&id, "v", &json!({"location": "eastus"})).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(mock.begin_put(&id, "v", &json!({"location": "eastus"})).await.is_ok());
    }

    #[tokio::test]
    async fn test_tags_patch_merges_at_scope() {
        let mock = MockAzureClient::new("abc");
        let id = resource_id::resource_id("abc", "rg", VIRTUAL_MACHINES, "worker-0");
        mock.insert_resource(&id, json!({"tags": {"a": "1"}, "properties": {}}));

        let scope = resource_id::tags_id(&id);
        mock.patch(&scope, "v", &json!({"operation": "Merge", "properties": {"tags": {"b": "2"}}}))
            .await
            .unwrap();
        let tags = mock.get(&scope, "v", None).await.unwrap();
        assert_eq!(tags["properties"]["tags"], json!({"a": "1", "b": "2"}));
    }

    #[tokio::test]
    async fn test_sku_listing_filters_by_location_and_counts_calls() {
        let mock = MockAzureClient::new("abc");
        mock.add_sku(vm_sku("Standard_D4s_v3", &["eastus"], &[("vCPUs", "4")]));
        mock.add_sku(vm_sku("Standard_F2", &["westus"], &[("vCPUs", "2")]));

        let skus = mock.list_resource_skus("eastus", "v").await.unwrap();
        assert_eq!(skus.len(), 1);
        assert_eq!(mock.sku_list_calls(), 1);
    }
}
