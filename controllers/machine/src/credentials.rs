//! Cloud credentials
//!
//! Credentials come from the Secret named by the provider spec. The
//! [`SecretReader`] and [`AzureClientFactory`] traits are the seams between
//! the scope and the outside world; tests substitute in-memory versions.

use crate::error::ControllerError;
use crate::reconcile_helpers::get_optional;
use async_trait::async_trait;
use azure_client::{
    ArmClient, AzureClientTrait, ClientCredential, CloudName, Environment, FEDERATED_TOKEN_FILE_ENV,
    ServicePrincipal,
};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Secret keys
pub mod keys {
    /// Subscription ID
    pub const SUBSCRIPTION_ID: &str = "azure_subscription_id";
    /// Application (client) ID
    pub const CLIENT_ID: &str = "azure_client_id";
    /// Client secret; optional with workload identity
    pub const CLIENT_SECRET: &str = "azure_client_secret";
    /// Tenant ID
    pub const TENANT_ID: &str = "azure_tenant_id";
    /// Default region
    pub const REGION: &str = "azure_region";
    /// Cluster resource prefix
    pub const RESOURCE_PREFIX: &str = "azure_resource_prefix";
    /// Default resource group
    pub const RESOURCE_GROUP: &str = "azure_resourcegroup";
    /// ARM endpoint (Azure Stack Hub)
    pub const RESOURCE_MANAGER_ENDPOINT: &str = "azure_resourcemanager_endpoint";
    /// Cloud name
    pub const ENVIRONMENT: &str = "azure_environment";
}

/// Decoded credentials Secret
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    /// Subscription ID
    pub subscription_id: String,
    /// Application (client) ID
    pub client_id: String,
    /// Client secret
    pub client_secret: Option<String>,
    /// Tenant ID
    pub tenant_id: String,
    /// Default region
    pub region: String,
    /// Cluster resource prefix
    pub resource_prefix: String,
    /// Default resource group
    pub resource_group: Option<String>,
    /// ARM endpoint override
    pub resource_manager_endpoint: Option<String>,
    /// Cloud
    pub environment: CloudName,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("subscription_id", &self.subscription_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("tenant_id", &self.tenant_id)
            .field("region", &self.region)
            .field("resource_prefix", &self.resource_prefix)
            .field("resource_group", &self.resource_group)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

fn optional(data: &BTreeMap<String, String>, key: &str) -> Option<String> {
    data.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(data: &BTreeMap<String, String>, key: &str) -> Result<String, ControllerError> {
    optional(data, key).ok_or_else(|| ControllerError::Credentials(format!("secret is missing {key}")))
}

impl Credentials {
    /// Decode Secret data
    pub fn from_data(data: &BTreeMap<String, String>) -> Result<Self, ControllerError> {
        let environment = optional(data, keys::ENVIRONMENT)
            .unwrap_or_default()
            .parse()
            .map_err(|e| ControllerError::Credentials(format!("{}: {e}", keys::ENVIRONMENT)))?;
        Ok(Self {
            subscription_id: required(data, keys::SUBSCRIPTION_ID)?,
            client_id: required(data, keys::CLIENT_ID)?,
            client_secret: optional(data, keys::CLIENT_SECRET),
            tenant_id: required(data, keys::TENANT_ID)?,
            region: required(data, keys::REGION)?,
            resource_prefix: required(data, keys::RESOURCE_PREFIX)?,
            resource_group: optional(data, keys::RESOURCE_GROUP),
            resource_manager_endpoint: optional(data, keys::RESOURCE_MANAGER_ENDPOINT),
            environment,
        })
    }
}

/// Reads Secret data as UTF-8 strings
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Data of `namespace/name`
    async fn read(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, ControllerError>;
}

/// Secret reader backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretReader {
    client: Client,
}

impl KubeSecretReader {
    /// Create a reader
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretReader for KubeSecretReader {
    async fn read(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = get_optional(&api, name)
            .await?
            .ok_or_else(|| ControllerError::Credentials(format!("secret {namespace}/{name} not found")))?;

        let mut data = BTreeMap::new();
        for (key, bytes) in secret.data.unwrap_or_default() {
            let value = String::from_utf8(bytes.0)
                .map_err(|_| ControllerError::Credentials(format!("secret {namespace}/{name} key {key} is not UTF-8")))?;
            data.insert(key, value);
        }
        Ok(data)
    }
}

/// An ARM client and the environment it talks to
#[derive(Clone)]
pub struct CloudClient {
    /// ARM client
    pub client: Arc<dyn AzureClientTrait>,
    /// Cloud environment
    pub environment: Environment,
}

impl std::fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClient")
            .field("subscription_id", &self.client.subscription_id())
            .field("environment", &self.environment.name)
            .finish()
    }
}

/// Builds ARM clients from credentials
#[async_trait]
pub trait AzureClientFactory: Send + Sync {
    /// Client for `credentials`
    async fn client(&self, credentials: &Credentials) -> Result<CloudClient, ControllerError>;
}

/// Factory producing reqwest-backed [`ArmClient`]s.
///
/// Clients are cached per credentials so tokens are reused across reconciles.
pub struct ArmClientFactory {
    workload_identity: bool,
    http: reqwest::Client,
    clients: Mutex<HashMap<Credentials, CloudClient>>,
}

impl ArmClientFactory {
    /// Create a factory; `workload_identity` allows secrets without a client secret
    pub fn new(workload_identity: bool) -> Result<Self, ControllerError> {
        Ok(Self {
            workload_identity,
            http: ArmClient::http_client()?,
            clients: Mutex::new(HashMap::new()),
        })
    }

    fn principal(&self, credentials: &Credentials) -> Result<ServicePrincipal, ControllerError> {
        let credential = match (&credentials.client_secret, self.workload_identity) {
            (Some(secret), _) => ClientCredential::Secret(secret.clone()),
            (None, true) => {
                let path = std::env::var(FEDERATED_TOKEN_FILE_ENV).map_err(|_| {
                    ControllerError::Credentials(format!(
                        "no client secret and {FEDERATED_TOKEN_FILE_ENV} is not set"
                    ))
                })?;
                ClientCredential::FederatedTokenFile(PathBuf::from(path))
            }
            (None, false) => {
                return Err(ControllerError::Credentials(format!(
                    "secret is missing {}",
                    keys::CLIENT_SECRET
                )));
            }
        };
        Ok(ServicePrincipal {
            tenant_id: credentials.tenant_id.clone(),
            client_id: credentials.client_id.clone(),
            credential,
        })
    }
}

#[async_trait]
impl AzureClientFactory for ArmClientFactory {
    async fn client(&self, credentials: &Credentials) -> Result<CloudClient, ControllerError> {
        let mut clients = self.clients.lock().await;
        if let Some(cached) = clients.get(credentials) {
            debug!("Reusing ARM client for subscription {}", credentials.subscription_id);
            return Ok(cached.clone());
        }

        let principal = self.principal(credentials)?;
        let environment = Environment::resolve(
            &self.http,
            credentials.environment,
            credentials.resource_manager_endpoint.as_deref(),
        )
        .await?;
        info!(
            "Created ARM client for subscription {} in {}",
            credentials.subscription_id, environment.name
        );
        let client = ArmClient::with_http(
            self.http.clone(),
            environment.clone(),
            principal,
            credentials.subscription_id.clone(),
        );
        let built = CloudClient {
            client: Arc::new(client),
            environment,
        };
        clients.insert(credentials.clone(), built.clone());
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    fn complete() -> BTreeMap<String, String> {
        data(&[
            (keys::SUBSCRIPTION_ID, "abc"),
            (keys::CLIENT_ID, "client"),
            (keys::CLIENT_SECRET, "s3cret"),
            (keys::TENANT_ID, "tenant"),
            (keys::REGION, "eastus"),
            (keys::RESOURCE_PREFIX, "mycluster"),
        ])
    }

    #[test]
    fn test_credentials_from_complete_secret() {
        let creds = Credentials::from_data(&complete()).unwrap();
        assert_eq!(creds.subscription_id, "abc");
        assert_eq!(creds.environment, CloudName::AzurePublicCloud);
        assert_eq!(creds.resource_group, None);
        assert!(!format!("{creds:?}").contains("s3cret"));
    }

    #[test]
    fn test_missing_required_key() {
        let mut secret = complete();
        secret.remove(keys::TENANT_ID);
        let err = Credentials::from_data(&secret).unwrap_err();
        assert!(err.to_string().contains(keys::TENANT_ID));
    }

    #[test]
    fn test_stack_environment_and_blank_values() {
        let mut secret = complete();
        secret.insert(keys::ENVIRONMENT.to_string(), "AzureStackCloud".to_string());
        secret.insert(keys::RESOURCE_MANAGER_ENDPOINT.to_string(), "https://management.local.azurestack.external".to_string());
        secret.insert(keys::RESOURCE_GROUP.to_string(), "  ".to_string());
        let creds = Credentials::from_data(&secret).unwrap();
        assert_eq!(creds.environment, CloudName::AzureStackCloud);
        assert!(creds.resource_manager_endpoint.is_some());
        assert_eq!(creds.resource_group, None);
    }

    #[test]
    fn test_client_secret_required_without_workload_identity() {
        let mut secret = complete();
        secret.remove(keys::CLIENT_SECRET);
        let creds = Credentials::from_data(&secret).unwrap();

        let factory = ArmClientFactory::new(false).unwrap();
        assert!(matches!(factory.principal(&creds), Err(ControllerError::Credentials(_))));
    }
}
