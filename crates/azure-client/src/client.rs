//! Azure Resource Manager client
//!
//! Thin REST client over ARM: resources are addressed by ID, bodies are raw
//! JSON, and long-running operations are surfaced as pollable handles
//! following the `Azure-AsyncOperation` / `Location` header protocol.

use crate::auth::{ServicePrincipal, TokenProvider};
use crate::azure_trait::AzureClientTrait;
use crate::environment::Environment;
use crate::error::AzureError;
use crate::models::*;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const ASYNC_OPERATION_HEADER: &str = "Azure-AsyncOperation";
const LOCATION_HEADER: &str = "Location";

/// ARM client
#[derive(Debug)]
pub struct ArmClient {
    client: Client,
    environment: Environment,
    subscription_id: String,
    tokens: TokenProvider,
}

impl ArmClient {
    /// Create a new ARM client
    ///
    /// # Arguments
    /// * `environment` - Resolved cloud environment
    /// * `principal` - Service principal used to acquire tokens
    /// * `subscription_id` - Subscription all resource IDs live in
    pub fn new(environment: Environment, principal: ServicePrincipal, subscription_id: String) -> Result<Self, AzureError> {
        let client = Self::http_client()?;
        Ok(Self::with_http(client, environment, principal, subscription_id))
    }

    /// Create a client reusing an existing HTTP client
    pub fn with_http(client: Client, environment: Environment, principal: ServicePrincipal, subscription_id: String) -> Self {
        let tokens = TokenProvider::new(client.clone(), &environment, principal);
        Self {
            client,
            environment,
            subscription_id,
            tokens,
        }
    }

    /// HTTP client with the timeouts used for ARM and metadata calls
    pub fn http_client() -> Result<Client, AzureError> {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(AzureError::Http)
    }

    /// Cloud environment
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        if path.starts_with("http") {
            return path.to_string();
        }
        format!(
            "{}{}?api-version={}",
            self.environment.resource_manager_endpoint,
            path,
            urlencoding::encode(api_version)
        )
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response, AzureError> {
        let token = self.tokens.token().await?;
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Turn a non-success response into an error
    async fn error_from(response: Response, what: &str) -> AzureError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error)
            .unwrap_or_default();

        if status == StatusCode::NOT_FOUND {
            return AzureError::NotFound(format!("{what}: {}", detail.message));
        }
        AzureError::Api {
            status: status.as_u16(),
            code: if detail.code.is_empty() {
                status.canonical_reason().unwrap_or("Unknown").to_string()
            } else {
                detail.code
            },
            message: if detail.message.is_empty() {
                text.chars().take(500).collect()
            } else {
                detail.message
            },
        }
    }

    async fn body_of(response: Response) -> Result<Option<Value>, AzureError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Interpret the initial response of a long-running operation
    async fn begin(
        &self,
        method: Method,
        op_method: OperationMethod,
        id: &str,
        url: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> Result<Poller, AzureError> {
        debug!("{} {}", method, url);
        let response = self.send(method.clone(), url, body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from(response, &format!("{method} {id}")).await);
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let pending = |url: String, kind: OperationKind| {
            Poller::Pending(AsyncOperation {
                url,
                kind,
                method: op_method,
                resource_id: id.to_string(),
                api_version: api_version.to_string(),
            })
        };

        if let Some(url) = header(ASYNC_OPERATION_HEADER) {
            return Ok(pending(url, OperationKind::AsyncOperation));
        }
        if status == StatusCode::ACCEPTED {
            if let Some(url) = header(LOCATION_HEADER) {
                return Ok(pending(url, OperationKind::Location));
            }
        }
        Ok(Poller::Done(Self::body_of(response).await?))
    }
}

#[async_trait::async_trait]
impl AzureClientTrait for ArmClient {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn get(&self, id: &str, api_version: &str, expand: Option<&str>) -> Result<Value, AzureError> {
        let mut url = self.url(id, api_version);
        if let Some(expand) = expand {
            url = format!("{url}&$expand={}", urlencoding::encode(expand));
        }
        debug!("GET {}", url);

        let response = self.send(Method::GET, &url, None).await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, id).await);
        }
        Self::body_of(response)
            .await?
            .ok_or_else(|| AzureError::InvalidRequest(format!("empty body for GET {id}")))
    }

    async fn begin_put(&self, id: &str, api_version: &str, body: &Value) -> Result<Poller, AzureError> {
        let url = self.url(id, api_version);
        self.begin(Method::PUT, OperationMethod::Put, id, &url, api_version, Some(body)).await
    }

    async fn patch(&self, id: &str, api_version: &str, body: &Value) -> Result<Value, AzureError> {
        let url = self.url(id, api_version);
        debug!("PATCH {}", url);
        let response = self.send(Method::PATCH, &url, Some(body)).await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, id).await);
        }
        Ok(Self::body_of(response).await?.unwrap_or(Value::Null))
    }

    async fn begin_delete(&self, id: &str, api_version: &str) -> Result<Poller, AzureError> {
        let url = self.url(id, api_version);
        self.begin(Method::DELETE, OperationMethod::Delete, id, &url, api_version, None).await
    }

    async fn begin_post(&self, id: &str, action: &str, api_version: &str) -> Result<Poller, AzureError> {
        let url = self.url(&format!("{id}/{action}"), api_version);
        self.begin(Method::POST, OperationMethod::Post, id, &url, api_version, None).await
    }

    async fn poll(&self, operation: &AsyncOperation) -> Result<Poller, AzureError> {
        debug!("Polling {:?} operation on {}", operation.method, operation.resource_id);
        let response = self.send(Method::GET, &operation.url, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from(response, &operation.resource_id).await);
        }

        match operation.kind {
            OperationKind::Location => {
                if status == StatusCode::ACCEPTED {
                    return Ok(Poller::Pending(operation.clone()));
                }
                Ok(Poller::Done(Self::body_of(response).await?))
            }
            OperationKind::AsyncOperation => {
                let state: OperationStatus = serde_json::from_str(&response.text().await?)?;
                match state.status.to_ascii_lowercase().as_str() {
                    "succeeded" => {
                        if operation.method == OperationMethod::Put {
                            let body = self.get(&operation.resource_id, &operation.api_version, None).await?;
                            Ok(Poller::Done(Some(body)))
                        } else {
                            Ok(Poller::Done(None))
                        }
                    }
                    "failed" | "canceled" | "cancelled" => {
                        let error = state.error.unwrap_or_default();
                        Err(AzureError::OperationFailed {
                            code: if error.code.is_empty() { state.status } else { error.code },
                            message: error.message,
                        })
                    }
                    _ => Ok(Poller::Pending(operation.clone())),
                }
            }
        }
    }

    async fn list_resource_skus(&self, location: &str, api_version: &str) -> Result<Vec<ResourceSku>, AzureError> {
        let path = format!("/subscriptions/{}/providers/Microsoft.Compute/skus", self.subscription_id);
        let filter = format!("location eq '{location}'");
        let mut url = format!(
            "{}&$filter={}",
            self.url(&path, api_version),
            urlencoding::encode(&filter)
        );
        let mut all = Vec::new();

        loop {
            debug!("Fetching SKU page: {}", url);
            let response = self.send(Method::GET, &url, None).await?;
            if !response.status().is_success() {
                return Err(Self::error_from(response, "resource SKUs").await);
            }
            let text = response.text().await?;
            let page: PagedResponse<ResourceSku> = serde_json::from_str(&text).map_err(|e| {
                AzureError::InvalidRequest(format!(
                    "error decoding SKU page: {} - Response (first 500 chars): {}",
                    e,
                    text.chars().take(500).collect::<String>()
                ))
            })?;
            all.extend(page.value);

            match page.next_link {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }
        Ok(all)
    }
}
