//! OAuth2 token acquisition for ARM
//!
//! Supports the client-credentials grant with either a client secret or a
//! federated (workload identity) token read from disk. Tokens are cached and
//! refreshed five minutes before expiry.

use crate::environment::Environment;
use crate::error::AzureError;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

/// Environment variable naming the projected service-account token file
pub const FEDERATED_TOKEN_FILE_ENV: &str = "AZURE_FEDERATED_TOKEN_FILE";

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// How the service principal proves its identity
#[derive(Clone)]
pub enum ClientCredential {
    /// Shared client secret
    Secret(String),
    /// Federated token file (workload identity)
    FederatedTokenFile(PathBuf),
}

impl std::fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientCredential::Secret(_) => f.write_str("Secret(<redacted>)"),
            ClientCredential::FederatedTokenFile(path) => f.debug_tuple("FederatedTokenFile").field(path).finish(),
        }
    }
}

/// Service principal used to talk to ARM
#[derive(Debug, Clone)]
pub struct ServicePrincipal {
    /// AAD tenant ID
    pub tenant_id: String,
    /// Application (client) ID
    pub client_id: String,
    /// Proof of identity
    pub credential: ClientCredential,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Caching token provider
#[derive(Debug)]
pub struct TokenProvider {
    http: reqwest::Client,
    token_url: String,
    scope: String,
    principal: ServicePrincipal,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Create a provider for `environment`
    pub fn new(http: reqwest::Client, environment: &Environment, principal: ServicePrincipal) -> Self {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            environment.active_directory_endpoint, principal.tenant_id
        );
        Self {
            http,
            token_url,
            scope: environment.token_scope(),
            principal,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid bearer token, acquiring a new one when needed
    pub async fn token(&self) -> Result<String, AzureError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at - Duration::minutes(5) > Utc::now()) {
            return Ok(token.value.clone());
        }

        let fresh = self.acquire().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn acquire(&self) -> Result<CachedToken, AzureError> {
        debug!("Acquiring ARM token for client {}", self.principal.client_id);
        let body = self.form_body().await?;

        let response = self
            .http
            .post(&self.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AzureError::Authentication(format!(
                "token request failed: {} - {}",
                status,
                text.chars().take(500).collect::<String>()
            )));
        }

        let token: TokenResponse = serde_json::from_str(&text)?;
        let lifetime = parse_expires_in(token.expires_in.as_ref()).unwrap_or(3600);
        Ok(CachedToken {
            value: token.access_token,
            expires_at: Utc::now() + Duration::seconds(lifetime),
        })
    }

    async fn form_body(&self) -> Result<String, AzureError> {
        let mut pairs: Vec<(&str, String)> = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.principal.client_id.clone()),
            ("scope", self.scope.clone()),
        ];
        match &self.principal.credential {
            ClientCredential::Secret(secret) => pairs.push(("client_secret", secret.clone())),
            ClientCredential::FederatedTokenFile(path) => {
                let assertion = tokio::fs::read_to_string(path).await.map_err(|e| {
                    AzureError::Authentication(format!("failed to read federated token {}: {e}", path.display()))
                })?;
                pairs.push(("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()));
                pairs.push(("client_assertion", assertion.trim().to_string()));
            }
        }
        Ok(encode_form(&pairs))
    }
}

fn encode_form(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// `expires_in` is a number on AAD and a string on ADFS
fn parse_expires_in(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_form_escapes_values() {
        let body = encode_form(&[
            ("scope", "https://management.azure.com/.default".to_string()),
            ("client_secret", "a&b=c".to_string()),
        ]);
        assert_eq!(
            body,
            "scope=https%3A%2F%2Fmanagement.azure.com%2F.default&client_secret=a%26b%3Dc"
        );
    }

    #[test]
    fn test_parse_expires_in_accepts_number_and_string() {
        assert_eq!(parse_expires_in(Some(&json!(3599))), Some(3599));
        assert_eq!(parse_expires_in(Some(&json!("1800"))), Some(1800));
        assert_eq!(parse_expires_in(None), None);
    }

    #[test]
    fn test_secret_is_redacted_in_debug_output() {
        let credential = ClientCredential::Secret("hunter2".to_string());
        assert!(!format!("{credential:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_federated_token_is_read_from_file() {
        let dir = std::env::temp_dir().join(format!("azure-client-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("token");
        tokio::fs::write(&path, "eyJhbGciOi.jwt\n").await.unwrap();

        let provider = TokenProvider::new(
            reqwest::Client::new(),
            &Environment::public(),
            ServicePrincipal {
                tenant_id: "tenant".to_string(),
                client_id: "client".to_string(),
                credential: ClientCredential::FederatedTokenFile(path),
            },
        );
        let body = provider.form_body().await.unwrap();
        assert!(body.contains("client_assertion=eyJhbGciOi.jwt&") || body.ends_with("client_assertion=eyJhbGciOi.jwt"));
        assert!(body.contains("client_assertion_type=urn%3Aietf"));
        assert!(provider.token_url.ends_with("/tenant/oauth2/v2.0/token"));
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
