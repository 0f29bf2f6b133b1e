//! Azure cloud environments
//!
//! Each environment fixes the ARM endpoint, the login endpoint, the token
//! audience and the API versions used per resource provider. Azure Stack Hub
//! endpoints are discovered from the ARM metadata document.

use crate::error::AzureError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Named Azure cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloudName {
    /// Azure public cloud
    #[default]
    AzurePublicCloud,
    /// Azure US Government
    AzureUSGovernmentCloud,
    /// Azure China (21Vianet)
    AzureChinaCloud,
    /// Azure Stack Hub (customer-operated)
    AzureStackCloud,
}

impl FromStr for CloudName {
    type Err = AzureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "azurepubliccloud" => Ok(CloudName::AzurePublicCloud),
            "azureusgovernmentcloud" => Ok(CloudName::AzureUSGovernmentCloud),
            "azurechinacloud" => Ok(CloudName::AzureChinaCloud),
            "azurestackcloud" => Ok(CloudName::AzureStackCloud),
            other => Err(AzureError::InvalidRequest(format!("unknown Azure environment {other:?}"))),
        }
    }
}

impl fmt::Display for CloudName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloudName::AzurePublicCloud => "AzurePublicCloud",
            CloudName::AzureUSGovernmentCloud => "AzureUSGovernmentCloud",
            CloudName::AzureChinaCloud => "AzureChinaCloud",
            CloudName::AzureStackCloud => "AzureStackCloud",
        };
        f.write_str(name)
    }
}

/// API versions per resource provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiProfile {
    /// Microsoft.Compute (VMs, availability sets, extensions)
    pub compute: &'static str,
    /// Microsoft.Compute/disks
    pub disks: &'static str,
    /// Microsoft.Compute/skus
    pub skus: &'static str,
    /// Microsoft.Network
    pub network: &'static str,
    /// Microsoft.Resources (groups, tags)
    pub resources: &'static str,
}

impl ApiProfile {
    /// Latest API versions used against public and sovereign clouds
    pub const LATEST: ApiProfile = ApiProfile {
        compute: "2024-03-01",
        disks: "2023-04-02",
        skus: "2021-07-01",
        network: "2023-09-01",
        resources: "2021-04-01",
    };

    /// Azure Stack Hub 2020-09-01-hybrid profile
    pub const HYBRID: ApiProfile = ApiProfile {
        compute: "2020-06-01",
        disks: "2019-07-01",
        skus: "2017-09-01",
        network: "2018-11-01",
        resources: "2019-10-01",
    };
}

/// Resolved cloud environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Cloud name
    pub name: CloudName,
    /// ARM endpoint, without trailing slash
    pub resource_manager_endpoint: String,
    /// Login (AAD or ADFS) endpoint, without trailing slash
    pub active_directory_endpoint: String,
    /// Token audience for ARM
    pub token_audience: String,
    /// API versions
    pub profile: ApiProfile,
}

/// Subset of `{arm}/metadata/endpoints` used for discovery
#[derive(Debug, Deserialize)]
struct StackMetadata {
    authentication: StackAuthentication,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackAuthentication {
    login_endpoint: String,
    #[serde(default)]
    audiences: Vec<String>,
}

impl Environment {
    /// Azure public cloud
    pub fn public() -> Self {
        Self::fixed(
            CloudName::AzurePublicCloud,
            "https://management.azure.com",
            "https://login.microsoftonline.com",
        )
    }

    /// Azure US Government
    pub fn us_government() -> Self {
        Self::fixed(
            CloudName::AzureUSGovernmentCloud,
            "https://management.usgovcloudapi.net",
            "https://login.microsoftonline.us",
        )
    }

    /// Azure China
    pub fn china() -> Self {
        Self::fixed(
            CloudName::AzureChinaCloud,
            "https://management.chinacloudapi.cn",
            "https://login.chinacloudapi.cn",
        )
    }

    fn fixed(name: CloudName, arm: &str, login: &str) -> Self {
        Self {
            name,
            resource_manager_endpoint: arm.to_string(),
            active_directory_endpoint: login.to_string(),
            token_audience: format!("{arm}/"),
            profile: ApiProfile::LATEST,
        }
    }

    /// Resolve an environment by name.
    ///
    /// Azure Stack Hub needs `resource_manager_endpoint` and performs a
    /// metadata request; the other clouds are static.
    pub async fn resolve(
        http: &reqwest::Client,
        name: CloudName,
        resource_manager_endpoint: Option<&str>,
    ) -> Result<Self, AzureError> {
        match name {
            CloudName::AzurePublicCloud => Ok(Self::public()),
            CloudName::AzureUSGovernmentCloud => Ok(Self::us_government()),
            CloudName::AzureChinaCloud => Ok(Self::china()),
            CloudName::AzureStackCloud => {
                let endpoint = resource_manager_endpoint.filter(|e| !e.is_empty()).ok_or_else(|| {
                    AzureError::InvalidRequest(
                        "AzureStackCloud requires azure_resourcemanager_endpoint".to_string(),
                    )
                })?;
                Self::discover_stack(http, endpoint).await
            }
        }
    }

    /// Discover Azure Stack Hub endpoints from `{endpoint}/metadata/endpoints`
    pub async fn discover_stack(http: &reqwest::Client, endpoint: &str) -> Result<Self, AzureError> {
        let endpoint = endpoint.trim_end_matches('/');
        let url = format!("{endpoint}/metadata/endpoints?api-version=2015-01-01");
        debug!("Discovering Azure Stack Hub endpoints from {}", url);

        let response = http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AzureError::Api {
                status: status.as_u16(),
                code: "MetadataDiscoveryFailed".to_string(),
                message: body,
            });
        }
        let metadata: StackMetadata = serde_json::from_str(&response.text().await?)?;
        Ok(Self::from_stack_metadata(endpoint, metadata))
    }

    fn from_stack_metadata(endpoint: &str, metadata: StackMetadata) -> Self {
        let login = metadata.authentication.login_endpoint.trim_end_matches('/');
        // ADFS is addressed as tenant "adfs" under the bare login host
        let login = login.strip_suffix("/adfs").unwrap_or(login).to_string();
        let audience = metadata
            .authentication
            .audiences
            .into_iter()
            .next()
            .unwrap_or_else(|| format!("{endpoint}/"));
        Self {
            name: CloudName::AzureStackCloud,
            resource_manager_endpoint: endpoint.to_string(),
            active_directory_endpoint: login,
            token_audience: audience,
            profile: ApiProfile::HYBRID,
        }
    }

    /// Whether this is the Azure Stack Hub profile
    pub fn is_stack_hub(&self) -> bool {
        self.name == CloudName::AzureStackCloud
    }

    /// OAuth2 scope requested for ARM tokens
    pub fn token_scope(&self) -> String {
        format!("{}/.default", self.token_audience.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_name_parsing() {
        assert_eq!("".parse::<CloudName>().unwrap(), CloudName::AzurePublicCloud);
        assert_eq!("AzureStackCloud".parse::<CloudName>().unwrap(), CloudName::AzureStackCloud);
        assert_eq!("azurechinacloud".parse::<CloudName>().unwrap(), CloudName::AzureChinaCloud);
        assert!("Mars".parse::<CloudName>().is_err());
    }

    #[test]
    fn test_public_cloud_scope() {
        let env = Environment::public();
        assert_eq!(env.token_scope(), "https://management.azure.com/.default");
        assert!(!env.is_stack_hub());
        assert_eq!(env.profile, ApiProfile::LATEST);
    }

    #[test]
    fn test_stack_metadata_selects_hybrid_profile() {
        let metadata: StackMetadata = serde_json::from_value(serde_json::json!({
            "galleryEndpoint": "https://gallery.local",
            "authentication": {
                "loginEndpoint": "https://adfs.local/adfs/",
                "audiences": ["https://management.adfs.local/abc"]
            }
        }))
        .unwrap();
        let env = Environment::from_stack_metadata("https://management.local", metadata);
        assert!(env.is_stack_hub());
        assert_eq!(env.active_directory_endpoint, "https://adfs.local");
        assert_eq!(env.token_audience, "https://management.adfs.local/abc");
        assert_eq!(env.profile, ApiProfile::HYBRID);
    }

    #[tokio::test]
    async fn test_stack_cloud_requires_endpoint() {
        let http = reqwest::Client::new();
        let result = Environment::resolve(&http, CloudName::AzureStackCloud, None).await;
        assert!(matches!(result, Err(AzureError::InvalidRequest(_))));
    }
}
