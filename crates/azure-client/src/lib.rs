//! Azure Resource Manager REST Client
//!
//! A small client for the Azure Resource Manager API as used by the Machine API
//! Azure provider. Resources are addressed by ARM resource ID and carried as raw
//! JSON; long-running operations are returned as pollable handles.
//!
//! # Example
//!
//! ```no_run
//! use azure_client::{ArmClient, AzureClientTrait, ClientCredential, Environment, ServicePrincipal};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let principal = ServicePrincipal {
//!     tenant_id: "tenant".to_string(),
//!     client_id: "client".to_string(),
//!     credential: ClientCredential::Secret("secret".to_string()),
//! };
//! let client = ArmClient::new(Environment::public(), principal, "subscription".to_string())?;
//!
//! // List the VM sizes offered in a region
//! let skus = client.list_resource_skus("eastus", "2021-07-01").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Long-running operations**: `Azure-AsyncOperation` and `Location` polling
//! - **Clouds**: public, US Government, China and Azure Stack Hub (endpoint discovery)
//! - **Authentication**: client secret or workload-identity federated token
//! - **Pagination**: `nextLink` following for SKU listings

pub mod auth;
#[path = "trait.rs"]
pub mod azure_trait;
pub mod client;
pub mod environment;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod models;
pub mod resource_id;

pub use auth::{ClientCredential, FEDERATED_TOKEN_FILE_ENV, ServicePrincipal, TokenProvider};
pub use azure_trait::AzureClientTrait;
pub use client::ArmClient;
pub use environment::{ApiProfile, CloudName, Environment};
pub use error::AzureError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{InjectedFailure, MockAzureClient, MockVerb, Mutation, vm_sku};
pub use models::*;
