//! Integration tests for the ARM client
//!
//! These tests require an Azure subscription.
//! Set AZURE_TENANT_ID, AZURE_CLIENT_ID, AZURE_CLIENT_SECRET and
//! AZURE_SUBSCRIPTION_ID environment variables to run.

use azure_client::{ArmClient, AzureClientTrait, ClientCredential, Environment, ServicePrincipal, resource_id};

fn client_from_env() -> anyhow::Result<ArmClient> {
    let principal = ServicePrincipal {
        tenant_id: std::env::var("AZURE_TENANT_ID")?,
        client_id: std::env::var("AZURE_CLIENT_ID")?,
        credential: ClientCredential::Secret(std::env::var("AZURE_CLIENT_SECRET")?),
    };
    let subscription = std::env::var("AZURE_SUBSCRIPTION_ID")?;
    Ok(ArmClient::new(Environment::public(), principal, subscription)?)
}

#[tokio::test]
#[ignore] // Requires Azure credentials
async fn test_list_skus() -> anyhow::Result<()> {
    let client = client_from_env()?;
    let location = std::env::var("AZURE_LOCATION").unwrap_or_else(|_| "eastus".to_string());

    let skus = client.list_resource_skus(&location, "2021-07-01").await?;
    assert!(!skus.is_empty(), "expected SKUs in {location}");
    println!("Found {} SKUs in {}", skus.len(), location);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_missing_resource_group_is_not_found() -> anyhow::Result<()> {
    let client = client_from_env()?;
    let id = resource_id::resource_group_id(client.subscription_id(), "does-not-exist-machine-api-test");

    let err = client
        .get(&id, "2021-04-01", None)
        .await
        .expect_err("resource group should not exist");
    assert!(err.is_not_found(), "unexpected error: {err}");
    Ok(())
}
