//! Termination Handler
//!
//! Runs on every Azure spot node. When the instance metadata service
//! schedules a `Preempt` or `Terminate` event for the node, the node's
//! Machine gets a `Terminated` condition and is deleted so the MachineSet
//! replaces it before the VM disappears.

mod error;
mod handler;
mod metadata;

use crate::handler::{Handler, KubeMachineApi, Outcome};
use crate::metadata::ImdsClient;
use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "termination-handler", version, about = "Deletes Machines of Azure nodes scheduled for termination")]
struct Args {
    /// Seconds between metadata polls
    #[arg(long, default_value_t = 5)]
    poll_interval_seconds: i64,

    /// Node to watch
    #[arg(long, env = "NODE_NAME")]
    node_name: String,

    /// Namespace of the node's Machine when its annotation has none
    #[arg(long, default_value = "openshift-machine-api")]
    namespace: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();
    let poll_interval = u64::try_from(args.poll_interval_seconds)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .context("--poll-interval-seconds must be positive")?;
    info!(node = %args.node_name, "Starting termination handler");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    let client = Client::try_default().await.context("failed to create Kubernetes client")?;
    let handler = Handler::new(
        Arc::new(ImdsClient::new()?),
        Arc::new(KubeMachineApi::new(client)),
        &args.node_name,
        &args.namespace,
        poll_interval,
    );

    match handler.run(&shutdown).await? {
        Outcome::Terminated { machine } => info!("Machine {} marked for deletion", machine),
        Outcome::Shutdown => info!("Termination handler stopped"),
    }
    Ok(())
}
