//! Machine Controller for Azure
//!
//! Reconciles Machine API objects against Azure Resource Manager:
//! - Machine: creates, converges and deletes the VM and its NIC, public IP,
//!   disks and availability set
//! - MachineSet: annotates vCPU, memory and GPU capacity for the autoscaler

mod actuator;
mod backoff;
mod controller;
mod credentials;
mod decode;
mod error;
mod events;
mod features;
mod health;
mod leader_election;
mod machineset;
mod metrics;
mod naming;
mod reconcile_helpers;
mod reconciler;
mod scope;
mod services;
mod skus;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::controller::{Controller, Settings};
use crate::features::FeatureGates;
use crate::health::{Readiness, parse_bind_address};
use crate::leader_election::{LeaderElectionError, LeaderElector, LeaseTimings};
use crate::metrics::Metrics;
use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Default namespace of the leader Lease
const DEFAULT_LEASE_NAMESPACE: &str = "openshift-machine-api";

#[derive(Debug, Parser)]
#[command(name = "machine-controller", version, about = "Machine API controller for Azure")]
struct Args {
    /// Namespace to watch; all namespaces when empty
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Address of the health probe endpoints
    #[arg(long, default_value = ":9440")]
    health_addr: String,

    /// Address of the metrics endpoint
    #[arg(long, default_value = ":8081")]
    metrics_bind_address: String,

    /// Elect a leader before reconciling
    #[arg(long, default_value_t = false)]
    leader_elect: bool,

    /// Namespace of the leader Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_LEASE_NAMESPACE)]
    leader_elect_resource_namespace: String,

    /// Lease duration in seconds
    #[arg(long, default_value_t = 120)]
    leader_elect_lease_duration: u64,

    /// Renew interval in seconds
    #[arg(long, default_value_t = 110)]
    leader_elect_renew_deadline: u64,

    /// Retry interval in seconds
    #[arg(long, default_value_t = 20)]
    leader_elect_retry_period: u64,

    /// Concurrent reconciles per watched kind
    #[arg(long, default_value_t = 1)]
    max_concurrent_reconciles: u16,

    /// Comma-separated `Gate=bool` pairs
    #[arg(long, default_value = "")]
    feature_gates: String,

    /// Lifetime of a region's SKU catalogue in seconds
    #[arg(long, default_value_t = 86400)]
    sku_cache_ttl_seconds: u64,

    /// Poll interval of long-running Azure operations in seconds
    #[arg(long, default_value_t = 30)]
    poll_interval_seconds: u64,

    /// Leader identity
    #[arg(long, env = "POD_NAME")]
    pod_name: Option<String>,
}

/// Cancel `shutdown` on SIGINT or SIGTERM
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            () = terminate => info!("Received SIGTERM"),
        }
        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();
    info!("Starting Machine controller for Azure");

    let features = FeatureGates::parse(&args.feature_gates).context("invalid --feature-gates")?;
    let health_addr = parse_bind_address(&args.health_addr)?;
    let metrics_addr = parse_bind_address(&args.metrics_bind_address)?;
    let settings = Settings {
        namespace: args.namespace.clone().filter(|ns| !ns.is_empty()),
        max_concurrent_reconciles: args.max_concurrent_reconciles.max(1),
        features,
        sku_cache_ttl: Duration::from_secs(args.sku_cache_ttl_seconds),
        poll_interval: Duration::from_secs(args.poll_interval_seconds),
    };

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
    let readiness = Readiness::default();
    tokio::spawn(health::serve(
        "health probes",
        health_addr,
        health::health_routes(readiness.clone()),
        shutdown.clone(),
    ));
    tokio::spawn(health::serve(
        "metrics",
        metrics_addr,
        health::metrics_routes(Arc::clone(&metrics)),
        shutdown.clone(),
    ));

    let client = Client::try_default().await.context("failed to create Kubernetes client")?;

    let mut guard = None;
    if args.leader_elect {
        let identity = args
            .pod_name
            .clone()
            .unwrap_or_else(|| format!("machine-controller-{}", uuid::Uuid::new_v4()));
        let timings = LeaseTimings {
            lease_duration: Duration::from_secs(args.leader_elect_lease_duration),
            renew_interval: Duration::from_secs(args.leader_elect_renew_deadline),
            retry_interval: Duration::from_secs(args.leader_elect_retry_period),
        };
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            &args.leader_elect_resource_namespace,
            &identity,
            timings,
        ));
        match elector.acquire(&shutdown).await {
            Ok(g) => guard = Some(g),
            Err(LeaderElectionError::Cancelled) => {
                info!("Shut down before acquiring leadership");
                return Ok(());
            }
            Err(e) => return Err(e).context("leader election failed"),
        }
    }

    let controller = Controller::start(client, &settings, metrics, shutdown.clone())?;
    readiness.set_ready();

    match guard.as_mut() {
        Some(guard) => {
            let lost = tokio::select! {
                result = controller.run() => {
                    result?;
                    false
                }
                () = guard.lost() => true,
            };
            if lost {
                shutdown.cancel();
                anyhow::bail!("leadership lost");
            }
        }
        None => controller.run().await?,
    }

    info!("Machine controller exited");
    Ok(())
}
