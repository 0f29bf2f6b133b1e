//! Main controller implementation.
//!
//! Builds the shared [`Reconciler`] from its Kubernetes and Azure backends and
//! runs the Machine and MachineSet watchers until one of them stops.

use crate::credentials::{ArmClientFactory, KubeSecretReader};
use crate::error::ControllerError;
use crate::events::{CONTROLLER_NAME, KubeEventPublisher};
use crate::features::FeatureGates;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::scope::ScopeFactory;
use crate::skus::SkuCache;
use crate::store::{KubeStore, MachineStore};
use crate::watcher::Watcher;
use crds::{Machine, MachineSet};
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Settings taken from the command line
#[derive(Debug, Clone)]
pub struct Settings {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Concurrent reconciles per watched kind
    pub max_concurrent_reconciles: u16,
    /// Enabled feature gates
    pub features: FeatureGates,
    /// SKU catalogue lifetime
    pub sku_cache_ttl: Duration,
    /// Async-operation poll interval
    pub poll_interval: Duration,
}

/// Running Machine and MachineSet watchers.
#[derive(Debug)]
pub struct Controller {
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
    machine_set_watcher: JoinHandle<Result<(), ControllerError>>,
    shutdown: CancellationToken,
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

impl Controller {
    /// Build the reconciler and start both watchers.
    pub fn start(
        client: Client,
        settings: &Settings,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
    ) -> Result<Self, ControllerError> {
        info!(
            namespace = settings.namespace.as_deref().unwrap_or("<all>"),
            concurrency = settings.max_concurrent_reconciles,
            features = ?settings.features,
            "Initializing Machine controller"
        );

        let store = Arc::new(KubeStore::new(client.clone()));
        let scopes = ScopeFactory {
            secrets: Arc::new(KubeSecretReader::new(client.clone())),
            clients: Arc::new(ArmClientFactory::new(settings.features.azure_workload_identity)?),
            store: Arc::clone(&store) as Arc<dyn MachineStore>,
            poll_interval: settings.poll_interval,
        };
        let reconciler = Arc::new(Reconciler::new(
            scopes,
            store,
            Arc::new(SkuCache::new(settings.sku_cache_ttl)),
            Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
            metrics,
            settings.features,
            shutdown.clone(),
        ));

        let namespace = settings.namespace.as_deref();
        let watcher = Arc::new(Watcher::new(
            reconciler,
            api::<Machine>(&client, namespace),
            api::<MachineSet>(&client, namespace),
            settings.max_concurrent_reconciles,
            shutdown.clone(),
        ));

        let machine_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_machines().await })
        };
        let machine_set_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_machine_sets().await })
        };

        Ok(Self {
            machine_watcher,
            machine_set_watcher,
            shutdown,
        })
    }

    /// Wait for the watchers. Either one stopping stops the other.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        let first = tokio::select! {
            result = &mut self.machine_watcher => ("Machine", result),
            result = &mut self.machine_set_watcher => ("MachineSet", result),
        };
        self.shutdown.cancel();

        let (other_name, other) = if first.0 == "Machine" {
            ("MachineSet", self.machine_set_watcher)
        } else {
            ("Machine", self.machine_watcher)
        };
        let second = (other_name, other.await);

        for (name, result) in [first, second] {
            result
                .map_err(|e| ControllerError::Watch(format!("{name} watcher panicked: {e}")))?
                .map_err(|e| ControllerError::Watch(format!("{name} watcher error: {e}")))?;
        }
        info!("Machine controller stopped");
        Ok(())
    }
}
