//! Kubernetes resource watchers.
//!
//! Both watchers share the generic `watch_resource()` helper, which runs a
//! `kube_runtime::Controller` until the shutdown token is cancelled.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{Machine, MachineSet};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Boxed reconcile future
type ReconcileFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Action, ControllerError>> + Send>>;

/// Run a controller for `K` until `shutdown` fires.
///
/// Failed reconciles are requeued through [`Reconciler::error_action`], so
/// every object keeps its own backoff ladder.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
    concurrency: u16,
    shutdown: CancellationToken,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any());
        ctx.error_action(&key, error)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            debug!("Reconciling {} {}", resource_name, obj.name_any());
            match reconcile_fn(ctx, Arc::clone(&obj)).await {
                Ok(action) => Ok(action),
                Err(e) => {
                    error!("Reconciliation failed for {} {}: {}", resource_name, obj.name_any(), e);
                    Err(e)
                }
            }
        }
    };

    // Debounce batches the status writes of our own reconciles
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(concurrency);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", resource_name, obj.name),
                Err(e) => debug!("Controller error for {}: {}", resource_name, e),
            }
        })
        .await;

    info!("{} watcher stopped", resource_name);
    Ok(())
}

/// Watches Machines and MachineSets.
#[derive(Clone)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    machine_api: Api<Machine>,
    machine_set_api: Api<MachineSet>,
    concurrency: u16,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        machine_api: Api<Machine>,
        machine_set_api: Api<MachineSet>,
        concurrency: u16,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            machine_api,
            machine_set_api,
            concurrency,
            shutdown,
        }
    }

    /// Watches Machine resources.
    pub async fn watch_machines(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.machine_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_machine(&resource).await }),
            "Machine",
            self.concurrency,
            self.shutdown.clone(),
        )
        .await
    }

    /// Watches MachineSet resources.
    pub async fn watch_machine_sets(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.machine_set_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_machine_set(&resource).await }),
            "MachineSet",
            self.concurrency,
            self.shutdown.clone(),
        )
        .await
    }
}
