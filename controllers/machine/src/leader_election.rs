//! Leader election using Kubernetes Leases
//!
//! Only the replica holding the `coordination.k8s.io/v1` Lease runs the
//! watchers. Writes carry the Lease's resourceVersion, so two replicas racing
//! for an expired Lease cannot both win: the loser gets a 409 and retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::Client;
use kube::api::{Api, PostParams};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lease held by the active controller-manager
pub const LEADER_LEASE_NAME: &str = "cluster-api-provider-azure-leader";

/// Lease timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTimings {
    /// How long a Lease stays valid without renewal
    pub lease_duration: Duration,
    /// How often the leader renews
    pub renew_interval: Duration,
    /// How often a follower retries
    pub retry_interval: Duration,
}

impl Default for LeaseTimings {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(120),
            renew_interval: Duration::from_secs(110),
            retry_interval: Duration::from_secs(20),
        }
    }
}

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    /// Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The Lease has no resourceVersion to compare against
    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),

    /// Shutdown was requested before leadership was acquired
    #[error("shutdown requested while waiting for leadership")]
    Cancelled,
}

fn is_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == code)
}

/// Whether a Lease renewed at `renew_time` for `duration_secs` has lapsed at `now`
fn lease_expired(
    renew_time: Option<&MicroTime>,
    duration_secs: Option<i32>,
    now: chrono::DateTime<Utc>,
) -> bool {
    match (renew_time, duration_secs) {
        (Some(renewed), Some(duration)) => now > renewed.0 + chrono::Duration::seconds(i64::from(duration)),
        _ => true,
    }
}

/// Leader elector using Kubernetes Leases
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    timings: LeaseTimings,
    is_leader: Arc<AtomicBool>,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("lease_name", &self.lease_name)
            .field("namespace", &self.namespace)
            .field("identity", &self.identity)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    /// Create a leader elector
    pub fn new(client: Client, namespace: &str, identity: &str, timings: LeaseTimings) -> Self {
        Self {
            client,
            lease_name: LEADER_LEASE_NAME.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            timings,
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether this replica currently leads
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Block until leadership is acquired or `shutdown` fires
    pub async fn acquire(self: Arc<Self>, shutdown: &CancellationToken) -> Result<LeaderGuard, LeaderElectionError> {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            namespace = %self.namespace,
            "Waiting for leadership"
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    self.is_leader.store(true, Ordering::SeqCst);
                    return Ok(self.create_guard());
                }
                Ok(false) => {
                    debug!(identity = %self.identity, "Lease held by another replica");
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Failed to acquire lease, retrying");
                }
            }
            tokio::select! {
                () = shutdown.cancelled() => return Err(LeaderElectionError::Cancelled),
                () = tokio::time::sleep(self.timings.retry_interval) => {}
            }
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let lease = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(e) if is_status(&e, 404) => return self.create_lease(&api, now).await,
            Err(e) => return Err(e.into()),
        };

        let spec = lease.spec.as_ref();
        if spec.and_then(|s| s.holder_identity.as_deref()) == Some(self.identity.as_str()) {
            return self.renew_lease(&api, &lease, now).await;
        }

        let expired = lease_expired(
            spec.and_then(|s| s.renew_time.as_ref()),
            spec.and_then(|s| s.lease_duration_seconds),
            now,
        );
        if !expired {
            return Ok(false);
        }
        let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);
        self.take_over_lease(&api, lease.metadata.resource_version.clone(), now, transitions)
            .await
    }

    fn lease_spec(&self, now: chrono::DateTime<Utc>, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(i32::try_from(self.timings.lease_duration.as_secs()).unwrap_or(i32::MAX)),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    async fn create_lease(&self, api: &Api<Lease>, now: chrono::DateTime<Utc>) -> Result<bool, LeaderElectionError> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, 0)),
        };

        match api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(identity = %self.identity, "Created lease");
                Ok(true)
            }
            Err(e) if is_status(&e, 409) => {
                debug!(identity = %self.identity, "Lease creation conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renew_lease(
        &self,
        api: &Api<Lease>,
        existing: &Lease,
        now: chrono::DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        if existing.metadata.resource_version.is_none() {
            return Err(LeaderElectionError::MissingResourceVersion(self.lease_name.clone()));
        }
        let mut updated = existing.clone();
        if let Some(spec) = updated.spec.as_mut() {
            spec.renew_time = Some(MicroTime(now));
        }

        match api.replace(&self.lease_name, &PostParams::default(), &updated).await {
            Ok(_) => {
                debug!(identity = %self.identity, "Lease renewed");
                Ok(true)
            }
            Err(e) if is_status(&e, 409) => {
                warn!(identity = %self.identity, "Lease renewal conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn take_over_lease(
        &self,
        api: &Api<Lease>,
        resource_version: Option<String>,
        now: chrono::DateTime<Utc>,
        transitions: i32,
    ) -> Result<bool, LeaderElectionError> {
        let resource_version =
            resource_version.ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))?;
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: Some(resource_version),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, transitions + 1)),
        };

        match api.replace(&self.lease_name, &PostParams::default(), &lease).await {
            Ok(_) => {
                info!(identity = %self.identity, transitions = transitions + 1, "Took over expired lease");
                Ok(true)
            }
            Err(e) if is_status(&e, 409) => {
                debug!(identity = %self.identity, "Lease takeover conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(self.timings.renew_interval).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(identity = %self.identity, "Leadership lost");
                    break;
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Leadership lost");
                    break;
                }
            }
        }
        self.is_leader.store(false, Ordering::SeqCst);
        let _ = lost_tx.send(());
    }
}

/// Guard that maintains leadership until dropped
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl std::fmt::Debug for LeaderGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderGuard")
            .field("elector", &self.elector)
            .finish_non_exhaustive()
    }
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.elector.is_leader.store(false, Ordering::SeqCst);
        self.renewal_task.abort();
        info!(identity = %self.elector.identity, "Leadership released");
    }
}
