//! Prometheus metrics
//!
//! - `mapi_machine_create_failed_total{namespace,reason}`
//! - `mapi_instance_create_duration_seconds{namespace}`
//! - `mapi_machine_items`: Machines this controller currently manages

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Buckets of the create-duration histogram, in seconds
const CREATE_DURATION_BUCKETS: &[f64] = &[5.0, 15.0, 30.0, 60.0, 120.0, 180.0, 300.0, 600.0, 900.0];

/// Controller metrics, registered in a private registry
pub struct Metrics {
    registry: Registry,
    create_failed: IntCounterVec,
    create_duration: HistogramVec,
    machine_items: IntGauge,
    machines: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("machine_items", &self.machine_items.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register every metric
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let create_failed = IntCounterVec::new(
            Opts::new("mapi_machine_create_failed_total", "Machine create failures"),
            &["namespace", "reason"],
        )?;
        let create_duration = HistogramVec::new(
            HistogramOpts::new(
                "mapi_instance_create_duration_seconds",
                "Time to create the VM and its dependent resources",
            )
            .buckets(CREATE_DURATION_BUCKETS.to_vec()),
            &["namespace"],
        )?;
        let machine_items = IntGauge::new("mapi_machine_items", "Machines managed by the controller")?;

        registry.register(Box::new(create_failed.clone()))?;
        registry.register(Box::new(create_duration.clone()))?;
        registry.register(Box::new(machine_items.clone()))?;

        Ok(Self {
            registry,
            create_failed,
            create_duration,
            machine_items,
            machines: Mutex::new(HashSet::new()),
        })
    }

    /// Count a failed create
    pub fn record_create_failure(&self, namespace: &str, reason: &str) {
        self.create_failed.with_label_values(&[namespace, reason]).inc();
    }

    /// Observe a successful create
    pub fn observe_create_duration(&self, namespace: &str, elapsed: Duration) {
        self.create_duration
            .with_label_values(&[namespace])
            .observe(elapsed.as_secs_f64());
    }

    /// Track a Machine as managed
    pub fn machine_seen(&self, key: &str) {
        let mut machines = self.machines.lock().unwrap_or_else(PoisonError::into_inner);
        if machines.insert(key.to_string()) {
            self.machine_items.set(i64::try_from(machines.len()).unwrap_or(i64::MAX));
        }
    }

    /// Stop tracking a Machine
    pub fn machine_gone(&self, key: &str) {
        let mut machines = self.machines.lock().unwrap_or_else(PoisonError::into_inner);
        if machines.remove(key) {
            self.machine_items.set(i64::try_from(machines.len()).unwrap_or(i64::MAX));
        }
    }

    /// Create failures recorded for `namespace` and `reason`
    pub fn create_failures(&self, namespace: &str, reason: &str) -> u64 {
        self.create_failed.with_label_values(&[namespace, reason]).get()
    }

    /// Text exposition of every metric
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposition_contains_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.record_create_failure("openshift-machine-api", "InvalidConfiguration");
        metrics.observe_create_duration("openshift-machine-api", Duration::from_secs(42));
        metrics.machine_seen("openshift-machine-api/worker-0");

        let text = metrics.encode().unwrap();
        assert!(text.contains(
            "mapi_machine_create_failed_total{namespace=\"openshift-machine-api\",reason=\"InvalidConfiguration\"} 1"
        ));
        assert!(text.contains("mapi_instance_create_duration_seconds_count{namespace=\"openshift-machine-api\"} 1"));
        assert!(text.contains("mapi_machine_items 1"));
    }

    #[test]
    fn test_machine_items_tracks_distinct_keys() {
        let metrics = Metrics::new().unwrap();
        metrics.machine_seen("ns/a");
        metrics.machine_seen("ns/a");
        metrics.machine_seen("ns/b");
        assert_eq!(metrics.machine_items.get(), 2);
        metrics.machine_gone("ns/a");
        metrics.machine_gone("ns/missing");
        assert_eq!(metrics.machine_items.get(), 1);
    }
}
