//! Region-keyed cache of Azure resource SKUs
//!
//! The first lookup in a region lists every SKU offered there and keeps the
//! available ones until the TTL expires. Concurrent first lookups for the same
//! region wait on a per-region gate so only one of them issues the list call.

use azure_client::{AzureClientTrait, AzureError, ResourceSku};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// SKU resource type of virtual machine sizes
pub const VIRTUAL_MACHINES: &str = "virtualMachines";

/// Default catalogue lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// SKU lookup failures
#[derive(Debug, Error)]
pub enum SkuError {
    /// The region's catalogue does not offer the SKU
    #[error("SKU {name} not found in region {region}")]
    NotFound {
        /// SKU name
        name: String,
        /// Region
        region: String,
    },

    /// The catalogue could not be populated
    #[error("failed to list SKUs: {0}")]
    Azure(#[from] AzureError),
}

/// A SKU with its capabilities parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sku {
    /// SKU name (e.g. "Standard_D4s_v3")
    pub name: String,
    /// Resource type (e.g. "virtualMachines")
    pub resource_type: String,
    /// vCPU count
    pub vcpus: u32,
    /// Memory in MiB
    pub memory_mib: u64,
    /// GPU count
    pub gpus: u32,
    /// Accelerated networking support
    pub accelerated_networking: bool,
    /// Premium storage support
    pub premium_io: bool,
    /// Supported Hyper-V generations ("V1", "V2")
    pub hyperv_generations: BTreeSet<String>,
    /// Ultra SSD support
    pub ultra_ssd: bool,
    /// Zones the SKU is offered in for the catalogue's region
    pub zones: Vec<String>,
}

fn parse_or_zero<T: std::str::FromStr + Default>(sku: &ResourceSku, name: &str) -> T {
    let Some(raw) = sku.capability(name) else {
        return T::default();
    };
    raw.trim().parse().unwrap_or_else(|_| {
        debug!("SKU {} has unparsable capability {}={:?}", sku.name, name, raw);
        T::default()
    })
}

fn flag(sku: &ResourceSku, name: &str) -> bool {
    sku.capability(name).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

impl Sku {
    /// Parse the capabilities of an ARM SKU as offered in `region`
    pub fn from_resource(sku: &ResourceSku, region: &str) -> Self {
        let memory_gb: f64 = parse_or_zero(sku, "MemoryGB");
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "memory is non-negative and far below u64::MAX")]
        let memory_mib = (memory_gb * 1024.0).round().max(0.0) as u64;

        Self {
            name: sku.name.clone(),
            resource_type: sku.resource_type.clone(),
            vcpus: parse_or_zero(sku, "vCPUs"),
            memory_mib,
            gpus: parse_or_zero(sku, "GPUs"),
            accelerated_networking: flag(sku, "AcceleratedNetworkingEnabled"),
            premium_io: flag(sku, "PremiumIO"),
            hyperv_generations: sku
                .capability("HyperVGenerations")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|g| !g.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            ultra_ssd: flag(sku, "UltraSSDAvailable"),
            zones: sku.zones_in(region),
        }
    }
}

/// SKUs available in one region
#[derive(Debug)]
pub struct Catalogue {
    region: String,
    populated_at: Instant,
    skus: HashMap<(String, String), Sku>,
}

impl Catalogue {
    fn build(region: &str, skus: &[ResourceSku]) -> Self {
        let skus = skus
            .iter()
            .filter(|sku| sku.is_available_in(region))
            .map(|sku| {
                (
                    (sku.name.to_ascii_lowercase(), sku.resource_type.to_ascii_lowercase()),
                    Sku::from_resource(sku, region),
                )
            })
            .collect();
        Self {
            region: region.to_string(),
            populated_at: Instant::now(),
            skus,
        }
    }

    /// Look up a SKU by name and resource type (case-insensitive)
    pub fn find(&self, name: &str, resource_type: &str) -> Result<&Sku, SkuError> {
        self.skus
            .get(&(name.to_ascii_lowercase(), resource_type.to_ascii_lowercase()))
            .ok_or_else(|| SkuError::NotFound {
                name: name.to_string(),
                region: self.region.clone(),
            })
    }

    /// Number of available SKUs
    pub fn len(&self) -> usize {
        self.skus.len()
    }

    /// Whether the region offers nothing
    pub fn is_empty(&self) -> bool {
        self.skus.is_empty()
    }
}

/// Process-wide SKU cache
#[derive(Debug)]
pub struct SkuCache {
    ttl: Duration,
    catalogues: RwLock<HashMap<String, Arc<Catalogue>>>,
    gates: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SkuCache {
    /// Create an empty cache whose catalogues live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            catalogues: RwLock::new(HashMap::new()),
            gates: StdMutex::new(HashMap::new()),
        }
    }

    /// Look up a virtual machine size in `region`
    pub async fn vm_size(
        &self,
        client: &dyn AzureClientTrait,
        api_version: &str,
        region: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Sku, SkuError> {
        let catalogue = self.catalogue(client, api_version, region, cancel).await?;
        catalogue.find(name, VIRTUAL_MACHINES).cloned()
    }

    /// Catalogue of `region`, populating it if absent or expired.
    ///
    /// When a refresh of an expired catalogue fails the expired catalogue is
    /// served; an error is returned only if the region was never populated.
    pub async fn catalogue(
        &self,
        client: &dyn AzureClientTrait,
        api_version: &str,
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Catalogue>, SkuError> {
        let region = region.to_ascii_lowercase();
        if let Some(catalogue) = self.fresh(&region).await {
            return Ok(catalogue);
        }

        let gate = self.gate(&region);
        let _populating = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AzureError::Cancelled.into()),
            guard = gate.lock() => guard,
        };

        // Another caller may have populated the region while we waited
        if let Some(catalogue) = self.fresh(&region).await {
            return Ok(catalogue);
        }

        debug!("Listing SKUs in region {}", region);
        let listed = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AzureError::Cancelled),
            listed = client.list_resource_skus(&region, api_version) => listed,
        };

        match listed {
            Ok(skus) => {
                let catalogue = Arc::new(Catalogue::build(&region, &skus));
                info!("Cached {} SKUs for region {}", catalogue.len(), region);
                self.catalogues.write().await.insert(region, Arc::clone(&catalogue));
                Ok(catalogue)
            }
            Err(AzureError::Cancelled) => Err(AzureError::Cancelled.into()),
            Err(e) => match self.catalogues.read().await.get(&region) {
                Some(stale) => {
                    warn!("Failed to refresh SKUs for region {}, serving expired catalogue: {}", region, e);
                    Ok(Arc::clone(stale))
                }
                None => Err(e.into()),
            },
        }
    }

    async fn fresh(&self, region: &str) -> Option<Arc<Catalogue>> {
        self.catalogues
            .read()
            .await
            .get(region)
            .filter(|c| c.populated_at.elapsed() < self.ttl)
            .map(Arc::clone)
    }

    fn gate(&self, region: &str) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(region.to_string()).or_default())
    }
}

impl Default for SkuCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
