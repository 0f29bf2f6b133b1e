//! Azure Resource Manager data models
//!
//! Only the documents the client itself interprets are typed here. Resource
//! bodies (VMs, NICs, disks...) travel as `serde_json::Value` and are projected
//! by the caller.

use serde::{Deserialize, Serialize};

/// Paged list response (`value` + `nextLink`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResponse<T> {
    /// Items on this page
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    /// Absolute URL of the next page
    #[serde(default)]
    pub next_link: Option<String>,
}

/// ARM error envelope
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorResponse {
    /// Error detail
    #[serde(default)]
    pub error: ErrorDetail,
}

/// ARM error detail
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorDetail {
    /// Error code
    #[serde(default)]
    pub code: String,
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// Compute resource SKU (`Microsoft.Compute/skus`)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSku {
    /// SKU name (e.g. "Standard_D4s_v3")
    #[serde(default)]
    pub name: String,
    /// Resource type (e.g. "virtualMachines", "disks")
    #[serde(default)]
    pub resource_type: String,
    /// Tier
    #[serde(default)]
    pub tier: Option<String>,
    /// Size
    #[serde(default)]
    pub size: Option<String>,
    /// Family
    #[serde(default)]
    pub family: Option<String>,
    /// Regions the SKU is offered in
    #[serde(default)]
    pub locations: Vec<String>,
    /// Per-region zone information
    #[serde(default)]
    pub location_info: Vec<SkuLocationInfo>,
    /// Capability name/value pairs
    #[serde(default)]
    pub capabilities: Vec<SkuCapability>,
    /// Restrictions applied to this subscription
    #[serde(default)]
    pub restrictions: Vec<SkuRestriction>,
}

/// Zones a SKU is available in for one region
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkuLocationInfo {
    /// Region
    #[serde(default)]
    pub location: String,
    /// Zones
    #[serde(default)]
    pub zones: Vec<String>,
}

/// SKU capability
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SkuCapability {
    /// Capability name (e.g. "vCPUs")
    pub name: String,
    /// Capability value as a string
    pub value: String,
}

/// SKU restriction
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkuRestriction {
    /// "Location" or "Zone"
    #[serde(rename = "type", default)]
    pub restriction_type: String,
    /// Regions or zones the restriction applies to
    #[serde(default)]
    pub values: Vec<String>,
    /// Restriction detail
    #[serde(default)]
    pub restriction_info: Option<SkuRestrictionInfo>,
    /// "QuotaId" or "NotAvailableForSubscription"
    #[serde(default)]
    pub reason_code: Option<String>,
}

/// Restriction scope detail
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SkuRestrictionInfo {
    /// Restricted regions
    #[serde(default)]
    pub locations: Vec<String>,
    /// Restricted zones
    #[serde(default)]
    pub zones: Vec<String>,
}

impl ResourceSku {
    /// Raw capability value by name (case-insensitive)
    pub fn capability(&self, name: &str) -> Option<&str> {
        self.capabilities
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.value.as_str())
    }

    /// Whether the SKU is offered in `location` and not location-restricted there
    pub fn is_available_in(&self, location: &str) -> bool {
        let offered = self.locations.iter().any(|l| l.eq_ignore_ascii_case(location));
        let restricted = self.restrictions.iter().any(|r| {
            r.restriction_type.eq_ignore_ascii_case("Location")
                && r.values.iter().any(|v| v.eq_ignore_ascii_case(location))
        });
        offered && !restricted
    }

    /// Zones the SKU is offered in for `location`
    pub fn zones_in(&self, location: &str) -> Vec<String> {
        self.location_info
            .iter()
            .filter(|info| info.location.eq_ignore_ascii_case(location))
            .flat_map(|info| info.zones.iter().cloned())
            .collect()
    }
}

/// How completion of a long-running operation is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Poll an `Azure-AsyncOperation` status document
    AsyncOperation,
    /// Poll the `Location` header until it stops returning 202
    Location,
}

/// HTTP verb that started a long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationMethod {
    /// Create or replace
    Put,
    /// Remove
    Delete,
    /// Action (start, deallocate...)
    Post,
}

/// Handle on an in-flight long-running operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncOperation {
    /// URL to poll
    pub url: String,
    /// Polling protocol
    pub kind: OperationKind,
    /// Verb that started the operation
    pub method: OperationMethod,
    /// Resource the operation acts on
    pub resource_id: String,
    /// API version used for the final GET
    pub api_version: String,
}

/// Result of starting or polling a long-running operation
#[derive(Debug, Clone, PartialEq)]
pub enum Poller {
    /// Terminal success, with the final resource body where there is one
    Done(Option<serde_json::Value>),
    /// Still running; poll again later
    Pending(AsyncOperation),
}

/// `Azure-AsyncOperation` status document
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OperationStatus {
    /// "InProgress", "Succeeded", "Failed" or "Canceled"
    #[serde(default)]
    pub status: String,
    /// Error when the operation failed
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}
