//! SKU catalogue helpers

use crate::models::{ResourceSku, SkuCapability, SkuLocationInfo};

/// Build a `virtualMachines` SKU offered in `locations` (zones 1-3) with the given capabilities
pub fn vm_sku(name: &str, locations: &[&str], capabilities: &[(&str, &str)]) -> ResourceSku {
    ResourceSku {
        name: name.to_string(),
        resource_type: "virtualMachines".to_string(),
        tier: Some("Standard".to_string()),
        locations: locations.iter().map(|l| (*l).to_string()).collect(),
        location_info: locations
            .iter()
            .map(|l| SkuLocationInfo {
                location: (*l).to_string(),
                zones: vec!["1".to_string(), "2".to_string(), "3".to_string()],
            })
            .collect(),
        capabilities: capabilities
            .iter()
            .map(|(name, value)| SkuCapability {
                name: (*name).to_string(),
                value: (*value).to_string(),
            })
            .collect(),
        ..Default::default()
    }
}
