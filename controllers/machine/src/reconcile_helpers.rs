//! Helper functions for common reconciliation patterns

use crate::error::ControllerError;
use kube::Api;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Whether a Kubernetes API error is a 404
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == 404)
}

/// Get an object, mapping 404 to `None`
pub async fn get_optional<K>(api: &Api<K>, name: &str) -> Result<Option<K>, ControllerError>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(object) => Ok(Some(object)),
        Err(e) if is_not_found(&e) => {
            debug!("{} not found", name);
            Ok(None)
        }
        Err(e) => Err(ControllerError::Kube(e)),
    }
}

/// Merge `desired` into `current` and report whether anything changed.
///
/// Keys absent from `desired` are left untouched.
pub fn merge_string_map(
    current: &mut std::collections::BTreeMap<String, String>,
    desired: &std::collections::BTreeMap<String, String>,
) -> bool {
    let mut changed = false;
    for (key, value) in desired {
        if current.get(key) != Some(value) {
            current.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}
