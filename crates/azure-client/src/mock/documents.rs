//! Server-side fields the mock fills in on stored documents

use crate::resource_id::{
    AVAILABILITY_SETS, NETWORK_INTERFACES, PUBLIC_IP_ADDRESSES, ResourceId, VIRTUAL_MACHINES,
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

fn kind_of(id: &str) -> Option<&'static str> {
    let parsed = ResourceId::parse(id).ok()?;
    [VIRTUAL_MACHINES, NETWORK_INTERFACES, PUBLIC_IP_ADDRESSES, AVAILABILITY_SETS]
        .into_iter()
        .find(|kind| parsed.is_type(kind))
}

fn properties_mut(doc: &mut Value) -> Option<&mut Map<String, Value>> {
    let obj = doc.as_object_mut()?;
    obj.entry("properties")
        .or_insert_with(|| json!({}))
        .as_object_mut()
}

fn existing_str<'a>(existing: Option<&'a Value>, pointer: &str) -> Option<&'a str> {
    existing.and_then(|e| e.pointer(pointer)).and_then(Value::as_str)
}

/// Build the stored document for a PUT of `body` on `id`
pub(super) fn enrich(id: &str, body: &Value, existing: Option<&Value>, address: u32, held: bool) -> Value {
    let mut doc = body.clone();
    if !doc.is_object() {
        doc = json!({});
    }
    let name = id.rsplit('/').next().unwrap_or(id);
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("name".to_string(), json!(name));
    }

    let state = if held {
        if existing.is_some() { "Updating" } else { "Creating" }
    } else {
        "Succeeded"
    };

    match kind_of(id) {
        Some(kind) if kind == NETWORK_INTERFACES => enrich_nic(&mut doc, existing, address),
        Some(kind) if kind == PUBLIC_IP_ADDRESSES => enrich_public_ip(&mut doc, existing, address),
        Some(kind) if kind == VIRTUAL_MACHINES => enrich_vm(&mut doc, existing, held),
        _ => {}
    }
    set_provisioning_state(&mut doc, state);
    doc
}

fn enrich_nic(doc: &mut Value, existing: Option<&Value>, address: u32) {
    let Some(props) = properties_mut(doc) else { return };
    let previous_ip = existing_str(existing, "/properties/ipConfigurations/0/properties/privateIPAddress");

    if let Some(configs) = props.get_mut("ipConfigurations").and_then(Value::as_array_mut) {
        for (index, config) in configs.iter_mut().enumerate() {
            let Some(config_props) = properties_mut(config) else { continue };
            if !config_props.contains_key("privateIPAddress") {
                let ip = match (index, previous_ip) {
                    (0, Some(ip)) => ip.to_string(),
                    _ => format!("10.0.0.{}", address + u32::try_from(index).unwrap_or(0)),
                };
                config_props.insert("privateIPAddress".to_string(), json!(ip));
            }
            config_props
                .entry("primary")
                .or_insert_with(|| json!(index == 0));
        }
    }

    let dns = props
        .entry("dnsSettings")
        .or_insert_with(|| json!({}));
    if let Some(dns) = dns.as_object_mut() {
        dns.entry("internalDomainNameSuffix")
            .or_insert_with(|| json!("internal.cloudapp.net"));
    }
}

fn enrich_public_ip(doc: &mut Value, existing: Option<&Value>, address: u32) {
    let location = doc
        .get("location")
        .and_then(Value::as_str)
        .unwrap_or("eastus")
        .to_string();
    let Some(props) = properties_mut(doc) else { return };

    let ip = existing_str(existing, "/properties/ipAddress")
        .map(str::to_string)
        .unwrap_or_else(|| format!("20.0.0.{address}"));
    props.insert("ipAddress".to_string(), json!(ip));

    if let Some(dns) = props.get_mut("dnsSettings").and_then(Value::as_object_mut) {
        let label = dns.get("domainNameLabel").and_then(Value::as_str).map(str::to_string);
        if let Some(label) = label {
            dns.insert(
                "fqdn".to_string(),
                json!(format!("{label}.{location}.cloudapp.azure.com")),
            );
        }
    }
}

fn enrich_vm(doc: &mut Value, existing: Option<&Value>, held: bool) {
    let vm_id = existing_str(existing, "/properties/vmId")
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let power = existing_str(existing, "/properties/instanceView/statuses/1/code")
        .map(str::to_string)
        .unwrap_or_else(|| if held { "PowerState/starting".to_string() } else { "PowerState/running".to_string() });

    let Some(props) = properties_mut(doc) else { return };
    props.insert("vmId".to_string(), json!(vm_id));
    props.insert(
        "instanceView".to_string(),
        json!({"statuses": [{"code": "ProvisioningState/creating"}, {"code": power}]}),
    );
}

/// Set `properties.provisioningState` and the instance view mirror of it
pub(super) fn set_provisioning_state(doc: &mut Value, state: &str) {
    let Some(props) = properties_mut(doc) else { return };
    props.insert("provisioningState".to_string(), json!(state));
    if let Some(status) = props
        .get_mut("instanceView")
        .and_then(|v| v.get_mut("statuses"))
        .and_then(Value::as_array_mut)
        .and_then(|s| s.get_mut(0))
    {
        *status = json!({"code": format!("ProvisioningState/{}", state.to_ascii_lowercase())});
    }
}

/// Complete a held PUT
pub(super) fn finish_provisioning(doc: &mut Value) {
    set_provisioning_state(doc, "Succeeded");
    let starting = doc
        .pointer("/properties/instanceView/statuses/1/code")
        .and_then(Value::as_str)
        == Some("PowerState/starting");
    if starting {
        set_power_state(doc, "running");
    }
}

/// Overwrite `PowerState/*` in a VM instance view
pub(super) fn set_power_state(doc: &mut Value, power_state: &str) {
    let Some(props) = properties_mut(doc) else { return };
    let view = props
        .entry("instanceView")
        .or_insert_with(|| json!({"statuses": [{"code": "ProvisioningState/succeeded"}]}));
    let Some(statuses) = view.get_mut("statuses").and_then(Value::as_array_mut) else { return };
    statuses.retain(|s| {
        !s.get("code")
            .and_then(Value::as_str)
            .is_some_and(|c| c.starts_with("PowerState/"))
    });
    statuses.push(json!({"code": format!("PowerState/{power_state}")}));
}

/// Record a VM in the `virtualMachines` list of the availability set it names
pub(super) fn link_availability_set(resources: &mut HashMap<String, Value>, id: &str, doc: &Value) {
    if kind_of(id) != Some(VIRTUAL_MACHINES) {
        return;
    }
    let Some(set_id) = doc.pointer("/properties/availabilitySet/id").and_then(Value::as_str) else {
        return;
    };
    let Some(set) = resources.get_mut(&set_id.to_ascii_lowercase()) else { return };
    let Some(props) = properties_mut(set) else { return };
    let members = props
        .entry("virtualMachines")
        .or_insert_with(|| json!([]));
    if let Some(members) = members.as_array_mut() {
        let present = members.iter().any(|m| {
            m.get("id")
                .and_then(Value::as_str)
                .is_some_and(|m| m.eq_ignore_ascii_case(id))
        });
        if !present {
            members.push(json!({"id": id}));
        }
    }
}

/// Drop a deleted VM from every availability set
pub(super) fn unlink_availability_set(resources: &mut HashMap<String, Value>, vm_id: &str) {
    for doc in resources.values_mut() {
        if let Some(members) = doc
            .pointer_mut("/properties/virtualMachines")
            .and_then(Value::as_array_mut)
        {
            members.retain(|m| {
                !m.get("id")
                    .and_then(Value::as_str)
                    .is_some_and(|m| m.eq_ignore_ascii_case(vm_id))
            });
        }
    }
}

/// Apply a `Microsoft.Resources/tags` PATCH (Merge, Replace or Delete) and return the new tags
pub(super) fn apply_tags_patch(resource: &mut Value, body: &Value) -> Value {
    let operation = body.get("operation").and_then(Value::as_str).unwrap_or("Merge");
    let requested = body
        .pointer("/properties/tags")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut tags = resource
        .get("tags")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    match operation {
        "Replace" => tags = requested,
        "Delete" => tags.retain(|k, _| !requested.contains_key(k)),
        _ => tags.extend(requested),
    }

    let tags = Value::Object(tags);
    if let Some(obj) = resource.as_object_mut() {
        obj.insert("tags".to_string(), tags.clone());
    }
    tags
}

/// RFC 7386 JSON merge patch
pub(super) fn merge_patch(target: &mut Value, patch: &Value) {
    let Some(patch) = patch.as_object() else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    let Some(target) = target.as_object_mut() else { return };
    for (k, v) in patch {
        if v.is_null() {
            target.remove(k);
        } else {
            merge_patch(target.entry(k.clone()).or_insert(Value::Null), v);
        }
    }
}
