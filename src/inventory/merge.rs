//! Collapsing of near-duplicate device records.
//!
//! The IoT Agent may list one logical device several times, e.g. once per
//! transport binding. Duplicates share `deviceId|entityName|serviceKey`.

use super::key::{is_default_resource, service_key_score};
use super::models::{Attribute, Device};

use std::collections::{HashMap, HashSet};

/// Identity of an attribute for union purposes: `objectId::name` when either
/// is present, else `anon::type::<json value>`.
pub fn attribute_identity(attr: &Attribute) -> String {
    let object_id = attr.object_id.as_deref().unwrap_or_default();
    let name = attr.name.as_deref().unwrap_or_default();
    if !object_id.is_empty() || !name.is_empty() {
        return format!("{}::{}", object_id, name);
    }

    let value = attr
        .value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "null".to_string());
    format!("anon::{}::{}", attr.attr_type.as_deref().unwrap_or_default(), value)
}

/// Append the attributes of `incoming` whose identity `target` lacks.
pub fn merge_attribute_list(target: &mut Vec<Attribute>, incoming: &[Attribute]) {
    let mut seen: HashSet<String> = target.iter().map(attribute_identity).collect();
    for attr in incoming {
        if seen.insert(attribute_identity(attr)) {
            target.push(attr.clone());
        }
    }
}

fn dedupe_key(device: &Device, index: usize) -> String {
    if device.device_id.is_empty() && device.entity_name.is_empty() {
        return format!("__device_{}", index);
    }
    format!("{}|{}|{}", device.device_id, device.entity_name, device.service_key)
}

fn fill_if_empty(target: &mut String, incoming: &str) {
    if target.is_empty() && !incoming.is_empty() {
        *target = incoming.to_string();
    }
}

fn merge_into(acc: &mut Device, incoming: &Device) {
    merge_attribute_list(&mut acc.attributes, &incoming.attributes);
    merge_attribute_list(&mut acc.static_attributes, &incoming.static_attributes);

    fill_if_empty(&mut acc.apikey, &incoming.apikey);
    fill_if_empty(&mut acc.broker, &incoming.broker);
    fill_if_empty(&mut acc.tenant, &incoming.tenant);
    fill_if_empty(&mut acc.tenant_path, &incoming.tenant_path);

    if !is_default_resource(&incoming.resource) && is_default_resource(&acc.resource) {
        acc.resource = incoming.resource.clone();
    }

    if service_key_score(&incoming.service_key) > service_key_score(&acc.service_key) {
        acc.service_key = incoming.service_key.clone();
    }

    fill_if_empty(&mut acc.friendly_name, &incoming.friendly_name);
    fill_if_empty(&mut acc.model, &incoming.model);
    fill_if_empty(&mut acc.asset_id, &incoming.asset_id);
    fill_if_empty(&mut acc.notes, &incoming.notes);
    fill_if_empty(&mut acc.status, &incoming.status);
}

/// Collapse duplicates into the first occurrence, keeping first-seen order.
pub fn merge_duplicate_devices(devices: Vec<Device>) -> Vec<Device> {
    let mut merged: Vec<Device> = Vec::with_capacity(devices.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (index, device) in devices.into_iter().enumerate() {
        let key = dedupe_key(&device, index);
        match positions.get(&key) {
            Some(&pos) => {
                tracing::debug!("Merging duplicate device record {}", key);
                merge_into(&mut merged[pos], &device);
            }
            None => {
                positions.insert(key, merged.len());
                merged.push(device);
            }
        }
    }

    merged
}
