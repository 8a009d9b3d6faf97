//! Inventory model types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An IoT Agent service group after normalisation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceGroup {
    /// Derived matching key, recomputed on every normalisation
    pub key: String,
    pub apikey: String,
    /// Resource path without trailing slash, `/` when absent
    pub resource: String,
    /// Canonical context broker URL
    pub broker: String,
    pub entity_type: String,
    pub tenant: String,
    pub tenant_path: String,
    pub display_name: String,
    pub notes: String,
    #[serde(skip)]
    pub raw: Value,
}

/// A telemetry or static attribute descriptor as the agent reports it.
///
/// Unknown members (expressions, metadata) are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default, alias = "objectId", skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub attr_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Attribute {
    pub fn telemetry(object_id: &str, name: &str, attr_type: &str) -> Self {
        Self {
            object_id: Some(object_id.to_string()),
            name: Some(name.to_string()),
            attr_type: Some(attr_type.to_string()),
            ..Default::default()
        }
    }

    pub fn fixed(name: &str, attr_type: &str, value: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            attr_type: Some(attr_type.to_string()),
            value: Some(Value::String(value.to_string())),
            ..Default::default()
        }
    }

    /// Read an attribute list, skipping entries that are not objects.
    ///
    /// Every object is kept. Members of the wrong type stay in `extra`.
    pub fn list_from(value: Option<&Value>) -> Vec<Attribute> {
        match value {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_object)
                .map(|obj| Attribute::from_object(obj.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn from_object(mut extra: Map<String, Value>) -> Self {
        let object_id = match take_string(&mut extra, "object_id") {
            Some(id) => Some(id),
            None => {
                let id = take_string(&mut extra, "objectId");
                // `object_id` would shadow the alias on output.
                if id.is_some() {
                    extra.remove("object_id");
                }
                id
            }
        };
        let name = take_string(&mut extra, "name");
        let attr_type = take_string(&mut extra, "type");
        let value = extra.remove("value").filter(|v| !v.is_null());
        Self {
            object_id,
            name,
            attr_type,
            value,
            extra,
        }
    }
}

/// Remove `key` when it holds a non-blank string.
fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    let usable = map
        .get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !usable {
        return None;
    }
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// A provisioned device after normalisation and merging.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Device {
    pub device_id: String,
    pub entity_name: String,
    pub entity_type: String,
    pub transport: String,
    pub protocol: String,
    pub attributes: Vec<Attribute>,
    pub static_attributes: Vec<Attribute>,

    pub apikey: String,
    pub resource: String,
    pub broker: String,
    pub tenant: String,
    pub tenant_path: String,
    /// Resolved matching key, stored value preferred over computed
    pub service_key: String,

    pub friendly_name: String,
    pub model: String,
    pub asset_id: String,
    pub notes: String,
    /// Operator-declared status from static attributes
    pub status: String,

    // Derived on every status update.
    pub current_status: String,
    pub last_seen: String,
    pub last_seen_attribute: String,
    pub dynamic_status: String,
    pub activity_age_ms: Option<i64>,

    #[serde(skip)]
    pub raw: Value,
}

/// Display metadata a portal stores in a service group description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMetadata {
    pub display_name: String,
    pub notes: String,
}
