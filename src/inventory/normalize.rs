//! Normalisation of raw IoT Agent records.
//!
//! The agent reports linkage fields under several spellings and in several
//! places. The lookup order in this module is a precedence contract: live
//! agent-reported values beat values cached in static attributes, which beat
//! deployment defaults.

use super::key::{first_non_empty, normalize_broker_url, normalize_resource_path, non_empty, ServiceKey};
use super::models::{Attribute, Device, GroupMetadata, ServiceGroup};

use serde_json::Value;
use std::collections::HashMap;

/// Deployment defaults applied when a record carries no linkage value.
#[derive(Debug, Clone)]
pub struct LinkageDefaults {
    pub tenant: String,
    pub tenant_path: String,
    pub entity_type: String,
}

impl Default for LinkageDefaults {
    fn default() -> Self {
        Self {
            tenant: "openiot".to_string(),
            tenant_path: "/".to_string(),
            entity_type: "Machine".to_string(),
        }
    }
}

/// Entity type of a service group that reports none.
pub const DEFAULT_GROUP_ENTITY_TYPE: &str = "Thing";

/// Static attribute names the portal uses to cache service linkage.
pub mod linkage_attr {
    pub const KEY: &str = "serviceGroupKey";
    pub const RESOURCE: &str = "serviceGroupResource";
    pub const APIKEY: &str = "serviceGroupApikey";
    pub const FIWARE: &str = "serviceGroupFiware";
    pub const SUBSERVICE: &str = "serviceGroupSubservice";
    pub const ENTITY_TYPE: &str = "serviceGroupEntityType";
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Lookup map over static attributes: `name` (else `object_id`) to the
/// attribute's value (else its `object_id`). Later entries win.
pub fn attribute_map(attrs: &[Attribute]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for attr in attrs {
        let key = non_empty(attr.name.as_deref()).or_else(|| non_empty(attr.object_id.as_deref()));
        let Some(key) = key else { continue };

        let value = match &attr.value {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => attr.object_id.clone().unwrap_or_default(),
            Some(other) => other.to_string(),
        };
        map.insert(key.to_string(), value);
    }
    map
}

/// Decode the `{"name", "notes"}` JSON a portal stores in a group description.
///
/// Text that is not JSON is kept as notes.
pub fn decode_metadata(value: Option<&Value>) -> GroupMetadata {
    let Some(text) = value.and_then(Value::as_str).filter(|s| !s.is_empty()) else {
        return GroupMetadata::default();
    };

    match serde_json::from_str::<Value>(text) {
        Ok(parsed) => GroupMetadata {
            display_name: str_field(&parsed, "name").unwrap_or_default().to_string(),
            notes: str_field(&parsed, "notes").unwrap_or_default().to_string(),
        },
        Err(_) => GroupMetadata {
            display_name: String::new(),
            notes: text.to_string(),
        },
    }
}

/// Read a broker URL from the record itself, then from its nested `service`
/// object, and return it in canonical form.
pub fn extract_broker(raw: &Value) -> String {
    let sources = std::iter::once(raw).chain(raw.get("service").filter(|s| s.is_object()));

    for source in sources {
        for field in ["cbroker", "cBroker", "cbBroker", "url", "endpoint"] {
            if let Some(url) = source.get(field).and_then(broker_candidate) {
                return normalize_broker_url(&url);
            }
        }
    }
    String::new()
}

fn broker_candidate(candidate: &Value) -> Option<String> {
    match candidate {
        Value::String(s) => non_empty(Some(s)).map(str::to_string),
        Value::Object(_) => {
            if let Some(url) = non_empty(str_field(candidate, "url")) {
                return Some(url.to_string());
            }
            let host = non_empty(str_field(candidate, "host"))?;
            let protocol = non_empty(str_field(candidate, "protocol")).unwrap_or("http");
            let protocol = protocol.trim_end_matches(':');
            let port = match candidate.get("port") {
                Some(Value::Number(n)) => format!(":{}", n),
                Some(Value::String(s)) if !s.trim().is_empty() => format!(":{}", s.trim()),
                _ => String::new(),
            };
            Some(format!("{}://{}{}", protocol, host, port))
        }
        _ => None,
    }
}

/// Normalise a raw service group record.
pub fn normalize_service_group(raw: &Value, defaults: &LinkageDefaults) -> ServiceGroup {
    let metadata = decode_metadata(raw.get("description"));

    let apikey = non_empty(str_field(raw, "apikey")).unwrap_or_default().to_string();
    let resource = normalize_resource_path(str_field(raw, "resource").unwrap_or_default());
    let broker = extract_broker(raw);
    let tenant = first_non_empty([str_field(raw, "service"), Some(defaults.tenant.as_str())]).unwrap_or_default();
    let tenant_path = first_non_empty([str_field(raw, "subservice"), Some(defaults.tenant_path.as_str())])
        .unwrap_or_else(|| "/".to_string());
    let entity_type = first_non_empty([str_field(raw, "entity_type")])
        .unwrap_or_else(|| DEFAULT_GROUP_ENTITY_TYPE.to_string());

    let key = ServiceKey {
        apikey: apikey.clone(),
        resource: resource.clone(),
        broker: broker.clone(),
        tenant: tenant.clone(),
        tenant_path: tenant_path.clone(),
        entity_type: entity_type.clone(),
    }
    .encode();

    ServiceGroup {
        key,
        apikey,
        resource,
        broker,
        entity_type,
        tenant,
        tenant_path,
        display_name: metadata.display_name,
        notes: metadata.notes,
        raw: raw.clone(),
    }
}

/// Normalise a raw device record.
///
/// Each linkage field takes the first non-empty value from: the nested
/// `service` object, the record's top-level fields, the linkage cached in
/// static attributes, then `defaults`.
pub fn normalize_device(raw: &Value, defaults: &LinkageDefaults) -> Device {
    let attributes = Attribute::list_from(raw.get("attributes"));
    let static_attributes = Attribute::list_from(raw.get("static_attributes"));
    let statics = attribute_map(&static_attributes);
    let stat = |name: &str| statics.get(name).map(String::as_str);

    let svc = raw.get("service").filter(|s| s.is_object()).unwrap_or(&Value::Null);
    let stored_key = non_empty(stat(linkage_attr::KEY)).map(str::to_string);
    let stored = stored_key.as_deref().map(ServiceKey::parse).unwrap_or_default();

    let apikey = first_non_empty([
        str_field(svc, "apikey"),
        str_field(svc, "apiKey"),
        str_field(svc, "api_key"),
        str_field(raw, "apikey"),
        str_field(raw, "apiKey"),
        str_field(raw, "api_key"),
        stat(linkage_attr::APIKEY),
        Some(stored.apikey.as_str()),
    ])
    .unwrap_or_default();

    let resource = first_non_empty([
        str_field(svc, "resource"),
        str_field(svc, "resourcePath"),
        str_field(svc, "resource_path"),
        str_field(raw, "resource"),
        str_field(raw, "resourcePath"),
        str_field(raw, "resource_path"),
        stat(linkage_attr::RESOURCE),
        Some(stored.resource.as_str()),
    ])
    .unwrap_or_default();

    let broker = first_non_empty([
        str_field(svc, "cbroker"),
        str_field(svc, "cbBroker"),
        str_field(svc, "cBroker"),
        str_field(raw, "cbroker"),
        str_field(raw, "cbBroker"),
        str_field(raw, "cBroker"),
        Some(stored.broker.as_str()),
    ])
    .unwrap_or_default();

    let tenant = first_non_empty([
        str_field(svc, "service"),
        str_field(svc, "fiwareService"),
        str_field(raw, "service"),
        str_field(raw, "fiwareService"),
        stat(linkage_attr::FIWARE),
        Some(stored.tenant.as_str()),
        Some(defaults.tenant.as_str()),
    ])
    .unwrap_or_default();

    let tenant_path = first_non_empty([
        str_field(svc, "subservice"),
        str_field(svc, "servicePath"),
        str_field(raw, "subservice"),
        str_field(raw, "servicePath"),
        stat(linkage_attr::SUBSERVICE),
        Some(stored.tenant_path.as_str()),
        Some(defaults.tenant_path.as_str()),
    ])
    .unwrap_or_else(|| "/".to_string());

    let entity_type = first_non_empty([
        str_field(svc, "entity_type"),
        str_field(svc, "entityType"),
        str_field(raw, "entity_type"),
        str_field(raw, "entityType"),
        stat(linkage_attr::ENTITY_TYPE),
        Some(stored.entity_type.as_str()),
        Some(defaults.entity_type.as_str()),
    ])
    .unwrap_or_default();

    let asset_id = first_non_empty([
        str_field(raw, "asset_id"),
        str_field(raw, "assetId"),
        str_field(raw, "assetID"),
        stat("asset_id"),
        stat("assetId"),
        stat("assetID"),
    ])
    .unwrap_or_default();

    let computed_key = ServiceKey {
        apikey: apikey.clone(),
        resource: resource.clone(),
        broker: broker.clone(),
        tenant: tenant.clone(),
        tenant_path: tenant_path.clone(),
        entity_type: entity_type.clone(),
    }
    .encode();

    let text = |name: &str| stat(name).unwrap_or_default().to_string();

    Device {
        device_id: str_field(raw, "device_id").unwrap_or_default().to_string(),
        entity_name: str_field(raw, "entity_name").unwrap_or_default().to_string(),
        entity_type,
        transport: str_field(raw, "transport").unwrap_or_default().to_string(),
        protocol: str_field(raw, "protocol").unwrap_or_default().to_string(),
        friendly_name: text("friendlyName"),
        model: text("model"),
        notes: text("notes"),
        status: text("operationalStatus"),
        attributes,
        static_attributes,
        apikey,
        resource,
        broker,
        tenant,
        tenant_path,
        service_key: stored_key.unwrap_or(computed_key),
        asset_id,
        raw: raw.clone(),
        ..Default::default()
    }
}
