//! Service group and device registration payloads.
//!
//! Validation runs before any network call so a rejected form never reaches
//! the IoT Agent.

use super::key::{normalize_broker_url, normalize_resource_path, ServiceKey};
use super::models::{Attribute, ServiceGroup};
use super::normalize::{linkage_attr, DEFAULT_GROUP_ENTITY_TYPE};
use super::InventoryError;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;

const APIKEY_MAX_LEN: usize = 64;

/// Service group registration form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewServiceGroup {
    pub apikey: String,
    pub broker: String,
    pub resource: String,
    pub entity_type: String,
    pub display_name: String,
    pub notes: String,
}

/// Attributes entered either as builder rows or as raw JSON text.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeInput {
    Entries(Vec<Attribute>),
    Manual(String),
}

impl Default for AttributeInput {
    fn default() -> Self {
        AttributeInput::Entries(Vec::new())
    }
}

/// Which attribute list a manual JSON error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Telemetry,
    Static,
}

impl AttributeKind {
    pub fn label(&self) -> &'static str {
        match self {
            AttributeKind::Telemetry => "Attributes",
            AttributeKind::Static => "Static attributes",
        }
    }
}

impl AttributeInput {
    /// The attribute list as payload values.
    ///
    /// Manual text must be a JSON array; empty text is an empty list.
    pub fn resolve(&self, kind: AttributeKind) -> Result<Vec<Value>, InventoryError> {
        match self {
            AttributeInput::Entries(entries) => entries
                .iter()
                .map(|a| serde_json::to_value(a).map_err(|e| InventoryError::AttributeJson(kind.label(), e.to_string())))
                .collect(),
            AttributeInput::Manual(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(Vec::new());
                }
                match serde_json::from_str::<Value>(text) {
                    Ok(Value::Array(items)) => Ok(items),
                    Ok(_) => Err(InventoryError::AttributeNotArray(kind.label())),
                    Err(e) => Err(InventoryError::AttributeJson(kind.label(), e.to_string())),
                }
            }
        }
    }
}

/// Device registration form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewDevice {
    pub device_id: String,
    /// Key of the owning service group
    pub service_key: String,
    pub friendly_name: String,
    pub model: String,
    pub notes: String,
    pub status: String,
    pub attributes: AttributeInput,
    pub static_attributes: AttributeInput,
}

/// Deployment constants a device payload needs.
#[derive(Debug, Clone)]
pub struct DeviceDefaults {
    pub transport: String,
    pub protocol: String,
    pub resource: String,
}

/// Suggest an apikey from a display name.
pub fn suggest_apikey(display_name: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").unwrap());

    let lowered = display_name.trim().to_lowercase();
    let slug = re.replace_all(&lowered, "-");
    slug.trim_matches('-').chars().take(APIKEY_MAX_LEN).collect()
}

/// Broker-facing entity URN of a device.
pub fn build_entity_name(device_id: &str, entity_type: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    static COLONS: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9:-]").unwrap());
    let colons = COLONS.get_or_init(|| Regex::new(r":+").unwrap());

    let sanitized = unsafe_chars.replace_all(device_id.trim(), "-");
    let sanitized = colons.replace_all(&sanitized, "-");
    format!("urn:ngsi-ld:{}:{}", entity_type, sanitized)
}

/// Validate a service group form against the loaded groups and build the
/// registration payload entry.
pub fn build_service_group_payload(
    form: &NewServiceGroup,
    existing: &[ServiceGroup],
    allowed_brokers: &[String],
) -> Result<Value, InventoryError> {
    let broker = form.broker.trim();
    if broker.is_empty() {
        return Err(InventoryError::MissingBroker);
    }

    let normalized = normalize_broker_url(broker);
    if !allowed_brokers.iter().any(|b| normalize_broker_url(b) == normalized) {
        return Err(InventoryError::BrokerNotAllowed(allowed_brokers.join(", ")));
    }

    let resource = form.resource.trim();
    if resource.is_empty() {
        return Err(InventoryError::MissingResource);
    }
    let normalized_resource = normalize_resource_path(resource);
    if existing
        .iter()
        .any(|g| normalize_resource_path(&g.resource) == normalized_resource)
    {
        return Err(InventoryError::DuplicateResource(normalized_resource));
    }

    let entity_type = form.entity_type.trim();
    if entity_type.is_empty() {
        return Err(InventoryError::MissingEntityType);
    }

    let mut payload = json!({
        "apikey": form.apikey.trim(),
        "cbroker": broker,
        "entity_type": entity_type,
        "resource": resource,
    });

    let name = form.display_name.trim();
    let notes = form.notes.trim();
    if !name.is_empty() || !notes.is_empty() {
        payload["description"] = Value::String(json!({ "name": name, "notes": notes }).to_string());
    }

    Ok(payload)
}

/// Key the group built from `form` will have once the agent lists it.
pub fn expected_service_key(form: &NewServiceGroup, tenant: &str, tenant_path: &str) -> String {
    ServiceKey {
        apikey: form.apikey.trim().to_string(),
        resource: normalize_resource_path(&form.resource),
        broker: normalize_broker_url(&form.broker),
        tenant: tenant.to_string(),
        tenant_path: tenant_path.to_string(),
        entity_type: form.entity_type.trim().to_string(),
    }
    .encode()
}

/// Static attributes every portal-registered device carries. Empty values are
/// left out.
pub fn default_static_attributes(form: &NewDevice, group: &ServiceGroup) -> Vec<Attribute> {
    [
        ("friendlyName", form.friendly_name.as_str()),
        ("model", form.model.as_str()),
        ("notes", form.notes.as_str()),
        ("operationalStatus", form.status.as_str()),
        (linkage_attr::KEY, group.key.as_str()),
        (linkage_attr::RESOURCE, group.resource.as_str()),
        (linkage_attr::APIKEY, group.apikey.as_str()),
        (linkage_attr::FIWARE, group.tenant.as_str()),
        (linkage_attr::SUBSERVICE, group.tenant_path.as_str()),
    ]
    .into_iter()
    .map(|(name, value)| (name, value.trim()))
    .filter(|(_, value)| !value.is_empty())
    .map(|(name, value)| Attribute::fixed(name, "Text", value))
    .collect()
}

/// Validate a device form and build its registration payload entry.
pub fn build_device_payload(
    form: &NewDevice,
    groups: &[ServiceGroup],
    defaults: &DeviceDefaults,
) -> Result<Value, InventoryError> {
    if groups.is_empty() {
        return Err(InventoryError::NoServiceGroups);
    }

    let device_id = form.device_id.trim();
    if device_id.is_empty() {
        return Err(InventoryError::MissingDeviceId);
    }

    if form.service_key.is_empty() {
        return Err(InventoryError::NoServiceGroupSelected);
    }
    let group = groups
        .iter()
        .find(|g| g.key == form.service_key)
        .ok_or(InventoryError::ServiceGroupGone)?;

    let entity_type = if group.entity_type.is_empty() {
        DEFAULT_GROUP_ENTITY_TYPE
    } else {
        group.entity_type.as_str()
    };

    let attributes = form.attributes.resolve(AttributeKind::Telemetry)?;
    let custom_static = form.static_attributes.resolve(AttributeKind::Static)?;

    let mut static_attributes = default_static_attributes(form, group)
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| InventoryError::AttributeJson(AttributeKind::Static.label(), e.to_string()))?;
    static_attributes.extend(custom_static);

    let resource = if group.resource.is_empty() {
        defaults.resource.as_str()
    } else {
        group.resource.as_str()
    };

    Ok(json!({
        "device_id": device_id,
        "entity_name": build_entity_name(device_id, entity_type),
        "entity_type": entity_type,
        "transport": defaults.transport,
        "protocol": defaults.protocol,
        "service": {
            "apikey": group.apikey,
            "resource": resource,
        },
        "attributes": attributes,
        "commands": [],
        "static_attributes": static_attributes,
    }))
}
