//! Presentation rows for the inventory tables.

use super::key::{non_empty, normalize_resource_path};
use super::matching::{find_service_group, service_fallback_label};
use super::models::{Device, ServiceGroup};

use reqwest::Url;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceGroupRow {
    pub key: String,
    pub label: String,
    pub apikey: String,
    pub resource: String,
    pub broker: String,
    pub broker_label: String,
    pub entity_type: String,
    pub tenant: String,
    pub tenant_path: String,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceRow {
    pub device_id: String,
    pub entity_name: String,
    pub display_name: String,
    pub model: String,
    pub asset_id: String,
    pub service_key: Option<String>,
    pub service_label: String,
    pub resource: String,
    pub status: String,
    pub declared_status: String,
    pub last_seen: String,
    pub last_seen_attribute: String,
    pub activity_age_ms: Option<i64>,
    pub transport: String,
    pub protocol: String,
    pub attribute_count: usize,
}

/// Snapshot of the inventory ready for rendering.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InventoryView {
    pub service_groups: Vec<ServiceGroupRow>,
    pub devices: Vec<DeviceRow>,
}

/// Display name, then resource, then apikey.
pub fn service_label(group: &ServiceGroup) -> String {
    non_empty(Some(&group.display_name))
        .or_else(|| non_empty(Some(&group.resource)))
        .or_else(|| non_empty(Some(&group.apikey)))
        .unwrap_or("Service")
        .to_string()
}

/// Short host label for a broker URL.
pub fn broker_label(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() {
        return "-".to_string();
    }
    if let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) {
        return host;
    }

    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = without_scheme.split(['/', ':']).next().unwrap_or_default();
    if host.is_empty() {
        "-".to_string()
    } else {
        host.to_string()
    }
}

impl ServiceGroupRow {
    pub fn from_group(group: &ServiceGroup) -> Self {
        Self {
            key: group.key.clone(),
            label: service_label(group),
            apikey: group.apikey.clone(),
            resource: group.resource.clone(),
            broker: group.broker.clone(),
            broker_label: broker_label(&group.broker),
            entity_type: group.entity_type.clone(),
            tenant: group.tenant.clone(),
            tenant_path: group.tenant_path.clone(),
            notes: group.notes.clone(),
        }
    }
}

impl DeviceRow {
    pub fn from_device(device: &Device, groups: &[ServiceGroup]) -> Self {
        let group = find_service_group(device, groups);
        let display_name = non_empty(Some(&device.friendly_name))
            .or_else(|| non_empty(Some(&device.entity_name)))
            .unwrap_or(device.device_id.as_str())
            .to_string();

        Self {
            device_id: device.device_id.clone(),
            entity_name: device.entity_name.clone(),
            display_name,
            model: device.model.clone(),
            asset_id: device.asset_id.clone(),
            service_key: group.map(|g| g.key.clone()),
            service_label: group.map_or_else(|| service_fallback_label(device), service_label),
            resource: normalize_resource_path(&device.resource),
            status: device.current_status.clone(),
            declared_status: device.status.clone(),
            last_seen: device.last_seen.clone(),
            last_seen_attribute: device.last_seen_attribute.clone(),
            activity_age_ms: device.activity_age_ms,
            transport: device.transport.clone(),
            protocol: device.protocol.clone(),
            attribute_count: device.attributes.len(),
        }
    }
}

/// Build sorted rows: groups by label, devices by device id.
pub fn build_view(groups: &[ServiceGroup], devices: &[Device]) -> InventoryView {
    let mut service_groups: Vec<ServiceGroupRow> = groups.iter().map(ServiceGroupRow::from_group).collect();
    service_groups.sort_by(|a, b| a.label.cmp(&b.label));

    let mut rows: Vec<DeviceRow> = devices.iter().map(|d| DeviceRow::from_device(d, groups)).collect();
    rows.sort_by(|a, b| a.device_id.cmp(&b.device_id));

    InventoryView {
        service_groups,
        devices: rows,
    }
}
