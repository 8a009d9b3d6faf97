//! Device to service group matching.

use super::key::{first_non_empty, non_empty, ServiceCandidate};
use super::models::{Device, ServiceGroup};
use super::normalize::{attribute_map, linkage_attr};

use serde_json::Value;
use std::collections::HashSet;

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Every plausible linkage candidate of `device`, most complete first.
///
/// Sources: the device's resolved fields, its raw record and nested service
/// object, its resolved service key, the linkage cached in static attributes
/// and the key stored there. Identical candidates are dropped; ties keep
/// source order.
pub fn collect_candidates(device: &Device) -> Vec<ServiceCandidate> {
    let statics = attribute_map(&device.static_attributes);
    let stat = |name: &str| statics.get(name).map(String::as_str);
    let raw = &device.raw;
    let svc = raw.get("service").filter(|s| s.is_object()).unwrap_or(&Value::Null);

    let sources = [
        ServiceCandidate::from_parts(
            Some(&device.apikey),
            Some(&device.resource),
            Some(&device.tenant),
            Some(&device.tenant_path),
            Some(&device.entity_type),
        ),
        ServiceCandidate::from_parts(
            first_non_empty([str_field(raw, "apikey"), str_field(raw, "apiKey")]).as_deref(),
            first_non_empty([str_field(raw, "resource"), str_field(raw, "resourcePath")]).as_deref(),
            str_field(raw, "service"),
            first_non_empty([str_field(raw, "subservice"), str_field(raw, "servicePath")]).as_deref(),
            first_non_empty([str_field(raw, "entity_type"), str_field(raw, "entityType")]).as_deref(),
        ),
        ServiceCandidate::from_parts(
            first_non_empty([str_field(svc, "apikey"), str_field(svc, "apiKey"), str_field(svc, "api_key")]).as_deref(),
            first_non_empty([
                str_field(svc, "resource"),
                str_field(svc, "resourcePath"),
                str_field(svc, "resource_path"),
            ])
            .as_deref(),
            first_non_empty([str_field(svc, "service"), str_field(svc, "fiwareService")]).as_deref(),
            first_non_empty([str_field(svc, "subservice"), str_field(svc, "servicePath")]).as_deref(),
            first_non_empty([str_field(svc, "entity_type"), str_field(svc, "entityType")]).as_deref(),
        ),
        ServiceCandidate::from_service_key(&device.service_key),
        ServiceCandidate::from_parts(
            stat(linkage_attr::APIKEY),
            stat(linkage_attr::RESOURCE),
            stat(linkage_attr::FIWARE),
            stat(linkage_attr::SUBSERVICE),
            stat(linkage_attr::ENTITY_TYPE),
        ),
        non_empty(stat(linkage_attr::KEY)).and_then(ServiceCandidate::from_service_key),
    ];

    let mut seen = HashSet::new();
    let mut candidates: Vec<ServiceCandidate> = sources
        .into_iter()
        .flatten()
        .filter(|c| seen.insert(c.identity()))
        .collect();

    // Stable: equal scores keep source order.
    candidates.sort_by(|a, b| b.score().cmp(&a.score()));
    candidates
}

/// The best service group for `device`: the first group matching the highest
/// ranked candidate that matches anything.
pub fn find_service_group<'a>(device: &Device, groups: &'a [ServiceGroup]) -> Option<&'a ServiceGroup> {
    if groups.is_empty() {
        return None;
    }
    collect_candidates(device)
        .iter()
        .find_map(|candidate| groups.iter().find(|g| candidate.matches(g)))
}

/// Label for a device without a service group, read from its best ranked
/// candidate: resource, then apikey, then tenant and tenant path. A candidate
/// with only a tenant path gives `N/A`.
pub fn service_fallback_label(device: &Device) -> String {
    let Some(best) = collect_candidates(device).into_iter().next() else {
        return "N/A".to_string();
    };
    if let Some(resource) = non_empty(best.resource.as_deref()) {
        return resource.to_string();
    }
    if let Some(apikey) = non_empty(best.apikey.as_deref()) {
        return apikey.to_string();
    }
    match (non_empty(best.tenant.as_deref()), non_empty(best.tenant_path.as_deref())) {
        (Some(tenant), Some(path)) => format!("{} {}", tenant, path),
        (Some(tenant), None) => tenant.to_string(),
        (None, _) => "N/A".to_string(),
    }
}
