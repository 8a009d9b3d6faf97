//! Service matching keys and linkage candidates.
//!
//! A service key is the `|`-joined tuple
//! `apikey|resource|broker|tenant|tenantPath|entityType`. It is a cache and
//! lookup shortcut only; matching compares [`ServiceCandidate`] fields.

use super::models::ServiceGroup;

use reqwest::Url;

pub const KEY_SEPARATOR: char = '|';

/// Trimmed, non-empty view of an optional string.
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// First non-empty candidate, trimmed.
pub(crate) fn first_non_empty<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    values
        .into_iter()
        .find_map(non_empty)
        .map(str::to_string)
}

/// Strip trailing slashes from a resource path; empty paths become `/`.
pub fn normalize_resource_path(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether a resource path is missing or the root placeholder.
pub fn is_default_resource(value: &str) -> bool {
    value.trim().is_empty() || normalize_resource_path(value) == "/"
}

/// Canonical `scheme://host[:port][/path]` form of a context broker URL,
/// lower-cased and without trailing slashes.
pub fn normalize_broker_url(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return String::new();
    }

    match Url::parse(value) {
        Ok(url) if url.host_str().is_some() => {
            let host = url.host_str().unwrap_or_default();
            let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
            let path = url.path().trim_end_matches('/');
            format!("{}://{}{}{}", url.scheme(), host, port, path).to_lowercase()
        }
        _ => value.trim_end_matches('/').to_lowercase(),
    }
}

/// The linkage tuple a service key encodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub apikey: String,
    pub resource: String,
    pub broker: String,
    pub tenant: String,
    pub tenant_path: String,
    pub entity_type: String,
}

impl ServiceKey {
    /// Join the fields into the string key. An empty tenant path encodes as `/`.
    ///
    /// Field values containing the separator are not escaped; such keys may
    /// collide and are logged.
    pub fn encode(&self) -> String {
        let tenant_path = if self.tenant_path.is_empty() {
            "/"
        } else {
            self.tenant_path.as_str()
        };
        let parts = [
            self.apikey.as_str(),
            self.resource.as_str(),
            self.broker.as_str(),
            self.tenant.as_str(),
            tenant_path,
            self.entity_type.as_str(),
        ];
        if parts.iter().any(|p| p.contains(KEY_SEPARATOR)) {
            tracing::warn!("Service key field contains '{}': {:?}", KEY_SEPARATOR, parts);
        }
        parts.join("|")
    }

    /// Split a key back into fields by position.
    ///
    /// Lenient: missing trailing fields stay empty.
    pub fn parse(key: &str) -> Self {
        let mut parts = key.split(KEY_SEPARATOR).map(|p| p.trim().to_string());
        let mut next = || parts.next().unwrap_or_default();
        Self {
            apikey: next(),
            resource: next(),
            broker: next(),
            tenant: next(),
            tenant_path: next(),
            entity_type: next(),
        }
    }

    /// Completeness score: apikey and resource weigh 4, tenant, tenant path
    /// and entity type weigh 1.
    pub fn score(&self) -> u32 {
        completeness(
            !self.apikey.is_empty(),
            !self.resource.is_empty(),
            [
                !self.tenant.is_empty(),
                !self.tenant_path.is_empty(),
                !self.entity_type.is_empty(),
            ],
        )
    }
}

/// Score of an encoded key, 0 for an empty one.
pub fn service_key_score(key: &str) -> u32 {
    if key.trim().is_empty() {
        return 0;
    }
    ServiceKey::parse(key).score()
}

fn completeness(apikey: bool, resource: bool, minor: [bool; 3]) -> u32 {
    let mut score = 0;
    if apikey {
        score += 4;
    }
    if resource {
        score += 4;
    }
    score + minor.iter().filter(|present| **present).count() as u32
}

/// A partial linkage description of a device. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceCandidate {
    pub apikey: Option<String>,
    pub resource: Option<String>,
    pub tenant: Option<String>,
    pub tenant_path: Option<String>,
    pub entity_type: Option<String>,
}

impl ServiceCandidate {
    /// Build a candidate from raw field values, cleaning paths. Returns `None`
    /// when every field is absent.
    pub fn from_parts(
        apikey: Option<&str>,
        resource: Option<&str>,
        tenant: Option<&str>,
        tenant_path: Option<&str>,
        entity_type: Option<&str>,
    ) -> Option<Self> {
        let candidate = Self {
            apikey: non_empty(apikey).map(str::to_string),
            resource: non_empty(resource).map(normalize_resource_path),
            tenant: non_empty(tenant).map(str::to_string),
            tenant_path: non_empty(tenant_path).map(normalize_resource_path),
            entity_type: non_empty(entity_type).map(str::to_string),
        };
        if candidate == Self::default() {
            None
        } else {
            Some(candidate)
        }
    }

    /// Best-effort candidate from an encoded service key. The broker field is
    /// not part of a candidate.
    pub fn from_service_key(key: &str) -> Option<Self> {
        if key.trim().is_empty() {
            return None;
        }
        let k = ServiceKey::parse(key);
        Self::from_parts(
            Some(&k.apikey),
            Some(&k.resource),
            Some(&k.tenant),
            Some(&k.tenant_path),
            Some(&k.entity_type),
        )
    }

    pub fn score(&self) -> u32 {
        completeness(
            self.apikey.is_some(),
            self.resource.is_some(),
            [
                self.tenant.is_some(),
                self.tenant_path.is_some(),
                self.entity_type.is_some(),
            ],
        )
    }

    /// Identity used to drop duplicate candidates.
    pub(crate) fn identity(&self) -> String {
        [
            &self.apikey,
            &self.resource,
            &self.tenant,
            &self.tenant_path,
            &self.entity_type,
        ]
        .iter()
        .map(|f| f.as_deref().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("|")
    }

    /// Partial match: every present field must equal the group's normalised field.
    pub fn matches(&self, group: &ServiceGroup) -> bool {
        if let Some(apikey) = &self.apikey {
            if group.apikey.trim() != apikey {
                return false;
            }
        }
        if let Some(resource) = &self.resource {
            if &normalize_resource_path(&group.resource) != resource {
                return false;
            }
        }
        if let Some(tenant) = &self.tenant {
            if group.tenant.trim() != tenant {
                return false;
            }
        }
        if let Some(path) = &self.tenant_path {
            if &normalize_resource_path(&group.tenant_path) != path {
                return false;
            }
        }
        if let Some(entity_type) = &self.entity_type {
            if group.entity_type.trim() != entity_type {
                return false;
            }
        }
        true
    }
}
