//! Configuration module for the portal.
//!
//! Loads configuration from environment variables with sensible defaults.

use chrono::TimeDelta;
use std::env;

const DEFAULT_BROKERS: &[&str] = &[
    "http://orion:1026",
    "http://orion-v2:1026",
    "http://orion-ld:1026",
    "https://orion.lab.fiware.org:1026",
    "https://orion-ld.lab.fiware.org:1026",
];

/// Portal configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// HTTP port for the portal API (default: 8080)
    pub http_port: u16,
    /// IoT Agent north-bound base URL
    pub iot_agent_url: String,
    /// Orion Context Broker base URL (usually behind the PEP proxy)
    pub orion_url: String,
    /// Keyrock identity manager base URL
    pub keyrock_url: String,
    pub keyrock_client_id: String,
    pub keyrock_client_secret: String,
    /// `Fiware-Service` header value, empty to omit it
    pub fiware_service: String,
    /// `Fiware-ServicePath` header value
    pub fiware_service_path: String,
    /// Entity type tracked for device activity
    pub entity_type: String,
    /// Resource path used when a service group reports none
    pub default_resource: String,
    /// Context broker URL as seen from inside the IoT Agent
    pub iot_agent_cbroker: String,
    pub transport: String,
    pub protocol: String,
    /// Context broker endpoints a service group may point at
    pub allowed_brokers: Vec<String>,
    pub offline_threshold: TimeDelta,
    pub activity_refresh_interval: TimeDelta,
    pub status_tick_interval: TimeDelta,
}

impl Default for PortalConfig {
    fn default() -> Self {
        let iot_agent_cbroker = "http://orion-v2:1026".to_string();
        Self {
            http_port: 8080,
            iot_agent_url: "http://localhost:4042".to_string(),
            orion_url: "http://localhost:1027".to_string(),
            keyrock_url: "http://localhost:3005".to_string(),
            keyrock_client_id: String::new(),
            keyrock_client_secret: String::new(),
            fiware_service: "openiot".to_string(),
            fiware_service_path: "/".to_string(),
            entity_type: "Machine".to_string(),
            default_resource: "/iot/json".to_string(),
            allowed_brokers: default_allowed_brokers(&iot_agent_cbroker),
            iot_agent_cbroker,
            transport: "MQTT".to_string(),
            protocol: "IoTA-JSON".to_string(),
            offline_threshold: TimeDelta::minutes(5),
            activity_refresh_interval: TimeDelta::seconds(30),
            status_tick_interval: TimeDelta::seconds(60),
        }
    }
}

impl PortalConfig {
    /// Load configuration from environment variables.
    ///
    /// Every variable is prefixed with `TWINPORTAL_`, e.g. `TWINPORTAL_HTTP_PORT`.
    /// Numeric values that fail to parse keep their default.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = var("HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        set_string(&mut cfg.iot_agent_url, "IOT_AGENT_URL");
        set_string(&mut cfg.orion_url, "ORION_URL");
        set_string(&mut cfg.keyrock_url, "KEYROCK_URL");
        set_string(&mut cfg.keyrock_client_id, "KEYROCK_CLIENT_ID");
        set_string(&mut cfg.keyrock_client_secret, "KEYROCK_CLIENT_SECRET");
        set_string(&mut cfg.fiware_service, "FIWARE_SERVICE");
        set_string(&mut cfg.fiware_service_path, "FIWARE_SERVICEPATH");
        set_string(&mut cfg.entity_type, "ENTITY_TYPE");
        set_string(&mut cfg.default_resource, "IOT_AGENT_RESOURCE");
        set_string(&mut cfg.transport, "TRANSPORT");
        set_string(&mut cfg.protocol, "PROTOCOL");

        if let Some(cbroker) = var("IOT_AGENT_CBROKER") {
            cfg.allowed_brokers = default_allowed_brokers(&cbroker);
            cfg.iot_agent_cbroker = cbroker;
        }

        if let Some(list) = var("ALLOWED_BROKERS") {
            cfg.allowed_brokers = dedup_brokers(list.split(','));
        }

        set_seconds(&mut cfg.offline_threshold, "OFFLINE_THRESHOLD_SECS");
        set_seconds(&mut cfg.activity_refresh_interval, "ACTIVITY_REFRESH_SECS");
        set_seconds(&mut cfg.status_tick_interval, "STATUS_TICK_SECS");

        cfg
    }

    /// The service path header value, never empty.
    pub fn service_path(&self) -> &str {
        if self.fiware_service_path.is_empty() {
            "/"
        } else {
            &self.fiware_service_path
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(format!("TWINPORTAL_{}", name))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn set_string(field: &mut String, name: &str) {
    if let Some(value) = var(name) {
        *field = value;
    }
}

fn set_seconds(field: &mut TimeDelta, name: &str) {
    if let Some(delta) = var(name).as_deref().and_then(parse_seconds) {
        *field = delta;
    }
}

/// A positive whole number of seconds that fits a `TimeDelta`.
fn parse_seconds(value: &str) -> Option<TimeDelta> {
    let secs = value.parse::<i64>().ok().filter(|s| *s > 0)?;
    TimeDelta::try_seconds(secs)
}

fn default_allowed_brokers(cbroker: &str) -> Vec<String> {
    dedup_brokers(DEFAULT_BROKERS.iter().copied().chain(std::iter::once(cbroker)))
}

fn dedup_brokers<'a>(urls: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for url in urls.map(str::trim).filter(|u| !u.is_empty()) {
        if !out.iter().any(|u| u == url) {
            out.push(url.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = PortalConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.fiware_service, "openiot");
        assert_eq!(cfg.offline_threshold, TimeDelta::milliseconds(300_000));
        assert_eq!(cfg.service_path(), "/");
    }

    #[test]
    fn test_default_brokers_include_agent_broker_once() {
        let cfg = PortalConfig::default();
        assert_eq!(cfg.allowed_brokers.len(), 5);
        assert!(cfg.allowed_brokers.contains(&"http://orion-v2:1026".to_string()));

        let custom = default_allowed_brokers("http://my-orion:1026");
        assert_eq!(custom.len(), 6);
        assert_eq!(custom.last().map(String::as_str), Some("http://my-orion:1026"));
    }

    #[test]
    fn test_parse_seconds_rejects_out_of_range() {
        assert_eq!(parse_seconds("90"), Some(TimeDelta::seconds(90)));
        assert_eq!(parse_seconds("0"), None);
        assert_eq!(parse_seconds("-5"), None);
        assert_eq!(parse_seconds("soon"), None);
        assert_eq!(parse_seconds("99999999999999999"), None);
    }

    #[test]
    fn test_empty_service_path_falls_back_to_root() {
        let cfg = PortalConfig {
            fiware_service_path: String::new(),
            ..Default::default()
        };
        assert_eq!(cfg.service_path(), "/");
    }
}
