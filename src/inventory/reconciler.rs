//! The inventory reconciler.
//!
//! Owns the loaded service groups and devices and the activity tracker, and
//! exposes the operations the portal surface drives. Lists are always
//! replaced wholesale by a fetch, never patched in place.

use super::merge::merge_duplicate_devices;
use super::models::{Device, ServiceGroup};
use super::normalize::{normalize_device, normalize_service_group, LinkageDefaults};
use super::registration::{
    build_device_payload, build_service_group_payload, expected_service_key, DeviceDefaults, NewDevice,
    NewServiceGroup,
};
use super::status::update_statuses_from_activity;
use super::view::{build_view, service_label, InventoryView};
use super::InventoryError;
use crate::activity::{ActivityTracker, DeviceActivity};
use crate::config::PortalConfig;
use crate::fiware::IotAgentClient;
use crate::session::Session;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// Reconciler settings derived from the portal configuration.
#[derive(Debug, Clone)]
pub struct InventorySettings {
    pub linkage: LinkageDefaults,
    pub device: DeviceDefaults,
    pub allowed_brokers: Vec<String>,
    pub offline_threshold: TimeDelta,
    /// Minimum time between two context broker activity fetches
    pub activity_refresh_interval: TimeDelta,
}

impl From<&PortalConfig> for InventorySettings {
    fn from(cfg: &PortalConfig) -> Self {
        Self {
            linkage: LinkageDefaults {
                tenant: cfg.fiware_service.clone(),
                tenant_path: cfg.service_path().to_string(),
                entity_type: cfg.entity_type.clone(),
            },
            device: DeviceDefaults {
                transport: cfg.transport.clone(),
                protocol: cfg.protocol.clone(),
                resource: cfg.default_resource.clone(),
            },
            allowed_brokers: cfg.allowed_brokers.clone(),
            offline_threshold: cfg.offline_threshold,
            activity_refresh_interval: cfg.activity_refresh_interval,
        }
    }
}

/// Outcome of a full load. Errors are per list; one failing does not stop
/// the other.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub authenticated: bool,
    pub service_groups: usize,
    pub devices: usize,
    pub service_group_error: Option<String>,
    pub device_error: Option<String>,
}

/// A mutation the IoT Agent accepted, with the outcome of the list reload
/// that follows it. A failed reload does not undo the mutation.
#[derive(Debug, Clone, Serialize)]
pub struct Mutation<T> {
    pub value: T,
    pub reload: LoadReport,
}

/// Lists refreshed after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reload {
    ServiceGroups,
    Devices,
    Both,
}

pub struct Inventory {
    agent: IotAgentClient,
    tracker: ActivityTracker,
    settings: InventorySettings,
    service_groups: Vec<ServiceGroup>,
    devices: Vec<Device>,
}

impl Inventory {
    pub fn new(agent: IotAgentClient, tracker: ActivityTracker, settings: InventorySettings) -> Self {
        Self {
            agent,
            tracker,
            settings,
            service_groups: Vec::new(),
            devices: Vec::new(),
        }
    }

    pub fn service_groups(&self) -> &[ServiceGroup] {
        &self.service_groups
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    pub fn settings(&self) -> &InventorySettings {
        &self.settings
    }

    /// Drop all loaded state, e.g. on sign-out.
    pub fn clear(&mut self) {
        self.service_groups.clear();
        self.devices.clear();
        self.tracker.clear();
    }

    /// Load service groups, then devices.
    ///
    /// Without a session both lists are emptied. A failure on one list is
    /// reported and leaves that list empty.
    pub async fn load(&mut self, session: &Session, now: DateTime<Utc>) -> LoadReport {
        let Some(token) = session.token() else {
            self.clear();
            return LoadReport::default();
        };

        self.reload(token, now, Reload::Both).await
    }

    async fn reload(&mut self, token: &str, now: DateTime<Utc>, lists: Reload) -> LoadReport {
        let mut report = LoadReport {
            authenticated: true,
            ..Default::default()
        };

        if lists != Reload::Devices {
            if let Err(e) = self.fetch_service_groups(token).await {
                report.service_group_error = Some(format!("Error loading service groups: {}", e));
            }
        }
        if lists != Reload::ServiceGroups {
            if let Err(e) = self.fetch_devices(token, now).await {
                report.device_error = Some(format!("Error loading machines: {}", e));
            }
        }

        report.service_groups = self.service_groups.len();
        report.devices = self.devices.len();
        report
    }

    /// Replace the service group list from the IoT Agent.
    pub async fn fetch_service_groups(&mut self, token: &str) -> Result<(), InventoryError> {
        match self.agent.list_service_groups(Some(token)).await {
            Ok(raw) => {
                self.service_groups = raw
                    .iter()
                    .map(|r| normalize_service_group(r, &self.settings.linkage))
                    .collect();
                tracing::debug!("Loaded {} service groups", self.service_groups.len());
                Ok(())
            }
            Err(e) => {
                tracing::error!("Error loading service groups: {}", e);
                self.service_groups.clear();
                Err(e.into())
            }
        }
    }

    /// Replace the device list from the IoT Agent, then sync activity and
    /// re-derive statuses.
    pub async fn fetch_devices(&mut self, token: &str, now: DateTime<Utc>) -> Result<(), InventoryError> {
        let raw = match self.agent.list_devices(Some(token)).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Error loading machines: {}", e);
                self.devices.clear();
                return Err(e.into());
            }
        };

        let normalized = raw
            .iter()
            .map(|r| normalize_device(r, &self.settings.linkage))
            .collect();
        self.devices = merge_duplicate_devices(normalized);
        tracing::debug!("Loaded {} machines from {} records", self.devices.len(), raw.len());

        self.sync_activity(token, now).await;
        self.update_statuses(now);
        Ok(())
    }

    /// Refresh activity from the context broker unless the last fetch is
    /// more recent than the refresh interval. Failures are logged only.
    pub async fn sync_activity(&mut self, token: &str, now: DateTime<Utc>) {
        if let Some(last) = self.tracker.last_fetch() {
            if now - last < self.settings.activity_refresh_interval {
                return;
            }
        }

        if let Err(e) = self
            .tracker
            .refresh(Some(token), now, self.settings.offline_threshold)
            .await
        {
            tracing::warn!("Unable to refresh device activity: {}", e);
        }
    }

    /// Re-derive display statuses from cached activity. No network.
    pub fn update_statuses(&mut self, now: DateTime<Utc>) {
        update_statuses_from_activity(
            &mut self.devices,
            &self.tracker,
            now,
            Some(self.settings.offline_threshold),
        );
    }

    /// Register a service group and reload the list. The value is the key the
    /// new group is expected to have.
    pub async fn register_service_group(
        &mut self,
        session: &Session,
        form: &NewServiceGroup,
        now: DateTime<Utc>,
    ) -> Result<Mutation<String>, InventoryError> {
        let token = session.token().ok_or(InventoryError::NotAuthenticated)?;
        let payload = build_service_group_payload(form, &self.service_groups, &self.settings.allowed_brokers)?;

        self.agent.register_service_groups(&[payload], Some(token)).await?;
        tracing::info!("Registered service group {}", form.resource.trim());

        let reload = self.reload(token, now, Reload::ServiceGroups).await;
        Ok(Mutation {
            value: expected_service_key(form, &self.settings.linkage.tenant, &self.settings.linkage.tenant_path),
            reload,
        })
    }

    /// Delete the service group with `key`, then reload both lists. The value
    /// is the deleted group's label.
    pub async fn delete_service_group(
        &mut self,
        session: &Session,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Mutation<String>, InventoryError> {
        let token = session.token().ok_or(InventoryError::NotAuthenticated)?;
        let group = self
            .service_groups
            .iter()
            .find(|g| g.key == key)
            .ok_or_else(|| InventoryError::UnknownServiceGroup(key.to_string()))?;

        let resource = group.raw.get("resource").and_then(|v| v.as_str()).unwrap_or_default();
        if resource.trim().is_empty() {
            return Err(InventoryError::MissingResourceIdentifier);
        }
        let label = service_label(group);

        self.agent
            .delete_service_group(resource, &group.apikey, Some(token))
            .await?;
        tracing::info!("Deleted service group {}", label);

        let reload = self.reload(token, now, Reload::Both).await;
        Ok(Mutation { value: label, reload })
    }

    /// Register a device under its selected service group and reload devices.
    pub async fn register_device(
        &mut self,
        session: &Session,
        form: &NewDevice,
        now: DateTime<Utc>,
    ) -> Result<Mutation<String>, InventoryError> {
        let token = session.token().ok_or(InventoryError::NotAuthenticated)?;
        let payload = build_device_payload(form, &self.service_groups, &self.settings.device)?;
        let device_id = form.device_id.trim().to_string();

        self.agent.register_devices(&[payload], Some(token)).await?;
        tracing::info!("Registered machine {}", device_id);

        let reload = self.reload(token, now, Reload::Devices).await;
        Ok(Mutation {
            value: device_id,
            reload,
        })
    }

    /// Delete a loaded device and reload devices.
    pub async fn delete_device(
        &mut self,
        session: &Session,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Mutation<String>, InventoryError> {
        let token = session.token().ok_or(InventoryError::NotAuthenticated)?;
        if !self.devices.iter().any(|d| d.device_id == device_id) {
            return Err(InventoryError::UnknownDevice(device_id.to_string()));
        }

        self.agent.delete_device(device_id, Some(token)).await?;
        tracing::info!("Deleted machine {}", device_id);

        let reload = self.reload(token, now, Reload::Devices).await;
        Ok(Mutation {
            value: device_id.to_string(),
            reload,
        })
    }

    /// Presentation rows with statuses re-derived at `now`.
    pub fn view(&mut self, now: DateTime<Utc>) -> InventoryView {
        self.update_statuses(now);
        build_view(&self.service_groups, &self.devices)
    }

    /// Activity snapshot for an entity or device id.
    pub fn activity(&self, id: &str, now: DateTime<Utc>) -> Option<DeviceActivity> {
        self.tracker
            .get_activity(id, now, Some(self.settings.offline_threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiware::{OrionClient, Tenant};
    use crate::testing::spawn_fake;

    use axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        routing::{delete, get},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeFiware {
        groups: Arc<Mutex<Vec<Value>>>,
        devices: Arc<Mutex<Vec<Value>>>,
        entities: Arc<Mutex<Vec<Value>>>,
        orion_calls: Arc<AtomicUsize>,
        fail_groups: bool,
    }

    async fn list_groups(State(fake): State<FakeFiware>) -> (StatusCode, Json<Value>) {
        if fake.fail_groups {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "description": "agent down" })));
        }
        let groups = fake.groups.lock().unwrap().clone();
        (StatusCode::OK, Json(json!({ "count": groups.len(), "services": groups })))
    }

    async fn create_groups(State(fake): State<FakeFiware>, Json(body): Json<Value>) -> StatusCode {
        let mut groups = fake.groups.lock().unwrap();
        for mut g in body["services"].as_array().cloned().unwrap_or_default() {
            g["service"] = json!("openiot");
            g["subservice"] = json!("/");
            groups.push(g);
        }
        StatusCode::CREATED
    }

    async fn remove_group(State(fake): State<FakeFiware>, Query(q): Query<HashMap<String, String>>) -> StatusCode {
        let mut groups = fake.groups.lock().unwrap();
        let before = groups.len();
        groups.retain(|g| g["resource"].as_str() != q.get("resource").map(String::as_str));
        if groups.len() < before {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::NOT_FOUND
        }
    }

    async fn list_devices(State(fake): State<FakeFiware>) -> Json<Value> {
        let devices = fake.devices.lock().unwrap().clone();
        Json(json!({ "count": devices.len(), "devices": devices }))
    }

    async fn create_devices(State(fake): State<FakeFiware>, Json(body): Json<Value>) -> StatusCode {
        let mut devices = fake.devices.lock().unwrap();
        devices.extend(body["devices"].as_array().cloned().unwrap_or_default());
        StatusCode::CREATED
    }

    async fn remove_device(State(fake): State<FakeFiware>, Path(id): Path<String>) -> StatusCode {
        fake.devices.lock().unwrap().retain(|d| d["device_id"] != id.as_str());
        StatusCode::NO_CONTENT
    }

    async fn list_entities(State(fake): State<FakeFiware>) -> Json<Value> {
        fake.orion_calls.fetch_add(1, Ordering::SeqCst);
        Json(Value::Array(fake.entities.lock().unwrap().clone()))
    }

    async fn inventory_for(fake: FakeFiware) -> Inventory {
        let router = Router::new()
            .route("/iot/services", get(list_groups).post(create_groups).delete(remove_group))
            .route("/iot/devices", get(list_devices).post(create_devices))
            .route("/iot/devices/{id}", delete(remove_device))
            .route("/v2/entities", get(list_entities))
            .with_state(fake);
        let base = spawn_fake(router).await;

        let http = reqwest::Client::new();
        let tenant = Tenant::new("openiot", "/");
        let agent = IotAgentClient::new(http.clone(), &base, tenant.clone());
        let tracker = ActivityTracker::new(OrionClient::new(http, &base, tenant), "Machine");
        Inventory::new(agent, tracker, InventorySettings::from(&PortalConfig::default()))
    }

    fn session() -> Session {
        Session::new("admin@test.com", "tok".to_string())
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn seeded() -> FakeFiware {
        let fake = FakeFiware::default();
        *fake.groups.lock().unwrap() = vec![json!({
            "apikey": "k1",
            "resource": "/iot/json",
            "cbroker": "http://orion-v2:1026",
            "entity_type": "Machine",
            "service": "openiot",
            "subservice": "/",
            "description": "{\"name\":\"Line A\",\"notes\":\"\"}"
        })];
        *fake.devices.lock().unwrap() = vec![
            json!({
                "device_id": "m1",
                "entity_name": "urn:ngsi-ld:Machine:m1",
                "entity_type": "Machine",
                "service": "openiot",
                "service_path": "/",
                "attributes": [{ "object_id": "t", "name": "temperature", "type": "Number" }],
                "static_attributes": [
                    { "name": "operationalStatus", "type": "Text", "value": "Maintenance" },
                    { "name": "serviceGroupApikey", "type": "Text", "value": "k1" },
                    { "name": "serviceGroupResource", "type": "Text", "value": "/iot/json" }
                ]
            }),
            json!({
                "device_id": "m1",
                "entity_name": "urn:ngsi-ld:Machine:m1",
                "entity_type": "Machine",
                "service": "openiot",
                "service_path": "/",
                "attributes": [{ "object_id": "h", "name": "humidity", "type": "Number" }],
                "static_attributes": [
                    { "name": "operationalStatus", "type": "Text", "value": "Maintenance" },
                    { "name": "serviceGroupApikey", "type": "Text", "value": "k1" },
                    { "name": "serviceGroupResource", "type": "Text", "value": "/iot/json" }
                ]
            }),
            json!({
                "device_id": "m2",
                "entity_name": "urn:ngsi-ld:Machine:m2",
                "entity_type": "Machine"
            }),
        ];
        *fake.entities.lock().unwrap() = vec![
            json!({ "id": "urn:ngsi-ld:Machine:m1", "type": "Machine", "TimeInstant": "2024-05-01T10:09:00Z" }),
            json!({ "id": "urn:ngsi-ld:Machine:m2", "type": "Machine", "TimeInstant": "2024-05-01T10:00:00Z" }),
        ];
        fake
    }

    #[tokio::test]
    async fn test_load_merges_matches_and_derives_status() {
        let mut inventory = inventory_for(seeded()).await;
        let now = at("2024-05-01T10:10:00Z");

        let report = inventory.load(&session(), now).await;
        assert!(report.authenticated);
        assert_eq!(report.service_groups, 1);
        assert_eq!(report.devices, 2);
        assert!(report.service_group_error.is_none());

        let view = inventory.view(now);
        let m1 = &view.devices[0];
        assert_eq!(m1.device_id, "m1");
        assert_eq!(m1.attribute_count, 2);
        assert_eq!(m1.service_label, "Line A");
        assert_eq!(m1.status, "Maintenance");

        let m2 = &view.devices[1];
        assert_eq!(m2.status, "Offline");
        assert_eq!(m2.activity_age_ms, Some(600_000));
    }

    #[tokio::test]
    async fn test_load_without_session_clears() {
        let mut inventory = inventory_for(seeded()).await;
        let now = at("2024-05-01T10:10:00Z");
        inventory.load(&session(), now).await;
        assert!(!inventory.devices().is_empty());

        let report = inventory.load(&Session::default(), now).await;
        assert!(!report.authenticated);
        assert!(inventory.devices().is_empty());
        assert!(inventory.service_groups().is_empty());
        assert!(inventory.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_group_failure_does_not_block_devices() {
        let fake = FakeFiware {
            fail_groups: true,
            ..seeded()
        };
        let mut inventory = inventory_for(fake).await;

        let report = inventory.load(&session(), at("2024-05-01T10:10:00Z")).await;
        assert_eq!(
            report.service_group_error.as_deref(),
            Some("Error loading service groups: agent down")
        );
        assert_eq!(report.devices, 2);

        let view = inventory.view(at("2024-05-01T10:10:00Z"));
        assert_eq!(view.devices[0].service_label, "/iot/json");
    }

    #[tokio::test]
    async fn test_activity_refresh_is_throttled() {
        let fake = seeded();
        let calls = fake.orion_calls.clone();
        let mut inventory = inventory_for(fake).await;

        inventory.load(&session(), at("2024-05-01T10:10:00Z")).await;
        inventory.load(&session(), at("2024-05-01T10:10:10Z")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        inventory.load(&session(), at("2024-05-01T10:10:31Z")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_register_service_group_then_device() {
        let mut inventory = inventory_for(FakeFiware::default()).await;
        let now = at("2024-05-01T10:10:00Z");
        inventory.load(&session(), now).await;

        let form = NewServiceGroup {
            apikey: "line-b".to_string(),
            broker: "http://orion-v2:1026".to_string(),
            resource: "/iot/line-b".to_string(),
            entity_type: "Machine".to_string(),
            display_name: "Line B".to_string(),
            ..Default::default()
        };
        let created = inventory.register_service_group(&session(), &form, now).await.unwrap();
        let key = created.value;
        assert_eq!(created.reload.service_groups, 1);
        assert!(created.reload.service_group_error.is_none());
        assert_eq!(inventory.service_groups().len(), 1);
        assert_eq!(inventory.service_groups()[0].key, key);
        assert_eq!(inventory.service_groups()[0].display_name, "Line B");

        let again = inventory.register_service_group(&session(), &form, now).await;
        assert!(matches!(again, Err(InventoryError::DuplicateResource(_))));

        let device = NewDevice {
            device_id: "press-7".to_string(),
            service_key: key.clone(),
            ..Default::default()
        };
        inventory.register_device(&session(), &device, now).await.unwrap();
        assert_eq!(inventory.devices().len(), 1);
        assert_eq!(inventory.devices()[0].entity_name, "urn:ngsi-ld:Machine:press-7");
        assert_eq!(inventory.devices()[0].service_key, key);

        let view = inventory.view(now);
        assert_eq!(view.devices[0].service_label, "Line B");
    }

    #[tokio::test]
    async fn test_delete_operations() {
        let mut inventory = inventory_for(seeded()).await;
        let now = at("2024-05-01T10:10:00Z");
        inventory.load(&session(), now).await;

        let missing = inventory.delete_device(&session(), "nope", now).await;
        assert!(matches!(missing, Err(InventoryError::UnknownDevice(_))));

        inventory.delete_device(&session(), "m2", now).await.unwrap();
        assert_eq!(inventory.devices().len(), 1);

        let key = inventory.service_groups()[0].key.clone();
        let deleted = inventory.delete_service_group(&session(), &key, now).await.unwrap();
        assert_eq!(deleted.value, "Line A");
        assert_eq!(deleted.reload.service_groups, 0);
        assert!(inventory.service_groups().is_empty());
        assert_eq!(inventory.devices().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_failure_after_mutation_is_reported() {
        let fake = FakeFiware {
            fail_groups: true,
            ..FakeFiware::default()
        };
        let groups = fake.groups.clone();
        let mut inventory = inventory_for(fake).await;
        let now = at("2024-05-01T10:10:00Z");

        let form = NewServiceGroup {
            apikey: "line-c".to_string(),
            broker: "http://orion-v2:1026".to_string(),
            resource: "/iot/line-c".to_string(),
            entity_type: "Machine".to_string(),
            ..Default::default()
        };
        let created = inventory.register_service_group(&session(), &form, now).await.unwrap();
        assert_eq!(groups.lock().unwrap().len(), 1);
        assert_eq!(
            created.reload.service_group_error.as_deref(),
            Some("Error loading service groups: agent down")
        );
        assert_eq!(created.reload.service_groups, 0);
        assert!(created.reload.device_error.is_none());
    }

    #[tokio::test]
    async fn test_mutations_require_session() {
        let mut inventory = inventory_for(seeded()).await;
        let result = inventory
            .delete_device(&Session::default(), "m1", at("2024-05-01T10:10:00Z"))
            .await;
        assert!(matches!(result, Err(InventoryError::NotAuthenticated)));
    }
}
