//! Device activity tracking.
//!
//! Ingests entity snapshots from the context broker and derives, per entity,
//! when it last reported data and whether it is currently online.

mod timestamp;

pub use timestamp::*;

use crate::fiware::{FiwareError, OrionClient};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::broadcast;

/// Default staleness window: five minutes.
pub const OFFLINE_THRESHOLD_MS: i64 = 5 * 60 * 1000;

pub fn default_offline_threshold() -> TimeDelta {
    TimeDelta::milliseconds(OFFLINE_THRESHOLD_MS)
}

/// Freshness fingerprint of one entity, captured at ingest time.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceActivityRecord {
    pub entity_id: String,
    pub device_id: String,
    /// Most recent timestamp found anywhere in the entity, `None` if never observed
    pub last_update: Option<DateTime<Utc>>,
    /// Attribute that produced `last_update`
    pub last_update_attribute: String,
    pub attribute_count: usize,
    pub offline_threshold: TimeDelta,
    pub captured_at: DateTime<Utc>,
}

impl DeviceActivityRecord {
    pub fn last_update_ms(&self) -> Option<i64> {
        self.last_update.map(|t| t.timestamp_millis())
    }

    pub fn last_update_iso(&self) -> String {
        self.last_update
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default()
    }
}

/// Live state derived from an activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActivityStatus {
    Online,
    Offline,
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityStatus::Online => f.write_str("Online"),
            ActivityStatus::Offline => f.write_str("Offline"),
        }
    }
}

/// An activity record evaluated at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceActivity {
    pub entity_id: String,
    pub device_id: String,
    pub last_update_ms: Option<i64>,
    pub last_update_iso: String,
    pub last_update_attribute: String,
    pub offline_threshold_ms: i64,
    pub age_ms: Option<i64>,
    pub offline: bool,
    pub status: ActivityStatus,
}

/// Notification sent after the activity state has been replaced.
#[derive(Debug, Clone)]
pub struct ActivityUpdated {
    pub timestamp: DateTime<Utc>,
}

/// Process-wide store of the latest activity records.
pub struct ActivityTracker {
    orion: OrionClient,
    entity_type: String,
    records: HashMap<String, DeviceActivityRecord>,
    last_fetch: Option<DateTime<Utc>>,
    events: broadcast::Sender<ActivityUpdated>,
}

impl ActivityTracker {
    pub fn new(orion: OrionClient, entity_type: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            orion,
            entity_type: entity_type.to_string(),
            records: HashMap::new(),
            last_fetch: None,
            events,
        }
    }

    /// Subscribe to state-changed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityUpdated> {
        self.events.subscribe()
    }

    /// Time of the last completed fetch, used by callers to throttle refreshes.
    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.last_fetch
    }

    /// Drop every record, e.g. when the session ends.
    pub fn clear(&mut self) {
        self.records.clear();
        self.last_fetch = None;
    }

    /// Fetch a fresh snapshot from the context broker and replace the state.
    ///
    /// Without a session token the state is cleared and an empty map returned.
    /// Returns the records keyed by entity id.
    pub async fn refresh(
        &mut self,
        token: Option<&str>,
        now: DateTime<Utc>,
        offline_threshold: TimeDelta,
    ) -> Result<HashMap<String, DeviceActivityRecord>, FiwareError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            self.clear();
            return Ok(HashMap::new());
        };

        let entities = self.orion.list_entities(&self.entity_type, Some(token)).await?;

        match entities {
            Some(entities) => {
                let by_entity = self.ingest(&entities, now, offline_threshold);
                self.last_fetch = Some(now);
                tracing::debug!("Activity: refreshed {} entities", by_entity.len());
                Ok(by_entity)
            }
            None => {
                tracing::warn!("Activity: context broker returned a non-array body");
                self.records.clear();
                self.last_fetch = Some(now);
                Ok(HashMap::new())
            }
        }
    }

    /// Replace the state with records computed from `entities`.
    ///
    /// Each record is stored under its entity id and, when different, under
    /// the raw device id as well.
    pub fn ingest(
        &mut self,
        entities: &[Value],
        now: DateTime<Utc>,
        offline_threshold: TimeDelta,
    ) -> HashMap<String, DeviceActivityRecord> {
        let mut by_entity = HashMap::new();
        let mut records = HashMap::new();

        for entity in entities {
            let Some(record) = analyze_entity(entity, now, offline_threshold) else {
                continue;
            };

            if !record.device_id.is_empty() && record.device_id != record.entity_id {
                records.insert(record.device_id.clone(), record.clone());
            }
            records.insert(record.entity_id.clone(), record.clone());
            by_entity.insert(record.entity_id.clone(), record);
        }

        self.records = records;
        // Nobody listening is fine.
        let _ = self.events.send(ActivityUpdated { timestamp: now });

        by_entity
    }

    /// Evaluate the activity of `id` at `now`.
    ///
    /// `offline_threshold` overrides the window captured with the record.
    pub fn get_activity(
        &self,
        id: &str,
        now: DateTime<Utc>,
        offline_threshold: Option<TimeDelta>,
    ) -> Option<DeviceActivity> {
        if id.is_empty() {
            return None;
        }
        let record = self.records.get(id)?;
        Some(evaluate(record, now, offline_threshold))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Evaluate a record's age and online state at `now`.
pub fn evaluate(
    record: &DeviceActivityRecord,
    now: DateTime<Utc>,
    offline_threshold: Option<TimeDelta>,
) -> DeviceActivity {
    let threshold = offline_threshold.unwrap_or(record.offline_threshold);
    let age = record
        .last_update
        .map(|last| (now - last).max(TimeDelta::zero()));
    let offline = match age {
        None => true,
        Some(age) => age >= threshold,
    };

    DeviceActivity {
        entity_id: record.entity_id.clone(),
        device_id: record.device_id.clone(),
        last_update_ms: record.last_update_ms(),
        last_update_iso: record.last_update_iso(),
        last_update_attribute: record.last_update_attribute.clone(),
        offline_threshold_ms: threshold.num_milliseconds(),
        age_ms: age.map(|a| a.num_milliseconds()),
        offline,
        status: if offline {
            ActivityStatus::Offline
        } else {
            ActivityStatus::Online
        },
    }
}

fn is_reserved_key(key: &str) -> bool {
    key == "id" || key == "type" || key.eq_ignore_ascii_case("timeinstant")
}

/// Compute the activity record of a single key-value entity.
///
/// Returns `None` for entities without an id.
pub fn analyze_entity(
    entity: &Value,
    now: DateTime<Utc>,
    offline_threshold: TimeDelta,
) -> Option<DeviceActivityRecord> {
    let entity_id = entity.get("id").and_then(Value::as_str).unwrap_or_default();
    if entity_id.is_empty() {
        return None;
    }
    let attrs = entity.as_object()?;

    let mut latest = best_timestamp([
        entity.get("TimeInstant"),
        entity.get("timeInstant"),
        entity.get("observedAt"),
    ]);
    let mut source = if latest.is_some() {
        "TimeInstant".to_string()
    } else {
        String::new()
    };

    for (name, value) in attrs.iter().filter(|(k, _)| !is_reserved_key(k)) {
        let ts = best_timestamp([
            value.pointer("/metadata/timestamp/value"),
            value.pointer("/metadata/timestamp"),
            value.pointer("/metadata/TimeInstant/value"),
            value.pointer("/metadata/TimeInstant"),
            value.get("TimeInstant"),
            value.get("observedAt"),
            value.pointer("/value/observedAt"),
        ]);

        if let Some(ts) = ts {
            // Strictly newer only: earlier candidates win ties.
            if latest.map_or(true, |l| ts > l) {
                latest = Some(ts);
                source = name.clone();
            }
        }
    }

    let device_id = ["device_id", "deviceId", "DeviceID"]
        .iter()
        .filter_map(|k| entity.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or_default();

    Some(DeviceActivityRecord {
        entity_id: entity_id.to_string(),
        device_id: device_id.to_string(),
        last_update: latest,
        last_update_attribute: source,
        attribute_count: attrs.keys().filter(|k| !is_reserved_key(k)).count(),
        offline_threshold,
        captured_at: now,
    })
}
