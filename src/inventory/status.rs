//! Display status derivation.

use super::models::Device;
use crate::activity::{ActivityTracker, DeviceActivity};

use chrono::{DateTime, TimeDelta, Utc};

pub const STATUS_UNKNOWN: &str = "Unknown";
pub const STATUS_OFFLINE: &str = "Offline";

/// Combine live activity with the operator-declared status.
///
/// Activity-derived offline overrides any declared value. A device that is
/// reporting shows its declared status unless none (or "offline") is declared.
pub fn derive_status(activity: Option<&DeviceActivity>, declared: &str) -> String {
    let declared = declared.trim();
    match activity {
        None if declared.is_empty() => STATUS_UNKNOWN.to_string(),
        None => declared.to_string(),
        Some(a) if a.offline => STATUS_OFFLINE.to_string(),
        Some(_) if !declared.is_empty() && !declared.eq_ignore_ascii_case("offline") => declared.to_string(),
        Some(a) => a.status.to_string(),
    }
}

/// Re-derive the ephemeral status fields of every device from `tracker`.
///
/// Activity is looked up by entity name first, then by device id.
pub fn update_statuses_from_activity(
    devices: &mut [Device],
    tracker: &ActivityTracker,
    now: DateTime<Utc>,
    offline_threshold: Option<TimeDelta>,
) {
    for device in devices.iter_mut() {
        let activity = tracker
            .get_activity(&device.entity_name, now, offline_threshold)
            .or_else(|| tracker.get_activity(&device.device_id, now, offline_threshold));

        device.current_status = derive_status(activity.as_ref(), &device.status);
        match activity {
            Some(a) => {
                device.last_seen = a.last_update_iso;
                device.last_seen_attribute = a.last_update_attribute;
                device.dynamic_status = a.status.to_string();
                device.activity_age_ms = a.age_ms;
            }
            None => {
                device.last_seen = String::new();
                device.last_seen_attribute = String::new();
                device.dynamic_status = String::new();
                device.activity_age_ms = None;
            }
        }
    }
}
