//! Timestamp extraction from loosely typed context broker values.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// Interpret a JSON value as an instant.
///
/// Numbers are epoch milliseconds, strings are parsed as dates, and objects
/// are unwrapped through their `value`, `observedAt` or `timestamp` member.
pub fn to_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let ms = n.as_f64().filter(|f| f.is_finite())?;
            DateTime::from_timestamp_millis(ms as i64)
        }
        Value::String(s) => parse_timestamp(s),
        Value::Object(map) => {
            // The first member present decides, even when it does not parse.
            if let Some(inner) = map.get("value") {
                to_timestamp(inner)
            } else if let Some(inner) = map.get("observedAt") {
                to_timestamp(inner)
            } else if let Some(inner) = map.get("timestamp") {
                to_timestamp(inner)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// First candidate that yields a timestamp.
pub fn best_timestamp<'a>(candidates: impl IntoIterator<Item = Option<&'a Value>>) -> Option<DateTime<Utc>> {
    candidates.into_iter().flatten().find_map(to_timestamp)
}

/// Parse a date string in any of the forms the broker and agents emit.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Try various formats
    let formats = [
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_formats() {
        let expected = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z").unwrap();
        for s in [
            "2024-05-01T10:00:00Z",
            "2024-05-01T10:00:00.000Z",
            "2024-05-01T12:00:00+02:00",
            "2024-05-01T10:00:00",
            "2024-05-01 10:00:00",
        ] {
            assert_eq!(parse_timestamp(s), Some(expected.with_timezone(&Utc)), "{s}");
        }
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_to_timestamp_shapes() {
        let ms = 1_714_557_600_000i64;
        let expected = DateTime::from_timestamp_millis(ms);

        assert_eq!(to_timestamp(&json!(ms)), expected);
        assert_eq!(to_timestamp(&json!({ "type": "DateTime", "value": "2024-05-01T10:00:00Z" })), expected);
        assert_eq!(to_timestamp(&json!({ "observedAt": ms })), expected);
        assert_eq!(to_timestamp(&json!({ "timestamp": ms })), expected);
        assert_eq!(to_timestamp(&json!({ "value": "garbage", "observedAt": ms })), None);
        assert_eq!(to_timestamp(&json!(true)), None);
        assert_eq!(to_timestamp(&Value::Null), None);
    }

    #[test]
    fn test_best_timestamp_takes_first_parseable() {
        let bad = json!("n/a");
        let good = json!("2024-05-01T10:00:00Z");
        let later = json!("2024-06-01T10:00:00Z");
        let found = best_timestamp([None, Some(&bad), Some(&good), Some(&later)]);
        assert_eq!(found, parse_timestamp("2024-05-01T10:00:00Z"));
    }
}
