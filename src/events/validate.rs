//! Ingestion boundary: explicit schema for incoming events.
//!
//! Every event is validated once, here, before anything reaches the event
//! log. Invalid events are filtered out individually; a batch is rejected
//! only when nothing valid remains.

use crate::error::AggregationError;
use crate::events::types::{
    EventType, RawActivityEvent, Source, MAX_IDENTIFIER_LEN, TZ_OFFSET_RANGE,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A client timestamp: RFC 3339 text or Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncomingTimestamp {
    Millis(i64),
    Text(String),
}

impl IncomingTimestamp {
    pub fn parse(&self) -> Result<DateTime<Utc>, String> {
        match self {
            IncomingTimestamp::Millis(ms) => DateTime::from_timestamp_millis(*ms)
                .ok_or_else(|| format!("timestamp {ms} out of range")),
            IncomingTimestamp::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| format!("invalid ts '{s}': {e}")),
        }
    }
}

/// An event as sent by a client, before validation.
///
/// | field            | required | default   |
/// |------------------|----------|-----------|
/// | `eventType`      | yes      | -         |
/// | `ts`             | no       | now       |
/// | `source`         | no       | `unknown` |
/// | `app`, `website` | no       | absent    |
/// | `durationMs`     | no       | absent    |
/// | `tzOffsetMinutes`| no       | absent    |
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<IncomingTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz_offset_minutes: Option<i32>,
}

impl IncomingEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type: Some(event_type.as_str().to_string()),
            ..Default::default()
        }
    }

    /// Validate and convert into a [`RawActivityEvent`] owned by `user_id`.
    pub fn validate(
        self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RawActivityEvent, String> {
        let event_type: EventType = self
            .event_type
            .as_deref()
            .ok_or_else(|| "missing eventType".to_string())?
            .parse()?;

        let ts = match &self.ts {
            Some(ts) => ts.parse()?,
            None => now,
        };

        let source = match self.source.as_deref() {
            Some(s) => s.parse::<Source>()?,
            None => Source::Unknown,
        };

        let app = clean_identifier("app", self.app)?;
        let website = clean_identifier("website", self.website)?;

        if let Some(ms) = self.duration_ms {
            if !ms.is_finite() || ms < 0.0 {
                return Err(format!("durationMs must be >= 0, got {ms}"));
            }
        }

        if let Some(tz) = self.tz_offset_minutes {
            if !TZ_OFFSET_RANGE.contains(&tz) {
                return Err(format!("tzOffsetMinutes {tz} outside [-840, 840]"));
            }
        }

        Ok(RawActivityEvent {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            ts,
            source,
            event_type,
            app,
            website,
            duration_ms: self.duration_ms,
            tz_offset_minutes: self.tz_offset_minutes,
            received_at: now,
        })
    }
}

fn clean_identifier(field: &str, value: Option<String>) -> Result<Option<String>, String> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(format!("{field} longer than {MAX_IDENTIFIER_LEN} characters"));
    }
    Ok(Some(trimmed.to_string()))
}

/// An event dropped during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Position in the submitted batch
    pub index: usize,
    pub reason: String,
}

/// Result of validating a submitted batch.
#[derive(Debug, Clone, Default)]
pub struct ValidatedBatch {
    pub events: Vec<RawActivityEvent>,
    pub rejected: Vec<Rejection>,
}

/// Split a request body into its event items.
///
/// Accepts a bare array, an object with an `events` array, or a single
/// event object. `null` entries are skipped.
pub fn batch_items(body: Value) -> Vec<Value> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("events") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                map.insert("events".to_string(), other);
                vec![Value::Object(map)]
            }
            None => vec![Value::Object(map)],
        },
        Value::Null => Vec::new(),
        other => vec![other],
    };
    items.into_iter().filter(|v| !v.is_null()).collect()
}

/// Validate every item of a batch for `user_id`.
///
/// Fails with [`AggregationError::InvalidInput`] when no item survives.
pub fn validate_batch(
    user_id: &str,
    items: Vec<Value>,
    now: DateTime<Utc>,
) -> Result<ValidatedBatch, AggregationError> {
    let mut batch = ValidatedBatch::default();

    for (index, item) in items.into_iter().enumerate() {
        let outcome = serde_json::from_value::<IncomingEvent>(item)
            .map_err(|e| format!("malformed event: {e}"))
            .and_then(|incoming| incoming.validate(user_id, now));

        match outcome {
            Ok(event) => batch.events.push(event),
            Err(reason) => batch.rejected.push(Rejection { index, reason }),
        }
    }

    if batch.events.is_empty() {
        let detail = batch
            .rejected
            .first()
            .map(|r| format!(": {}", r.reason))
            .unwrap_or_default();
        return Err(AggregationError::InvalidInput(format!(
            "no valid events provided{detail}"
        )));
    }

    tracing::debug!(
        user_id,
        accepted = batch.events.len(),
        rejected = batch.rejected.len(),
        "validated event batch"
    );

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let event = IncomingEvent::new(EventType::ActivityPing)
            .validate("u1", now())
            .unwrap();
        assert_eq!(event.ts, now());
        assert_eq!(event.source, Source::Unknown);
        assert_eq!(event.received_at, now());
        assert!(event.app.is_none());
    }

    #[test]
    fn test_parses_rfc3339_and_millis() {
        let text = IncomingEvent {
            ts: Some(IncomingTimestamp::Text("2024-03-01T10:15:00+02:00".into())),
            ..IncomingEvent::new(EventType::TabSwitch)
        };
        let event = text.validate("u1", now()).unwrap();
        assert_eq!(event.ts, Utc.with_ymd_and_hms(2024, 3, 1, 8, 15, 0).unwrap());

        let millis = IncomingEvent {
            ts: Some(IncomingTimestamp::Millis(1_709_290_800_000)),
            ..IncomingEvent::new(EventType::TabSwitch)
        };
        let event = millis.validate("u1", now()).unwrap();
        assert_eq!(event.ts, Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_rejects_out_of_range_fields() {
        let negative = IncomingEvent {
            duration_ms: Some(-1.0),
            ..IncomingEvent::new(EventType::IdleEnd)
        };
        assert!(negative.validate("u1", now()).is_err());

        let tz = IncomingEvent {
            tz_offset_minutes: Some(900),
            ..IncomingEvent::new(EventType::ActivityPing)
        };
        assert!(tz.validate("u1", now()).is_err());

        let long_app = IncomingEvent {
            app: Some("a".repeat(257)),
            ..IncomingEvent::new(EventType::AppFocus)
        };
        assert!(long_app.validate("u1", now()).is_err());

        let bad_ts = IncomingEvent {
            ts: Some(IncomingTimestamp::Text("yesterday".into())),
            ..IncomingEvent::new(EventType::ActivityPing)
        };
        assert!(bad_ts.validate("u1", now()).is_err());
    }

    #[test]
    fn test_identifiers_trimmed() {
        let event = IncomingEvent {
            app: Some("  editor  ".into()),
            website: Some("   ".into()),
            ..IncomingEvent::new(EventType::AppSwitch)
        }
        .validate("u1", now())
        .unwrap();
        assert_eq!(event.app.as_deref(), Some("editor"));
        assert!(event.website.is_none());
    }

    #[test]
    fn test_batch_items_shapes() {
        assert_eq!(batch_items(json!([{"eventType": "activity_ping"}, null])).len(), 1);
        assert_eq!(
            batch_items(json!({"events": [{"eventType": "tab_switch"}, {"eventType": "idle_start"}]})).len(),
            2
        );
        assert_eq!(batch_items(json!({"eventType": "app_focus"})).len(), 1);
        assert!(batch_items(Value::Null).is_empty());
    }

    #[test]
    fn test_validate_batch_filters_invalid() {
        let items = batch_items(json!([
            {"eventType": "activity_ping", "source": "web"},
            {"eventType": "keystroke"},
            {"source": "web"},
            {"eventType": "app_switch", "app": 42},
        ]));
        let batch = validate_batch("u1", items, now()).unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].source, Source::Web);
        let indexes: Vec<usize> = batch.rejected.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[test]
    fn test_validate_batch_all_invalid_is_rejected() {
        let items = batch_items(json!([{"eventType": "nope"}]));
        let err = validate_batch("u1", items, now()).unwrap_err();
        assert!(matches!(err, AggregationError::InvalidInput(_)));

        let err = validate_batch("u1", Vec::new(), now()).unwrap_err();
        assert!(matches!(err, AggregationError::InvalidInput(_)));
    }
}
