//! Privacy-safe activity event types.
//!
//! These types carry ONLY signal kind, timing and opaque identifiers - never
//! keystrokes, screen content or full URLs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum length of an `app` or `website` identifier.
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Valid range for a client-reported timezone offset, in minutes.
pub const TZ_OFFSET_RANGE: std::ops::RangeInclusive<i32> = -840..=840;

/// The kind of client that reported an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Web,
    Desktop,
    Mobile,
    #[default]
    Unknown,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Web => "web",
            Source::Desktop => "desktop",
            Source::Mobile => "mobile",
            Source::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Source::Web),
            "desktop" => Ok(Source::Desktop),
            "mobile" => Ok(Source::Mobile),
            "unknown" => Ok(Source::Unknown),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// Activity signal classification.
///
/// Declaration order doubles as the tie-break when two events share a
/// timestamp: a `*_start` sorts before its matching `*_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ActivityPing,
    IdleStart,
    IdleEnd,
    BreakStart,
    BreakEnd,
    AppSwitch,
    TabSwitch,
    WebsiteFocus,
    AppFocus,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::ActivityPing,
        EventType::IdleStart,
        EventType::IdleEnd,
        EventType::BreakStart,
        EventType::BreakEnd,
        EventType::AppSwitch,
        EventType::TabSwitch,
        EventType::WebsiteFocus,
        EventType::AppFocus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ActivityPing => "activity_ping",
            EventType::IdleStart => "idle_start",
            EventType::IdleEnd => "idle_end",
            EventType::BreakStart => "break_start",
            EventType::BreakEnd => "break_end",
            EventType::AppSwitch => "app_switch",
            EventType::TabSwitch => "tab_switch",
            EventType::WebsiteFocus => "website_focus",
            EventType::AppFocus => "app_focus",
        }
    }

    /// `idle_start` or `idle_end`.
    pub fn is_idle(&self) -> bool {
        matches!(self, EventType::IdleStart | EventType::IdleEnd)
    }

    /// `break_start` or `break_end`.
    pub fn is_break(&self) -> bool {
        matches!(self, EventType::BreakStart | EventType::BreakEnd)
    }

    /// Anything other than an idle/break boundary counts towards sessions.
    pub fn is_activity_signal(&self) -> bool {
        !self.is_idle() && !self.is_break()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown eventType '{s}'"))
    }
}

/// One observed, validated activity signal.
///
/// Events are immutable once recorded. Ordering within a user and source is
/// established by `ts`, never by insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActivityEvent {
    pub id: Uuid,
    pub user_id: String,
    pub ts: DateTime<Utc>,
    pub source: Source,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// Minutes behind UTC, as reported by the client (positive = west of UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz_offset_minutes: Option<i32>,
    /// When the event log accepted the event.
    pub received_at: DateTime<Utc>,
}

impl RawActivityEvent {
    /// Create a bare event of the given type at `ts`.
    pub fn new(user_id: impl Into<String>, ts: DateTime<Utc>, source: Source, event_type: EventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            ts,
            source,
            event_type,
            app: None,
            website: None,
            duration_ms: None,
            tz_offset_minutes: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_tz_offset(mut self, minutes: i32) -> Self {
        self.tz_offset_minutes = Some(minutes);
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parse() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>(), Ok(t));
        }
        assert!("keystroke".parse::<EventType>().is_err());
    }

    #[test]
    fn test_activity_signal_classification() {
        assert!(EventType::ActivityPing.is_activity_signal());
        assert!(EventType::AppSwitch.is_activity_signal());
        assert!(EventType::WebsiteFocus.is_activity_signal());
        assert!(!EventType::IdleStart.is_activity_signal());
        assert!(!EventType::BreakEnd.is_activity_signal());
    }

    #[test]
    fn test_source_serde_names() {
        let json = serde_json::to_string(&Source::Desktop).unwrap();
        assert_eq!(json, "\"desktop\"");
        assert_eq!(Source::default(), Source::Unknown);
        assert!("tablet".parse::<Source>().is_err());
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = RawActivityEvent::new("u1", Utc::now(), Source::Web, EventType::TabSwitch)
            .with_website("example.com")
            .with_tz_offset(-330);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "tab_switch");
        assert_eq!(value["tzOffsetMinutes"], -330);
        assert!(value.get("durationMs").is_none());
    }
}
