//! Window addressing: mapping instants to hour-aligned UTC windows.
//!
//! Every window query and the stored-window key use the canonical address
//! produced here. Two events one millisecond apart on either side of an hour
//! boundary land in different windows.

use crate::events::types::Source;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Length of every feature window, in minutes.
pub const WINDOW_MINUTES: f64 = 60.0;

/// Length of every feature window.
pub fn window_length() -> Duration {
    Duration::hours(1)
}

/// Truncate minutes, seconds and sub-seconds to zero, in UTC.
pub fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(ts.hour(), 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(ts)
}

/// Whether `ts` already sits exactly on an hour boundary.
pub fn is_hour_aligned(ts: DateTime<Utc>) -> bool {
    floor_to_hour(ts) == ts
}

/// The `[start, end)` bounds of one hourly window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowAddress {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WindowAddress {
    /// The window enclosing `ts`.
    pub fn containing(ts: DateTime<Utc>) -> Self {
        Self::from_aligned_start(floor_to_hour(ts))
    }

    /// Build from a start the caller has already aligned.
    pub(crate) fn from_aligned_start(start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: start + window_length(),
        }
    }

    /// Build from `start`, or `None` if it is not hour-aligned.
    pub fn from_start(start: DateTime<Utc>) -> Option<Self> {
        is_hour_aligned(start).then(|| Self::from_aligned_start(start))
    }

    /// Check if a timestamp falls within this window.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// The window immediately after this one.
    pub fn next(&self) -> Self {
        Self::from_aligned_start(self.end)
    }

    /// Portion of `[from, to]` inside this window, in milliseconds.
    pub fn overlap_ms(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        let start = from.max(self.start);
        let end = to.min(self.end);
        if end > start {
            (end - start).num_milliseconds()
        } else {
            0
        }
    }
}

/// Unique key of a stored feature window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowKey {
    pub user_id: String,
    pub window_start: DateTime<Utc>,
    pub source: Source,
}

impl WindowKey {
    pub fn new(user_id: impl Into<String>, window_start: DateTime<Utc>, source: Source) -> Self {
        Self {
            user_id: user_id.into(),
            window_start,
            source,
        }
    }
}

/// Number of hourly windows from the hour of `from` to the hour of `to`,
/// inclusive. Zero or negative when `to` falls in an earlier hour.
pub fn hours_spanned(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (floor_to_hour(to) - floor_to_hour(from)).num_hours() + 1
}
