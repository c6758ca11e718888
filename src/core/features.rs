//! Feature computation for one hourly window.
//!
//! This module turns the events of a single `(user, source, hour)` into the
//! 14-field feature vector. Everything here is pure: the caller fetches the
//! events, and the result depends only on the event set, never on its order.

use crate::core::windowing::{WindowAddress, WINDOW_MINUTES};
use crate::events::types::{EventType, RawActivityEvent};
use chrono::{Duration, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Upper bound for the context switch rate, to keep values finite.
pub const CONTEXT_SWITCH_RATE_CEILING: f64 = 9999.0;

/// Number of values in the feature vector.
pub const FEATURE_COUNT: usize = 14;

/// Feature names in canonical vectorization order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "total_active_minutes",
    "longest_continuous_session",
    "avg_session_length",
    "app_switch_count",
    "tab_switch_count",
    "context_switch_rate",
    "unique_apps",
    "unique_websites",
    "late_night_usage_ratio",
    "early_morning_usage_ratio",
    "idle_minutes",
    "idle_ratio",
    "break_count",
    "avg_break_length",
];

/// Tunable aggregation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureParams {
    /// Client-side idle threshold. Informational only: idle time comes from
    /// the reported idle signals, not from this value.
    pub idle_timeout_minutes: f64,
    /// Largest gap between activity signals that still continues a session
    pub session_gap_minutes: f64,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 5.0,
            session_gap_minutes: 10.0,
        }
    }
}

/// The 14 derived features of one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowFeatures {
    pub total_active_minutes: f64,
    pub longest_continuous_session: f64,
    pub avg_session_length: f64,
    pub app_switch_count: u32,
    pub tab_switch_count: u32,
    pub context_switch_rate: f64,
    pub unique_apps: u32,
    pub unique_websites: u32,
    pub late_night_usage_ratio: f64,
    pub early_morning_usage_ratio: f64,
    pub idle_minutes: f64,
    pub idle_ratio: f64,
    pub break_count: u32,
    pub avg_break_length: f64,
}

impl WindowFeatures {
    /// Values in the order of [`FEATURE_NAMES`].
    pub fn to_vector(&self) -> [f64; FEATURE_COUNT] {
        [
            self.total_active_minutes,
            self.longest_continuous_session,
            self.avg_session_length,
            self.app_switch_count as f64,
            self.tab_switch_count as f64,
            self.context_switch_rate,
            self.unique_apps as f64,
            self.unique_websites as f64,
            self.late_night_usage_ratio,
            self.early_morning_usage_ratio,
            self.idle_minutes,
            self.idle_ratio,
            self.break_count as f64,
            self.avg_break_length,
        ]
    }
}

/// Session statistics in minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SessionStats {
    longest: f64,
    average: f64,
}

/// Reconciled idle and break durations in minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PauseMinutes {
    idle: f64,
    breaks: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SwitchStats {
    app_switch_count: u32,
    tab_switch_count: u32,
    unique_apps: u32,
    unique_websites: u32,
}

/// Compute all features for `window` from the events that fall inside it.
pub fn compute_features(
    events: &[RawActivityEvent],
    window: &WindowAddress,
    params: &FeatureParams,
) -> WindowFeatures {
    let tz_offset_minutes = resolve_tz_offset(events);

    let mut sorted: Vec<&RawActivityEvent> = events.iter().collect();
    sorted.sort_by(|a, b| (a.ts, a.event_type, a.id).cmp(&(b.ts, b.event_type, b.id)));

    let pauses = reconcile_pause_minutes(&sorted, window);
    let total_active_minutes = (WINDOW_MINUTES - pauses.idle).clamp(0.0, WINDOW_MINUTES);
    let idle_ratio = (pauses.idle / WINDOW_MINUTES).clamp(0.0, 1.0);

    let sessions = compute_session_stats(&sorted, params.session_gap_minutes);
    let switches = compute_switch_stats(&sorted);

    let break_count = count_type(&sorted, EventType::BreakStart);
    let avg_break_length = if break_count > 0 {
        (pauses.breaks / break_count as f64).clamp(0.0, WINDOW_MINUTES)
    } else {
        0.0
    };

    let context_switch_rate = if total_active_minutes > 0.0 {
        let switches = (switches.app_switch_count + switches.tab_switch_count) as f64;
        (switches / total_active_minutes).clamp(0.0, CONTEXT_SWITCH_RATE_CEILING)
    } else {
        0.0
    };

    let (late_night_usage_ratio, early_morning_usage_ratio) =
        time_of_day_ratios(window, total_active_minutes, tz_offset_minutes);

    WindowFeatures {
        total_active_minutes,
        longest_continuous_session: sessions.longest,
        avg_session_length: sessions.average,
        app_switch_count: switches.app_switch_count,
        tab_switch_count: switches.tab_switch_count,
        context_switch_rate,
        unique_apps: switches.unique_apps,
        unique_websites: switches.unique_websites,
        late_night_usage_ratio,
        early_morning_usage_ratio,
        idle_minutes: pauses.idle,
        idle_ratio,
        break_count,
        avg_break_length,
    }
}

/// Offset of the most recently received event that carries one, else UTC.
///
/// Ties on `received_at` go to the later event in the fetched list.
fn resolve_tz_offset(events: &[RawActivityEvent]) -> i32 {
    events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.tz_offset_minutes.map(|tz| (e.received_at, i, tz)))
        .max_by_key(|&(received_at, i, _)| (received_at, i))
        .map(|(_, _, tz)| tz)
        .unwrap_or(0)
}

/// Reconcile explicit durations against start/end pairs, per category.
///
/// Clients may send either signal style or both; the larger total wins.
fn reconcile_pause_minutes(sorted: &[&RawActivityEvent], window: &WindowAddress) -> PauseMinutes {
    let idle_ms = explicit_duration_ms(sorted, EventType::is_idle).max(inferred_interval_ms(
        sorted,
        EventType::IdleStart,
        EventType::IdleEnd,
        window,
    ) as f64);

    let break_ms = explicit_duration_ms(sorted, EventType::is_break).max(inferred_interval_ms(
        sorted,
        EventType::BreakStart,
        EventType::BreakEnd,
        window,
    ) as f64);

    PauseMinutes {
        idle: ms_to_minutes(idle_ms).clamp(0.0, WINDOW_MINUTES),
        breaks: ms_to_minutes(break_ms).clamp(0.0, WINDOW_MINUTES),
    }
}

fn explicit_duration_ms(sorted: &[&RawActivityEvent], category: fn(&EventType) -> bool) -> f64 {
    sorted
        .iter()
        .filter(|e| category(&e.event_type))
        .filter_map(|e| e.duration_ms)
        .sum()
}

/// Sum of `[start, end]` intervals inside the window.
///
/// A later start replaces an unmatched earlier one; a start still open at
/// the end is treated as lasting until the window closes.
fn inferred_interval_ms(
    sorted: &[&RawActivityEvent],
    start_type: EventType,
    end_type: EventType,
    window: &WindowAddress,
) -> i64 {
    let mut total_ms = 0;
    let mut open = None;

    for event in sorted {
        if event.event_type == start_type {
            open = Some(event.ts);
        } else if event.event_type == end_type {
            if let Some(start) = open.take() {
                total_ms += window.overlap_ms(start, event.ts);
            }
        }
    }

    if let Some(start) = open {
        total_ms += window.overlap_ms(start, window.end);
    }

    total_ms
}

/// Split activity signals into sessions on gaps above `session_gap_minutes`.
fn compute_session_stats(sorted: &[&RawActivityEvent], session_gap_minutes: f64) -> SessionStats {
    let signals: Vec<&RawActivityEvent> = sorted
        .iter()
        .copied()
        .filter(|e| e.event_type.is_activity_signal())
        .collect();

    let Some(first) = signals.first() else {
        return SessionStats::default();
    };

    let mut durations = Vec::new();
    let mut session_start = first.ts;
    let mut last = first.ts;

    for event in &signals[1..] {
        if minutes_between(last, event.ts) > session_gap_minutes {
            durations.push(minutes_between(session_start, last));
            session_start = event.ts;
        }
        last = event.ts;
    }
    durations.push(minutes_between(session_start, last));

    let longest = durations.iter().copied().fold(0.0, f64::max);
    let average = durations.iter().sum::<f64>() / durations.len() as f64;

    SessionStats {
        longest: longest.clamp(0.0, WINDOW_MINUTES),
        average: average.clamp(0.0, WINDOW_MINUTES),
    }
}

fn compute_switch_stats(sorted: &[&RawActivityEvent]) -> SwitchStats {
    let unique_apps: HashSet<&str> = sorted
        .iter()
        .filter(|e| matches!(e.event_type, EventType::AppSwitch | EventType::AppFocus))
        .filter_map(|e| e.app.as_deref())
        .collect();

    let unique_websites: HashSet<&str> = sorted
        .iter()
        .filter(|e| matches!(e.event_type, EventType::TabSwitch | EventType::WebsiteFocus))
        .filter_map(|e| e.website.as_deref())
        .collect();

    SwitchStats {
        app_switch_count: count_type(sorted, EventType::AppSwitch),
        tab_switch_count: count_type(sorted, EventType::TabSwitch),
        unique_apps: unique_apps.len() as u32,
        unique_websites: unique_websites.len() as u32,
    }
}

/// Late-night and early-morning flags for the reporter's local hour.
///
/// A window spans exactly one hour, so both ratios are either 0 or 1.
fn time_of_day_ratios(
    window: &WindowAddress,
    total_active_minutes: f64,
    tz_offset_minutes: i32,
) -> (f64, f64) {
    if total_active_minutes <= 0.0 {
        return (0.0, 0.0);
    }

    let local_hour = (window.start - Duration::minutes(tz_offset_minutes as i64)).hour();
    let late_night = if local_hour < 5 { 1.0 } else { 0.0 };
    let early_morning = if (5..9).contains(&local_hour) { 1.0 } else { 0.0 };

    (late_night, early_morning)
}

fn count_type(sorted: &[&RawActivityEvent], event_type: EventType) -> u32 {
    sorted.iter().filter(|e| e.event_type == event_type).count() as u32
}

fn minutes_between(a: chrono::DateTime<chrono::Utc>, b: chrono::DateTime<chrono::Utc>) -> f64 {
    ms_to_minutes((b - a).num_milliseconds() as f64)
}

fn ms_to_minutes(ms: f64) -> f64 {
    ms / 60_000.0
}
