//! End-to-end properties of window aggregation over the in-memory stores.

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use zentrack_aggregator::core::features::compute_features;
use zentrack_aggregator::store::InsertReport;
use zentrack_aggregator::{
    AggregationError, EventLog, EventType, FeatureAggregator, FeatureParams, MemoryEventLog,
    MemoryWindowStore, RangeRequest, RangeScheduler, RawActivityEvent, Source, StorageError,
    WindowAddress,
};

fn hour() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 10, 15, 0, 0).unwrap()
}

fn event(minutes: i64, event_type: EventType) -> RawActivityEvent {
    RawActivityEvent::new("u1", hour() + Duration::minutes(minutes), Source::Desktop, event_type)
}

/// Counts window reads so tests can see when aggregation work happens.
struct CountingEventLog {
    inner: MemoryEventLog,
    reads: AtomicUsize,
}

impl CountingEventLog {
    fn new() -> Self {
        Self {
            inner: MemoryEventLog::new(),
            reads: AtomicUsize::new(0),
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl EventLog for CountingEventLog {
    fn insert_many(&self, events: Vec<RawActivityEvent>) -> Result<InsertReport, StorageError> {
        self.inner.insert_many(events)
    }

    fn find_in_window(
        &self,
        user_id: &str,
        source: Source,
        window: &WindowAddress,
    ) -> Result<Vec<RawActivityEvent>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_in_window(user_id, source, window)
    }
}

fn scheduler_over(events: Arc<dyn EventLog>) -> RangeScheduler {
    let aggregator = FeatureAggregator::new(events, FeatureParams::default());
    RangeScheduler::new(aggregator, Arc::new(MemoryWindowStore::new()))
}

fn features_of(events: &[RawActivityEvent]) -> zentrack_aggregator::WindowFeatures {
    compute_features(
        events,
        &WindowAddress::containing(hour()),
        &FeatureParams::default(),
    )
}

#[test]
fn test_empty_window() {
    let f = features_of(&[]);
    assert_eq!(f.total_active_minutes, 60.0);
    assert_eq!(f.idle_minutes, 0.0);
    assert_eq!(f.app_switch_count, 0);
    assert_eq!(f.tab_switch_count, 0);
    assert_eq!(f.unique_apps, 0);
    assert_eq!(f.unique_websites, 0);
    assert_eq!(f.break_count, 0);
}

#[test]
fn test_one_idle_interval() {
    let f = features_of(&[event(5, EventType::IdleStart), event(20, EventType::IdleEnd)]);
    assert_eq!(f.idle_minutes, 15.0);
    assert_eq!(f.total_active_minutes, 45.0);
    assert_eq!(f.idle_ratio, 0.25);
}

#[test]
fn test_sessions_split_on_gap() {
    let f = features_of(&[
        event(0, EventType::ActivityPing),
        event(3, EventType::ActivityPing),
        event(4, EventType::ActivityPing),
        event(20, EventType::ActivityPing),
        event(21, EventType::ActivityPing),
    ]);
    assert_eq!(f.longest_continuous_session, 4.0);
    assert_eq!(f.avg_session_length, 2.5);
}

#[test]
fn test_switch_counts() {
    let f = features_of(&[
        event(1, EventType::AppSwitch).with_app("editor"),
        event(2, EventType::AppSwitch).with_app("terminal"),
        event(3, EventType::TabSwitch).with_website("docs"),
    ]);
    assert_eq!(f.app_switch_count, 2);
    assert_eq!(f.unique_apps, 2);
    assert_eq!(f.tab_switch_count, 1);
    assert_eq!(f.context_switch_rate, 3.0 / f.total_active_minutes);
}

#[test]
fn test_result_independent_of_input_order() {
    let events = vec![
        event(2, EventType::ActivityPing),
        event(5, EventType::IdleStart),
        event(5, EventType::AppSwitch).with_app("mail"),
        event(12, EventType::IdleEnd),
        event(30, EventType::BreakStart),
        event(40, EventType::BreakEnd),
        event(41, EventType::TabSwitch).with_website("news"),
        event(44, EventType::ActivityPing).with_tz_offset(-120),
    ];
    let forward = features_of(&events);

    let mut reversed = events.clone();
    reversed.reverse();
    assert_eq!(features_of(&reversed), forward);

    let mut rotated = events;
    rotated.rotate_left(3);
    assert_eq!(features_of(&rotated), forward);
}

#[test]
fn test_bounds_hold_for_arbitrary_inputs() {
    // xorshift, so the sample is the same on every run
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    for _ in 0..200 {
        let count = (next() % 40) as usize;
        let events: Vec<RawActivityEvent> = (0..count)
            .map(|_| {
                let event_type = EventType::ALL[(next() % EventType::ALL.len() as u64) as usize];
                let minute = (next() % 60) as i64;
                let mut e = event(minute, event_type);
                if next() % 3 == 0 {
                    e = e.with_duration_ms((next() % 10_000_000) as f64);
                }
                if next() % 4 == 0 {
                    e = e.with_tz_offset((next() % 1681) as i32 - 840);
                }
                e
            })
            .collect();

        let f = features_of(&events);
        assert!((0.0..=1.0).contains(&f.idle_ratio));
        for minutes in [
            f.total_active_minutes,
            f.longest_continuous_session,
            f.avg_session_length,
            f.idle_minutes,
            f.avg_break_length,
        ] {
            assert!((0.0..=60.0).contains(&minutes), "{minutes} out of bounds");
        }
        assert!(f.late_night_usage_ratio == 0.0 || f.late_night_usage_ratio == 1.0);
        assert!(f.early_morning_usage_ratio == 0.0 || f.early_morning_usage_ratio == 1.0);
        assert!(f.context_switch_rate.is_finite() && f.context_switch_rate >= 0.0);
        assert!(f.to_vector().iter().all(|v| v.is_finite()));
    }
}

#[test]
fn test_recompute_is_idempotent() {
    let log = Arc::new(MemoryEventLog::new());
    log.insert_many(vec![
        event(1, EventType::ActivityPing),
        event(10, EventType::IdleStart),
        event(25, EventType::IdleEnd),
        event(26, EventType::AppSwitch).with_app("editor"),
    ])
    .unwrap();
    let scheduler = scheduler_over(log);

    let first = scheduler.refresh("u1", hour(), Source::Desktop).unwrap();
    let second = scheduler.refresh("u1", hour(), Source::Desktop).unwrap();
    assert_eq!(second.features, first.features);
    assert_eq!(second.key(), first.key());
    assert_eq!(first.features.idle_minutes, 15.0);
}

#[test]
fn test_range_cardinality() {
    let scheduler = scheduler_over(Arc::new(MemoryEventLog::new()));
    let request = |from: DateTime<Utc>, to: DateTime<Utc>| RangeRequest {
        user_id: "u1".into(),
        source: Source::Desktop,
        from,
        to,
        force_recompute: false,
    };

    for n in [1, 2, 24, 168] {
        let report = scheduler
            .backfill(&request(hour(), hour() + Duration::hours(n - 1)))
            .unwrap();
        assert_eq!(report.windows.len() as i64, n);
    }

    let err = scheduler
        .backfill(&request(hour(), hour() + Duration::hours(168)))
        .unwrap_err();
    assert!(matches!(
        err,
        AggregationError::RangeTooLarge { hours: 169, max: 168 }
    ));

    let err = scheduler
        .backfill(&request(hour(), hour() - Duration::minutes(1)))
        .unwrap_err();
    assert!(matches!(err, AggregationError::InvalidRange(_)));
}

#[test]
fn test_second_backfill_reuses_stored_windows() {
    let log = Arc::new(CountingEventLog::new());
    log.insert_many(vec![event(5, EventType::TabSwitch).with_website("docs")])
        .unwrap();
    let scheduler = scheduler_over(log.clone());

    let request = RangeRequest {
        user_id: "u1".into(),
        source: Source::Desktop,
        from: hour() - Duration::hours(2),
        to: hour() + Duration::minutes(30),
        force_recompute: false,
    };

    let first = scheduler.backfill(&request).unwrap();
    assert_eq!(first.computed, 3);
    assert_eq!(log.reads(), 3);

    let second = scheduler.backfill(&request).unwrap();
    assert_eq!(log.reads(), 3);
    assert_eq!(second.reused, 3);
    assert_eq!(second.windows, first.windows);
    assert_eq!(second.windows[2].features.tab_switch_count, 1);

    let forced = scheduler
        .backfill(&RangeRequest {
            force_recompute: true,
            ..request
        })
        .unwrap();
    assert_eq!(forced.computed, 3);
    assert_eq!(log.reads(), 6);
}

#[test]
fn test_sources_are_isolated() {
    let log = Arc::new(MemoryEventLog::new());
    log.insert_many(vec![
        event(1, EventType::AppSwitch).with_app("editor"),
        RawActivityEvent::new("u1", hour() + Duration::minutes(2), Source::Web, EventType::AppSwitch)
            .with_app("browser"),
        RawActivityEvent::new("u2", hour() + Duration::minutes(3), Source::Desktop, EventType::AppSwitch)
            .with_app("other"),
    ])
    .unwrap();
    let scheduler = scheduler_over(log);

    let desktop = scheduler.refresh("u1", hour(), Source::Desktop).unwrap();
    let web = scheduler.refresh("u1", hour(), Source::Web).unwrap();
    assert_eq!(desktop.features.app_switch_count, 1);
    assert_eq!(web.features.app_switch_count, 1);
    assert_eq!(desktop.features.unique_apps, 1);
}
