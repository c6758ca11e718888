//! Event ingestion: validate, persist, then refresh the affected window.

use crate::core::aggregator::FeatureWindow;
use crate::core::scheduler::RangeScheduler;
use crate::core::windowing::floor_to_hour;
use crate::error::{AggregationError, StorageError};
use crate::events::types::RawActivityEvent;
use crate::events::validate::{batch_items, validate_batch, Rejection};
use crate::store::EventLog;
use crate::transparency::SharedTransparencyLog;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// What one ingestion request produced.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// The refreshed window of the last accepted event
    pub window: FeatureWindow,
    /// Events that reached the event log
    pub inserted: usize,
    /// Events dropped at validation or insert, by batch position
    pub rejected: Vec<Rejection>,
}

/// Accepts client batches for a user and keeps their current window fresh.
#[derive(Clone)]
pub struct IngestPipeline {
    events: Arc<dyn EventLog>,
    scheduler: RangeScheduler,
    transparency: Option<SharedTransparencyLog>,
}

impl IngestPipeline {
    pub fn new(events: Arc<dyn EventLog>, scheduler: RangeScheduler) -> Self {
        Self {
            events,
            scheduler,
            transparency: None,
        }
    }

    pub fn with_transparency_log(mut self, log: SharedTransparencyLog) -> Self {
        self.transparency = Some(log);
        self
    }

    pub fn scheduler(&self) -> &RangeScheduler {
        &self.scheduler
    }

    /// Ingest a request body (array, `{events: [...]}` or single object).
    pub fn ingest(
        &self,
        user_id: &str,
        body: Value,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, AggregationError> {
        let items = batch_items(body);
        let submitted = items.len();
        let batch = validate_batch(user_id, items, now)?;

        // Batch positions of the validated events, for mapping insert failures
        // back onto the submitted array.
        let positions = accepted_positions(submitted, &batch.rejected);
        let mut rejected = batch.rejected;

        let events = batch.events;
        let anchor = events.clone();
        let report = self.events.insert_many(events)?;

        let mut failed_local = vec![false; anchor.len()];
        for failure in &report.failed {
            if let Some(slot) = failed_local.get_mut(failure.index) {
                *slot = true;
            }
            rejected.push(Rejection {
                index: positions.get(failure.index).copied().unwrap_or(failure.index),
                reason: failure.reason.clone(),
            });
        }
        rejected.sort_by_key(|r| r.index);

        if let Some(log) = &self.transparency {
            log.record_events_accepted(report.inserted as u64);
            log.record_events_rejected(rejected.len() as u64);
        }

        let last = last_inserted(&anchor, &failed_local).ok_or_else(|| {
            StorageError::Rejected(format!("none of {} events could be stored", anchor.len()))
        })?;

        let window = self
            .scheduler
            .refresh(user_id, floor_to_hour(last.ts), last.source)?;

        tracing::info!(
            user_id,
            inserted = report.inserted,
            rejected = rejected.len(),
            window_start = %window.window_start,
            source = %window.source,
            "ingested activity events"
        );

        Ok(IngestOutcome {
            window,
            inserted: report.inserted,
            rejected,
        })
    }
}

fn accepted_positions(submitted: usize, rejected: &[Rejection]) -> Vec<usize> {
    let mut skip = rejected.iter().map(|r| r.index).peekable();
    let mut positions = Vec::with_capacity(submitted.saturating_sub(rejected.len()));
    for index in 0..submitted {
        if skip.peek() == Some(&index) {
            skip.next();
        } else {
            positions.push(index);
        }
    }
    positions
}

fn last_inserted<'a>(
    events: &'a [RawActivityEvent],
    failed: &[bool],
) -> Option<&'a RawActivityEvent> {
    events
        .iter()
        .zip(failed)
        .rev()
        .find(|(_, failed)| !**failed)
        .map(|(event, _)| event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregator::FeatureAggregator;
    use crate::core::features::FeatureParams;
    use crate::events::types::Source;
    use crate::core::aggregator::FeatureWindow;
    use crate::core::windowing::{WindowAddress, WindowKey};
    use crate::store::{InsertFailure, InsertReport, MemoryEventLog, MemoryWindowStore, WindowStore};
    use crate::transparency::create_shared_log;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 14, 40, 0).unwrap()
    }

    fn pipeline_with(events: Arc<dyn EventLog>) -> IngestPipeline {
        let aggregator = FeatureAggregator::new(events.clone(), FeatureParams::default());
        let scheduler = RangeScheduler::new(aggregator, Arc::new(MemoryWindowStore::new()));
        IngestPipeline::new(events, scheduler)
    }

    #[test]
    fn test_ingest_refreshes_window_of_last_event() {
        let log = create_shared_log();
        let pipeline = pipeline_with(Arc::new(MemoryEventLog::new())).with_transparency_log(log.clone());

        let outcome = pipeline
            .ingest(
                "u1",
                json!([
                    {"eventType": "activity_ping", "source": "web", "ts": "2024-05-06T13:10:00Z"},
                    {"eventType": "tab_switch", "source": "web", "ts": "2024-05-06T14:05:00Z"},
                    {"eventType": "bogus"},
                    {"eventType": "tab_switch", "source": "web", "ts": "2024-05-06T14:06:00Z"},
                ]),
                now(),
            )
            .unwrap();

        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].index, 2);
        assert_eq!(
            outcome.window.window_start,
            Utc.with_ymd_and_hms(2024, 5, 6, 14, 0, 0).unwrap()
        );
        assert_eq!(outcome.window.source, Source::Web);
        assert_eq!(outcome.window.features.tab_switch_count, 2);

        let stats = log.stats();
        assert_eq!(stats.events_accepted, 3);
        assert_eq!(stats.events_rejected, 1);
        assert_eq!(stats.windows_computed, 1);
    }

    #[test]
    fn test_ingest_single_object_defaults_to_now() {
        let pipeline = pipeline_with(Arc::new(MemoryEventLog::new()));
        let outcome = pipeline
            .ingest("u1", json!({"eventType": "activity_ping"}), now())
            .unwrap();
        assert_eq!(outcome.window.source, Source::Unknown);
        assert_eq!(outcome.window.window_start, floor_to_hour(now()));
    }

    #[test]
    fn test_ingest_all_invalid_is_client_error() {
        let pipeline = pipeline_with(Arc::new(MemoryEventLog::new()));
        let err = pipeline
            .ingest("u1", json!([{"eventType": "nope"}]), now())
            .unwrap_err();
        assert!(err.is_client_error());
    }

    /// Fails the last document of every batch.
    struct FailLast(MemoryEventLog);

    impl EventLog for FailLast {
        fn insert_many(&self, mut events: Vec<RawActivityEvent>) -> Result<InsertReport, StorageError> {
            let index = events.len() - 1;
            events.pop();
            let mut report = self.0.insert_many(events)?;
            report.failed.push(InsertFailure {
                index,
                reason: "write conflict".into(),
            });
            Ok(report)
        }

        fn find_in_window(
            &self,
            user_id: &str,
            source: Source,
            window: &WindowAddress,
        ) -> Result<Vec<RawActivityEvent>, StorageError> {
            self.0.find_in_window(user_id, source, window)
        }
    }

    #[test]
    fn test_insert_failures_map_to_batch_positions() {
        let pipeline = pipeline_with(Arc::new(FailLast(MemoryEventLog::new())));
        let outcome = pipeline
            .ingest(
                "u1",
                json!([
                    {"eventType": "activity_ping", "source": "desktop", "ts": "2024-05-06T12:10:00Z"},
                    {"eventType": "nope"},
                    {"eventType": "activity_ping", "source": "mobile", "ts": "2024-05-06T14:10:00Z"},
                ]),
                now(),
            )
            .unwrap();

        assert_eq!(outcome.inserted, 1);
        let indexes: Vec<usize> = outcome.rejected.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![1, 2]);
        // the failed mobile event does not pick the window
        assert_eq!(outcome.window.source, Source::Desktop);
        assert_eq!(
            outcome.window.window_start,
            Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
        );
    }

    /// A window store that is down.
    struct Offline;

    impl WindowStore for Offline {
        fn find(&self, _key: &WindowKey) -> Result<Option<FeatureWindow>, StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }

        fn upsert(&self, _window: FeatureWindow) -> Result<FeatureWindow, StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn test_counts_survive_failed_refresh() {
        let log = create_shared_log();
        let events: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
        let aggregator = FeatureAggregator::new(events.clone(), FeatureParams::default());
        let pipeline = IngestPipeline::new(events, RangeScheduler::new(aggregator, Arc::new(Offline)))
            .with_transparency_log(log.clone());

        let err = pipeline
            .ingest(
                "u1",
                json!([
                    {"eventType": "activity_ping", "source": "web", "ts": "2024-05-06T14:05:00Z"},
                    {"eventType": "bogus"},
                    {"eventType": "activity_ping", "source": "web", "ts": "2024-05-06T14:06:00Z"},
                ]),
                now(),
            )
            .unwrap_err();
        assert!(!err.is_client_error());

        // both events are in the log even though their window is not
        let stats = log.stats();
        assert_eq!(stats.events_accepted, 2);
        assert_eq!(stats.events_rejected, 1);
        assert_eq!(stats.windows_computed, 0);
    }

    #[test]
    fn test_accepted_positions_skip_rejections() {
        let rejected = vec![
            Rejection { index: 0, reason: "x".into() },
            Rejection { index: 3, reason: "y".into() },
        ];
        assert_eq!(accepted_positions(5, &rejected), vec![1, 2, 4]);
    }
}
