//! Offline replay of recorded events.
//!
//! Reads JSON Lines (one client event per line), feeds them through an
//! [`EventBuffer`] into the ingest pipeline, then backfills every hour the
//! replayed events span. Every hour a delivered batch touches is refreshed
//! right after the batch lands, so the backfill can reuse stored windows.

use crate::core::aggregator::FeatureWindow;
use crate::core::scheduler::RangeRequest;
use crate::core::windowing::{floor_to_hour, window_length};
use crate::error::AggregationError;
use crate::events::buffer::{BufferConfig, BufferStats, EventBuffer};
use crate::events::types::Source;
use crate::events::validate::IncomingEvent;
use crate::ingest::IngestPipeline;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::io::BufRead;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to read events: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Events per delivered batch
    pub batch_size: usize,
    /// Recompute windows even if already stored
    pub force_recompute: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            force_recompute: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    /// Non-empty lines read
    pub lines: usize,
    /// Lines that were not an event object
    pub malformed: usize,
    /// Events dropped by validation or insert
    pub rejected: usize,
    pub buffer: BufferStats,
    /// Backfilled windows, grouped by source then ascending by hour
    pub windows: Vec<FeatureWindow>,
}

#[derive(Default)]
struct Span {
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
    sources: Vec<Source>,
}

/// Timestamp and source an event will be stored under, if it parses.
fn placement(event: &IncomingEvent, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Source)> {
    let ts = match &event.ts {
        Some(ts) => ts.parse().ok()?,
        None => now,
    };
    let source = match event.source.as_deref() {
        Some(s) => s.parse::<Source>().ok()?,
        None => Source::Unknown,
    };
    Some((ts, source))
}

/// Distinct `(source, hour)` windows a batch lands in, in first-seen order.
fn touched_windows(batch: &[IncomingEvent], now: DateTime<Utc>) -> Vec<(Source, DateTime<Utc>)> {
    let mut touched = Vec::new();
    for (ts, source) in batch.iter().filter_map(|event| placement(event, now)) {
        let key = (source, floor_to_hour(ts));
        if !touched.contains(&key) {
            touched.push(key);
        }
    }
    touched
}

impl Span {
    fn observe(&mut self, event: &IncomingEvent, now: DateTime<Utc>) {
        let Some((ts, source)) = placement(event, now) else {
            return;
        };

        self.first = Some(self.first.map_or(ts, |first| first.min(ts)));
        self.last = Some(self.last.map_or(ts, |last| last.max(ts)));
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
    }
}

/// Replay `reader` as `user_id` through `pipeline`.
pub fn replay<R: BufRead>(
    reader: R,
    user_id: &str,
    pipeline: &IngestPipeline,
    options: &ReplayOptions,
) -> Result<ReplayReport, ReplayError> {
    let batch_size = options.batch_size.max(1);
    let mut buffer = EventBuffer::new(BufferConfig {
        capacity: batch_size,
        flush_size: batch_size,
        flush_interval: Duration::MAX,
    });
    let now = Utc::now();
    let mut report = ReplayReport::default();
    let mut span = Span::default();

    let deliver = |batch: Vec<IncomingEvent>, rejected: &mut usize| {
        let touched = touched_windows(&batch, now);
        let body = Value::Array(
            batch
                .into_iter()
                .filter_map(|event| serde_json::to_value(event).ok())
                .collect(),
        );
        let outcome = pipeline.ingest(user_id, body, now)?;
        *rejected += outcome.rejected.len();

        // ingest only refreshes the last event's window
        for (source, hour) in touched {
            if source == outcome.window.source && hour == outcome.window.window_start {
                continue;
            }
            pipeline.scheduler().refresh(user_id, hour, source)?;
        }
        Ok::<(), AggregationError>(())
    };

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        report.lines += 1;

        let event: IncomingEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(line = number + 1, "skipping malformed event: {e}");
                report.malformed += 1;
                continue;
            }
        };
        span.observe(&event, now);
        buffer.push(event);
        buffer.flush_if_due(|batch| deliver(batch, &mut report.rejected));
    }
    buffer.flush(|batch| deliver(batch, &mut report.rejected));
    report.buffer = buffer.stats();

    if let (Some(first), Some(last)) = (span.first, span.last) {
        let scheduler = pipeline.scheduler();
        let chunk = ChronoDuration::hours(scheduler.max_hours() - 1);

        for source in span.sources {
            let mut from = floor_to_hour(first);
            while from <= last {
                let to = (from + chunk).min(last);
                let range = scheduler.backfill(&RangeRequest {
                    user_id: user_id.to_string(),
                    source,
                    from,
                    to,
                    force_recompute: options.force_recompute,
                })?;
                report.windows.extend(range.windows);
                from = floor_to_hour(to) + window_length();
            }
        }
    }

    tracing::info!(
        user_id,
        lines = report.lines,
        malformed = report.malformed,
        rejected = report.rejected,
        windows = report.windows.len(),
        "replay complete"
    );

    Ok(report)
}
