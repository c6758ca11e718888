//! Range backfill and cached window lookup.
//!
//! Hours are processed sequentially in ascending order. A stored window is
//! reused unless recomputation is forced; otherwise it is computed and
//! upserted. The number of hours per request is capped.

use crate::core::aggregator::{FeatureAggregator, FeatureWindow};
use crate::core::windowing::{floor_to_hour, hours_spanned, WindowAddress, WindowKey};
use crate::error::AggregationError;
use crate::events::types::Source;
use crate::store::WindowStore;
use crate::transparency::SharedTransparencyLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default cap on hours per range request (one week).
pub const MAX_RANGE_HOURS: i64 = 168;

/// A request to (re)compute consecutive hourly windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeRequest {
    pub user_id: String,
    pub source: Source,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default)]
    pub force_recompute: bool,
}

/// Result of a range request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RangeReport {
    /// One window per hour, ascending
    pub windows: Vec<FeatureWindow>,
    /// Windows freshly computed and upserted
    pub computed: usize,
    /// Windows served from the store unchanged
    pub reused: usize,
}

/// Drives the aggregator and the window store across hours.
#[derive(Clone)]
pub struct RangeScheduler {
    aggregator: FeatureAggregator,
    windows: Arc<dyn WindowStore>,
    max_hours: i64,
    transparency: Option<SharedTransparencyLog>,
}

impl RangeScheduler {
    pub fn new(aggregator: FeatureAggregator, windows: Arc<dyn WindowStore>) -> Self {
        Self {
            aggregator,
            windows,
            max_hours: MAX_RANGE_HOURS,
            transparency: None,
        }
    }

    /// Lower the per-request hour cap. Values outside `1..=MAX_RANGE_HOURS` are clamped.
    pub fn with_max_hours(mut self, max_hours: i64) -> Self {
        self.max_hours = max_hours.clamp(1, MAX_RANGE_HOURS);
        self
    }

    pub fn with_transparency_log(mut self, log: SharedTransparencyLog) -> Self {
        self.transparency = Some(log);
        self
    }

    pub fn aggregator(&self) -> &FeatureAggregator {
        &self.aggregator
    }

    pub fn max_hours(&self) -> i64 {
        self.max_hours
    }

    /// First window and hour count for `[from, to]`, or the reason the range
    /// is refused. Nothing is read or written.
    pub fn plan(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(WindowAddress, i64), AggregationError> {
        if to < from {
            return Err(AggregationError::InvalidRange(format!(
                "to ({to}) is before from ({from})"
            )));
        }

        let hours = hours_spanned(from, to);
        if hours <= 0 {
            return Err(AggregationError::InvalidRange(format!(
                "{hours} hours between {from} and {to}"
            )));
        }
        if hours > self.max_hours {
            return Err(AggregationError::RangeTooLarge {
                hours,
                max: self.max_hours,
            });
        }

        Ok((WindowAddress::containing(from), hours))
    }

    /// Compute or reuse every hourly window between `from` and `to`.
    ///
    /// The returned list always has one entry per hour, regardless of cache
    /// hits.
    pub fn backfill(&self, request: &RangeRequest) -> Result<RangeReport, AggregationError> {
        let (mut window, hours) = self.plan(request.from, request.to)?;
        let mut report = RangeReport {
            windows: Vec::with_capacity(hours as usize),
            ..Default::default()
        };

        for _ in 0..hours {
            let cached = if request.force_recompute {
                None
            } else {
                self.windows.find(&WindowKey::new(
                    request.user_id.clone(),
                    window.start,
                    request.source,
                ))?
            };

            match cached {
                Some(existing) => {
                    report.reused += 1;
                    report.windows.push(existing);
                }
                None => {
                    let stored = self.refresh(&request.user_id, window.start, request.source)?;
                    report.computed += 1;
                    report.windows.push(stored);
                }
            }

            window = window.next();
        }

        if let Some(log) = &self.transparency {
            log.record_windows_reused(report.reused as u64);
        }

        tracing::info!(
            user_id = %request.user_id,
            source = %request.source,
            hours,
            computed = report.computed,
            reused = report.reused,
            force = request.force_recompute,
            "range backfill complete"
        );

        Ok(report)
    }

    /// Recompute one window and upsert it, returning the stored document.
    pub fn refresh(
        &self,
        user_id: &str,
        window_start: DateTime<Utc>,
        source: Source,
    ) -> Result<FeatureWindow, AggregationError> {
        let computed = self.aggregator.compute(user_id, window_start, source)?;
        let stored = self.windows.upsert(computed)?;
        if let Some(log) = &self.transparency {
            log.record_window_computed();
        }
        Ok(stored)
    }

    /// The window enclosing `now`, reused if stored, else computed and upserted.
    pub fn current(
        &self,
        user_id: &str,
        source: Source,
        now: DateTime<Utc>,
    ) -> Result<FeatureWindow, AggregationError> {
        let window_start = floor_to_hour(now);
        if let Some(existing) = self
            .windows
            .find(&WindowKey::new(user_id, window_start, source))?
        {
            if let Some(log) = &self.transparency {
                log.record_windows_reused(1);
            }
            return Ok(existing);
        }
        self.refresh(user_id, window_start, source)
    }
}
