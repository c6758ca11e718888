//! Feature aggregation: events of one window in, one `FeatureWindow` out.

use crate::core::features::{compute_features, FeatureParams, WindowFeatures};
use crate::core::windowing::{WindowAddress, WindowKey};
use crate::error::AggregationError;
use crate::events::types::Source;
use crate::store::EventLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One computed hourly summary, keyed by `(user_id, window_start, source)`.
///
/// Always derived from raw events and overwritten in place on recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureWindow {
    pub user_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub source: Source,
    #[serde(flatten)]
    pub features: WindowFeatures,
    /// Time of the last computation
    pub computed_at: DateTime<Utc>,
}

impl FeatureWindow {
    pub fn new(
        user_id: impl Into<String>,
        window: WindowAddress,
        source: Source,
        features: WindowFeatures,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            window_start: window.start,
            window_end: window.end,
            source,
            features,
            computed_at,
        }
    }

    pub fn key(&self) -> WindowKey {
        WindowKey::new(self.user_id.clone(), self.window_start, self.source)
    }
}

/// Reads a window's events and computes its features.
///
/// Does not persist anything; see [`RangeScheduler`](crate::core::RangeScheduler)
/// and [`IngestPipeline`](crate::ingest::IngestPipeline) for that.
#[derive(Clone)]
pub struct FeatureAggregator {
    events: Arc<dyn EventLog>,
    params: FeatureParams,
}

impl FeatureAggregator {
    pub fn new(events: Arc<dyn EventLog>, params: FeatureParams) -> Self {
        Self { events, params }
    }

    pub fn params(&self) -> &FeatureParams {
        &self.params
    }

    /// Compute the window starting at `window_start`.
    ///
    /// `window_start` must be hour-aligned; it is never re-floored.
    pub fn compute(
        &self,
        user_id: &str,
        window_start: DateTime<Utc>,
        source: Source,
    ) -> Result<FeatureWindow, AggregationError> {
        self.compute_at(user_id, window_start, source, Utc::now())
    }

    /// Same as [`compute`](Self::compute) with an explicit `computed_at`.
    pub fn compute_at(
        &self,
        user_id: &str,
        window_start: DateTime<Utc>,
        source: Source,
        now: DateTime<Utc>,
    ) -> Result<FeatureWindow, AggregationError> {
        let window = WindowAddress::from_start(window_start)
            .ok_or_else(|| AggregationError::InvalidWindow(window_start.to_rfc3339()))?;

        let events = self.events.find_in_window(user_id, source, &window)?;
        let features = compute_features(&events, &window, &self.params);

        tracing::debug!(
            user_id,
            source = %source,
            window_start = %window.start,
            events = events.len(),
            active_minutes = features.total_active_minutes,
            "computed feature window"
        );

        Ok(FeatureWindow::new(user_id, window, source, features, now))
    }
}
