//! Core aggregation engine.
//!
//! This module contains:
//! - Window addressing for hour-aligned UTC windows
//! - Pure feature computation from a window's events
//! - The aggregator that reads events and assembles feature windows
//! - The range scheduler for cached backfill

pub mod aggregator;
pub mod features;
pub mod scheduler;
pub mod windowing;

// Re-export commonly used types
pub use aggregator::{FeatureAggregator, FeatureWindow};
pub use features::{compute_features, FeatureParams, WindowFeatures, FEATURE_COUNT, FEATURE_NAMES};
pub use scheduler::{RangeReport, RangeRequest, RangeScheduler, MAX_RANGE_HOURS};
pub use windowing::{floor_to_hour, is_hour_aligned, WindowAddress, WindowKey};
