//! Zentrack Aggregator - hourly usage feature windows for fatigue scoring.
//!
//! This library turns a stream of privacy-safe activity events (pings, idle
//! and break markers, app/tab switches) into one fixed-size summary per user,
//! per source, per UTC hour. Those summaries feed an external fatigue scorer
//! and live dashboards.
//!
//! # Privacy Guarantees
//!
//! - **No content**: Events carry only a signal kind, a timestamp and opaque
//!   app/site identifiers
//! - **Derived numbers only**: Windows hold 14 numeric features, nothing else
//! - **Recomputable**: Windows are always derived from raw events and can be
//!   regenerated at any time
//! - **Transparency**: All processing is counted and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Zentrack Aggregator                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────────────┐    │
//! │  │  Validate  │──▶│  EventLog  │──▶│ FeatureAggregator  │    │
//! │  │  (ingest)  │   │  (store)   │   │ (1h UTC windows)   │    │
//! │  └────────────┘   └────────────┘   └────────────────────┘    │
//! │                                             │                │
//! │                                             ▼                │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────────────┐    │
//! │  │  Notifier  │◀──│   Scorer   │◀──│ RangeScheduler +   │    │
//! │  │ (user:{id})│   │ (optional) │   │   WindowStore      │    │
//! │  └────────────┘   └────────────┘   └────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use zentrack_aggregator::{
//!     FeatureAggregator, FeatureParams, IngestPipeline, MemoryEventLog, MemoryWindowStore,
//!     RangeScheduler,
//! };
//!
//! let events = Arc::new(MemoryEventLog::new());
//! let aggregator = FeatureAggregator::new(events.clone(), FeatureParams::default());
//! let scheduler = RangeScheduler::new(aggregator, Arc::new(MemoryWindowStore::new()));
//! let pipeline = IngestPipeline::new(events, scheduler);
//!
//! let body = serde_json::json!([{"eventType": "activity_ping", "source": "web"}]);
//! let outcome = pipeline.ingest("user-1", body, chrono::Utc::now()).unwrap();
//! assert_eq!(outcome.inserted, 1);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod ingest;
pub mod notify;
pub mod replay;
pub mod scorer;
pub mod store;
pub mod transparency;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::Config;
pub use core::{
    compute_features, FeatureAggregator, FeatureParams, FeatureWindow, RangeReport, RangeRequest,
    RangeScheduler, WindowAddress, WindowFeatures, WindowKey,
};
pub use error::{AggregationError, StorageError};
pub use events::{EventType, IncomingEvent, RawActivityEvent, Source};
pub use ingest::{IngestOutcome, IngestPipeline};
pub use notify::{BroadcastNotifier, LiveWindowUpdate, Notifier};
pub use store::{EventLog, MemoryEventLog, MemoryWindowStore, WindowStore};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

// Scorer client re-exports (when enabled)
#[cfg(feature = "scorer")]
pub use scorer::ScorerClient;
pub use scorer::{FatigueScore, ScorerConfig, ScorerError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║            ZENTRACK AGGREGATOR - PRIVACY DECLARATION             ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This service summarizes activity signals into hourly windows.   ║
║                                                                  ║
║  ✓ WHAT WE RECEIVE:                                              ║
║    • When you were active, idle or on a break (timing only)      ║
║    • That an app or tab switch happened                          ║
║    • An opaque app or site name, if your client sends one        ║
║    • Your timezone offset (for time-of-day features)             ║
║                                                                  ║
║  ✗ WHAT WE NEVER RECEIVE:                                        ║
║    • Keystrokes or anything you type                             ║
║    • Screen content or full page URLs                            ║
║    • Cursor position                                             ║
║                                                                  ║
║  Only 14 numbers per hour are derived from these signals and     ║
║  sent to the fatigue scorer.                                     ║
║                                                                  ║
║  You can view processing statistics anytime with:                ║
║    zentrack-agg status                                           ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
