//! Privacy-preserving transparency log.
//!
//! This module tracks and exposes counts of what the engine processed,
//! without storing any identifiers or event content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Processing counters since startup (or since the persisted baseline).
#[derive(Debug)]
pub struct TransparencyLog {
    /// Events accepted into the event log
    events_accepted: AtomicU64,
    /// Events dropped at validation or insert
    events_rejected: AtomicU64,
    /// Windows computed and upserted
    windows_computed: AtomicU64,
    /// Windows served from the store
    windows_reused: AtomicU64,
    /// Live updates handed to the notifier
    notifications_sent: AtomicU64,
    /// Scorer calls that failed or returned a malformed response
    scoring_failures: AtomicU64,
    /// Process start time
    started_at: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            events_accepted: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            windows_computed: AtomicU64::new(0),
            windows_reused: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            scoring_failures: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous transparency stats: {e}");
        }

        log
    }

    pub fn record_events_accepted(&self, count: u64) {
        self.events_accepted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_events_rejected(&self, count: u64) {
        self.events_rejected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_window_computed(&self) {
        self.windows_computed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_windows_reused(&self, count: u64) {
        self.windows_reused.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scoring_failure(&self) {
        self.scoring_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            windows_computed: self.windows_computed.load(Ordering::Relaxed),
            windows_reused: self.windows_reused.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            scoring_failures: self.scoring_failures.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Processing Statistics:\n\
             - Events accepted: {}\n\
             - Events rejected: {}\n\
             - Windows computed: {}\n\
             - Windows reused from store: {}\n\
             - Live updates sent: {}\n\
             - Scoring failures: {}\n\
             - Uptime: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - No keystrokes or screen content stored\n\
             - No URLs beyond an opaque site identifier\n\
             - Only hourly numeric summaries are derived",
            stats.events_accepted,
            stats.events_rejected,
            stats.windows_computed,
            stats.windows_reused,
            stats.notifications_sent,
            stats.scoring_failures,
            stats.uptime_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                events_accepted: stats.events_accepted,
                events_rejected: stats.events_rejected,
                windows_computed: stats.windows_computed,
                windows_reused: stats.windows_reused,
                notifications_sent: stats.notifications_sent,
                scoring_failures: stats.scoring_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.events_accepted
                    .store(persisted.events_accepted, Ordering::Relaxed);
                self.events_rejected
                    .store(persisted.events_rejected, Ordering::Relaxed);
                self.windows_computed
                    .store(persisted.windows_computed, Ordering::Relaxed);
                self.windows_reused
                    .store(persisted.windows_reused, Ordering::Relaxed);
                self.notifications_sent
                    .store(persisted.notifications_sent, Ordering::Relaxed);
                self.scoring_failures
                    .store(persisted.scoring_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub events_accepted: u64,
    pub events_rejected: u64,
    pub windows_computed: u64,
    pub windows_reused: u64,
    pub notifications_sent: u64,
    pub scoring_failures: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    events_accepted: u64,
    events_rejected: u64,
    windows_computed: u64,
    windows_reused: u64,
    #[serde(default)]
    notifications_sent: u64,
    #[serde(default)]
    scoring_failures: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
