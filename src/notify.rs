//! Live notification of freshly computed windows.
//!
//! Delivery is fire-and-forget: a failed or unobserved notification never
//! fails the aggregation that produced it.

use crate::core::aggregator::FeatureWindow;
use crate::scorer::FatigueScore;
use crate::transparency::SharedTransparencyLog;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;

/// Event name used for live window updates.
pub const METRICS_EVENT: &str = "usage:metrics";

/// Per-user channel name.
pub fn user_channel(user_id: &str) -> String {
    format!("user:{user_id}")
}

/// A window as pushed to dashboards, with the score attached when available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveWindowUpdate {
    #[serde(flatten)]
    pub window: FeatureWindow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatigue_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

impl LiveWindowUpdate {
    pub fn new(window: FeatureWindow, score: Option<FatigueScore>) -> Self {
        let (fatigue_score, severity) = match score {
            Some(s) => (Some(s.fatigue_score), Some(s.severity)),
            None => (None, None),
        };
        Self {
            window,
            fatigue_score,
            severity,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifier unavailable: {0}")]
    Unavailable(String),
}

/// Receives updated windows for live display.
pub trait Notifier: Send + Sync {
    /// Publish to the owning user's channel; returns how many subscribers
    /// received it.
    fn notify(&self, update: &LiveWindowUpdate) -> Result<usize, NotifyError>;
}

/// In-process notifier with one broadcast channel per user.
pub struct BroadcastNotifier {
    channels: Mutex<HashMap<String, broadcast::Sender<LiveWindowUpdate>>>,
    capacity: usize,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a user's live updates.
    pub fn subscribe(&self, user_id: &str) -> Result<broadcast::Receiver<LiveWindowUpdate>, NotifyError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| NotifyError::Unavailable("lock poisoned".to_string()))?;
        let sender = channels
            .entry(user_channel(user_id))
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.subscribe())
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, update: &LiveWindowUpdate) -> Result<usize, NotifyError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| NotifyError::Unavailable("lock poisoned".to_string()))?;
        let channel = user_channel(&update.window.user_id);

        let Some(sender) = channels.get(&channel) else {
            return Ok(0);
        };

        match sender.send(update.clone()) {
            Ok(receivers) => Ok(receivers),
            Err(_) => {
                // every subscriber has gone away
                channels.remove(&channel);
                Ok(0)
            }
        }
    }
}

/// Notify without letting a failure escape.
pub fn notify_best_effort(
    notifier: &dyn Notifier,
    update: &LiveWindowUpdate,
    log: Option<&SharedTransparencyLog>,
) {
    match notifier.notify(update) {
        Ok(receivers) => {
            if let Some(log) = log {
                log.record_notification_sent();
            }
            tracing::debug!(
                event = METRICS_EVENT,
                user_id = %update.window.user_id,
                receivers,
                "published live window"
            );
        }
        Err(e) => {
            tracing::warn!(user_id = %update.window.user_id, "live notification failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::WindowFeatures;
    use crate::core::windowing::WindowAddress;
    use crate::events::types::Source;
    use chrono::Utc;

    fn update(user_id: &str) -> LiveWindowUpdate {
        let window = FeatureWindow::new(
            user_id,
            WindowAddress::containing(Utc::now()),
            Source::Web,
            WindowFeatures::default(),
            Utc::now(),
        );
        LiveWindowUpdate::new(
            window,
            Some(FatigueScore {
                fatigue_score: 42.0,
                severity: "Mild".into(),
            }),
        )
    }

    #[tokio::test]
    async fn test_subscriber_receives_only_own_updates() {
        let notifier = BroadcastNotifier::default();
        let mut rx = notifier.subscribe("u1").unwrap();

        assert_eq!(notifier.notify(&update("u2")).unwrap(), 0);
        assert_eq!(notifier.notify(&update("u1")).unwrap(), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.window.user_id, "u1");
        assert_eq!(received.fatigue_score, Some(42.0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let notifier = BroadcastNotifier::default();
        let rx = notifier.subscribe("u1").unwrap();
        drop(rx);
        assert_eq!(notifier.notify(&update("u1")).unwrap(), 0);
        assert_eq!(notifier.notify(&update("u1")).unwrap(), 0);
    }

    #[test]
    fn test_update_serialization_flattens_window() {
        let value = serde_json::to_value(update("u1")).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["severity"], "Mild");
        assert!(value.get("window").is_none());
    }

    #[test]
    fn test_best_effort_counts_notifications() {
        let notifier = BroadcastNotifier::default();
        let log = crate::transparency::create_shared_log();
        notify_best_effort(&notifier, &update("u1"), Some(&log));
        assert_eq!(log.stats().notifications_sent, 1);
    }
}
