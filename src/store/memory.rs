//! In-process storage backed by `RwLock`-guarded maps.

use crate::core::aggregator::FeatureWindow;
use crate::core::windowing::{WindowAddress, WindowKey};
use crate::error::StorageError;
use crate::events::types::{RawActivityEvent, Source, MAX_IDENTIFIER_LEN};
use crate::store::{EventLog, InsertFailure, InsertReport, WindowStore};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Unavailable("lock poisoned".to_string())
}

#[derive(Debug, Default)]
struct EventLogInner {
    /// Events in arrival order, per (user, source)
    streams: HashMap<(String, Source), Vec<RawActivityEvent>>,
    ids: HashSet<Uuid>,
}

/// Event log kept in memory.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    inner: RwLock<EventLogInner>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events.
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Schema checks the log enforces on every document.
fn check_document(event: &RawActivityEvent) -> Result<(), String> {
    if event.user_id.is_empty() {
        return Err("missing userId".to_string());
    }
    for (field, value) in [("app", &event.app), ("website", &event.website)] {
        if value.as_ref().is_some_and(|v| v.chars().count() > MAX_IDENTIFIER_LEN) {
            return Err(format!("{field} too long"));
        }
    }
    if event.duration_ms.is_some_and(|ms| !ms.is_finite() || ms < 0.0) {
        return Err("durationMs must be >= 0".to_string());
    }
    Ok(())
}

impl EventLog for MemoryEventLog {
    fn insert_many(&self, events: Vec<RawActivityEvent>) -> Result<InsertReport, StorageError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let mut report = InsertReport::default();

        for (index, event) in events.into_iter().enumerate() {
            if let Err(reason) = check_document(&event) {
                report.failed.push(InsertFailure { index, reason });
                continue;
            }
            if !inner.ids.insert(event.id) {
                report.failed.push(InsertFailure {
                    index,
                    reason: format!("duplicate id {}", event.id),
                });
                continue;
            }
            inner
                .streams
                .entry((event.user_id.clone(), event.source))
                .or_default()
                .push(event);
            report.inserted += 1;
        }

        Ok(report)
    }

    fn find_in_window(
        &self,
        user_id: &str,
        source: Source,
        window: &WindowAddress,
    ) -> Result<Vec<RawActivityEvent>, StorageError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .streams
            .get(&(user_id.to_string(), source))
            .map(|events| {
                events
                    .iter()
                    .filter(|e| window.contains(e.ts))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Window store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: RwLock<HashMap<WindowKey, FeatureWindow>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.read().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WindowStore for MemoryWindowStore {
    fn find(&self, key: &WindowKey) -> Result<Option<FeatureWindow>, StorageError> {
        let windows = self.windows.read().map_err(poisoned)?;
        Ok(windows.get(key).cloned())
    }

    fn upsert(&self, window: FeatureWindow) -> Result<FeatureWindow, StorageError> {
        let mut windows = self.windows.write().map_err(poisoned)?;
        windows.insert(window.key(), window.clone());
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::WindowFeatures;
    use crate::events::types::EventType;
    use chrono::{Duration, TimeZone, Utc};

    fn window() -> WindowAddress {
        WindowAddress::containing(Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap())
    }

    #[test]
    fn test_find_filters_by_user_source_and_window() {
        let log = MemoryEventLog::new();
        let w = window();
        let events = vec![
            RawActivityEvent::new("u1", w.start, Source::Web, EventType::ActivityPing),
            RawActivityEvent::new("u1", w.end - Duration::milliseconds(1), Source::Web, EventType::TabSwitch),
            RawActivityEvent::new("u1", w.end, Source::Web, EventType::TabSwitch),
            RawActivityEvent::new("u1", w.start, Source::Desktop, EventType::AppSwitch),
            RawActivityEvent::new("u2", w.start, Source::Web, EventType::ActivityPing),
        ];
        let report = log.insert_many(events).unwrap();
        assert_eq!(report.inserted, 5);

        let found = log.find_in_window("u1", Source::Web, &w).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].event_type, EventType::ActivityPing);
        assert!(log.find_in_window("u3", Source::Web, &w).unwrap().is_empty());
    }

    #[test]
    fn test_insert_many_is_unordered() {
        let log = MemoryEventLog::new();
        let good = RawActivityEvent::new("u1", window().start, Source::Web, EventType::ActivityPing);
        let duplicate = good.clone();
        let bad = RawActivityEvent::new("u1", window().start, Source::Web, EventType::IdleEnd)
            .with_duration_ms(-5.0);
        let later = RawActivityEvent::new("u1", window().start, Source::Web, EventType::TabSwitch);

        let report = log.insert_many(vec![good, duplicate, bad, later]).unwrap();
        assert_eq!(report.inserted, 2);
        let failed: Vec<usize> = report.failed.iter().map(|f| f.index).collect();
        assert_eq!(failed, vec![1, 2]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_upsert_replaces_by_key() {
        let store = MemoryWindowStore::new();
        let w = window();
        let mut doc = FeatureWindow::new("u1", w, Source::Web, WindowFeatures::default(), Utc::now());
        store.upsert(doc.clone()).unwrap();

        doc.features.tab_switch_count = 4;
        store.upsert(doc.clone()).unwrap();

        assert_eq!(store.len(), 1);
        let stored = store.find(&doc.key()).unwrap().unwrap();
        assert_eq!(stored.features.tab_switch_count, 4);

        let other = WindowKey::new("u1", w.start, Source::Mobile);
        assert!(store.find(&other).unwrap().is_none());
    }
}
