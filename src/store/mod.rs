//! Storage contracts for raw events and computed windows.
//!
//! The engine never talks to a database directly. It reads events through
//! [`EventLog`] and persists windows through [`WindowStore`]; the store's
//! atomic upsert is the only concurrency guard for a window key.

pub mod memory;

use crate::core::aggregator::FeatureWindow;
use crate::core::windowing::{WindowAddress, WindowKey};
use crate::error::StorageError;
use crate::events::types::{RawActivityEvent, Source};
use serde::{Deserialize, Serialize};

pub use memory::{MemoryEventLog, MemoryWindowStore};

/// A document that could not be inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertFailure {
    /// Position in the submitted batch
    pub index: usize,
    pub reason: String,
}

/// Outcome of an unordered bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertReport {
    pub inserted: usize,
    pub failed: Vec<InsertFailure>,
}

/// Append-only store of raw activity events.
pub trait EventLog: Send + Sync {
    /// Insert events independently: well-formed documents are kept even if
    /// others in the same batch fail.
    fn insert_many(&self, events: Vec<RawActivityEvent>) -> Result<InsertReport, StorageError>;

    /// All events of `(user_id, source)` with `ts` in `[window.start, window.end)`,
    /// in arrival order.
    fn find_in_window(
        &self,
        user_id: &str,
        source: Source,
        window: &WindowAddress,
    ) -> Result<Vec<RawActivityEvent>, StorageError>;
}

/// Uniquely keyed cache of computed feature windows.
pub trait WindowStore: Send + Sync {
    fn find(&self, key: &WindowKey) -> Result<Option<FeatureWindow>, StorageError>;

    /// Write or fully replace the document with the same key, returning the
    /// stored document.
    fn upsert(&self, window: FeatureWindow) -> Result<FeatureWindow, StorageError>;
}
