//! Error types for the usage feature aggregation engine.

use thiserror::Error;

/// Failures raised by an [`EventLog`](crate::store::EventLog) or
/// [`WindowStore`](crate::store::WindowStore) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage rejected document: {0}")]
    Rejected(String),
}

/// Errors that can occur while ingesting events or computing windows.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Window start {0} is not aligned to an hour boundary")]
    InvalidWindow(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Range too large: {hours} hours requested (max {max} hours)")]
    RangeTooLarge { hours: i64, max: i64 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AggregationError {
    /// Whether the error was caused by the caller rather than by storage.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, AggregationError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_too_large_message() {
        let err = AggregationError::RangeTooLarge { hours: 169, max: 168 };
        assert_eq!(
            err.to_string(),
            "Range too large: 169 hours requested (max 168 hours)"
        );
        assert!(err.is_client_error());
    }

    #[test]
    fn test_storage_error_is_not_client_error() {
        let err: AggregationError = StorageError::Unavailable("lock poisoned".into()).into();
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("lock poisoned"));
    }
}
