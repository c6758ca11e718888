//! Activity events: types, ingestion validation and producer-side batching.

pub mod buffer;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use buffer::{BufferConfig, BufferProducer, BufferStats, EventBuffer, FlushOutcome};
pub use types::{EventType, RawActivityEvent, Source};
pub use validate::{batch_items, validate_batch, IncomingEvent, IncomingTimestamp, Rejection, ValidatedBatch};
