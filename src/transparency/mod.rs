//! Transparency module.
//!
//! Tracks what the engine processed, so operators and users can audit
//! collection without the log itself holding personal data.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
