//! Error types for Dwell

use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Storage backend unavailable")]
    Unavailable,

    #[error("Storage quota exceeded")]
    QuotaExceeded,

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Errors that can occur while tracking a session
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Milestone schedule is empty: no valid offsets in configured or fallback list")]
    EmptySchedule,

    #[error("Clock anomaly: now ({now}) is before the adjusted session start ({start})")]
    ClockAnomaly { now: i64, start: i64 },

    #[error("No writable storage backend available")]
    StorageBlocked,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
