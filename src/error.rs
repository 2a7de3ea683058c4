//! Engine-level error taxonomy.
//!
//! Stage failures (fetch/convert/transcribe/persist) are per-item and never
//! surface here; they end up in the item's `error_message`. These errors are
//! the ones callers of the engine API see directly.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::RunStatus;
use crate::store::QueueError;

/// Errors returned by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or unsupported source; rejected before it enters the queue
    #[error("invalid source: {0}")]
    Validation(String),

    /// Operation conflicts with the current run state
    #[error("a run is active (status: {0}); wait for it to finish or cancel items")]
    RunActive(RunStatus),

    /// Operation requires a different item state than the current one
    #[error("item {id} is {status}, expected {expected}")]
    ItemConflict {
        id: Uuid,
        status: String,
        expected: String,
    },

    /// Unknown item id
    #[error("queue item not found: {0}")]
    NotFound(Uuid),

    /// Queue storage failure (structural; not a per-item error)
    #[error("queue storage error: {0}")]
    Queue(#[from] QueueError),

    /// Filesystem failure outside the queue log
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Map a queue lookup failure to the caller-facing error: an unknown id is
/// `NotFound`, anything else stays a storage error.
pub(crate) fn lookup_err(e: QueueError) -> EngineError {
    match e {
        QueueError::NotFound(id) => EngineError::NotFound(id),
        other => EngineError::Queue(other),
    }
}
