//! Durable storage: the queue log and the transcript database.

pub mod queue;
pub mod transcripts;

pub use queue::{QueueError, QueueStore};
pub use transcripts::{TranscriptDb, TranscriptDbError};
