//! Domain data structures.
//!
//! Queue items with their per-item state machine, and the process-wide
//! run singleton.

pub mod item;
pub mod run;

pub use item::{ItemStatus, MediaSource, QueueItem, StatusFields};
pub use run::{RunState, RunStatus};
