//! The process-wide run singleton.
//!
//! A run is one pass of the scheduler over all currently queued items. Its
//! state is never a bare global: the scheduler owns a `RunState` behind a
//! mutex and every mutation is a check-then-set under that lock.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse run-level status, observable by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No run has happened since the last clear
    Idle,

    /// A trigger was accepted; the loop has not started its first fetch yet
    Queued,

    /// At least one item has started fetching
    ProcessingDownloads,

    /// At least one item has started transcribing
    ProcessingTranscriptions,

    /// Last run finished with no failed items
    Completed,

    /// Last run finished with one or more failed items
    CompletedWithErrors,
}

impl RunStatus {
    /// Whether a new trigger is accepted in this state
    pub fn can_trigger(self) -> bool {
        matches!(self, Self::Idle | Self::Completed | Self::CompletedWithErrors)
    }

    /// Whether a run is currently in progress
    pub fn is_active(self) -> bool {
        !self.can_trigger()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::ProcessingDownloads => "processing_downloads",
            Self::ProcessingTranscriptions => "processing_transcriptions",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
        };
        f.write_str(s)
    }
}

/// Versioned run state: the generation counter detects stale loop
/// finalizations (a loop may only finalize the generation it was started for)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub status: RunStatus,
    pub generation: u64,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            generation: 0,
        }
    }
}
