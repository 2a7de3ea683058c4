//! Queue items and their per-item state machine.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a queue item's media comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MediaSource {
    /// A remote locator (YouTube URL or direct media URL)
    Remote { url: String },

    /// A file previously uploaded into the engine's uploads directory
    Uploaded {
        path: PathBuf,
        original_name: String,
    },
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { url } => write!(f, "{}", url),
            Self::Uploaded { original_name, .. } => write!(f, "upload:{}", original_name),
        }
    }
}

/// Status of a single queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Downloading,
    Converting,
    Transcribing,
    PendingDuplicate,
    Completed,
    Failed,
    Cancelled,
}

impl ItemStatus {
    /// Terminal statuses admit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses where a stage call is (or may be) in flight
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Downloading | Self::Converting | Self::Transcribing)
    }

    /// Statuses from which `cancel` is accepted
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Queued) || self.is_in_flight()
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// In-flight statuses may also move back to `queued`; that edge exists
    /// for the startup recovery pass, which re-queues work interrupted by a
    /// crash.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        match self {
            Queued => matches!(
                next,
                Downloading | PendingDuplicate | Failed | Cancelled
            ),
            Downloading => matches!(next, Converting | Queued | Failed | Cancelled),
            Converting => matches!(next, Transcribing | Queued | Failed | Cancelled),
            Transcribing => matches!(next, Completed | Queued | Failed | Cancelled),
            PendingDuplicate => matches!(next, Queued | Cancelled),
            Completed | Failed | Cancelled => false,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Converting => "converting",
            Self::Transcribing => "transcribing",
            Self::PendingDuplicate => "pending_duplicate",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One unit of work in the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique, immutable id assigned at creation
    pub id: Uuid,

    /// Media source (remote locator or uploaded file)
    pub source: MediaSource,

    /// Human label, filled in once known (fetch time or user-supplied)
    pub title: Option<String>,

    /// Current status
    pub status: ItemStatus,

    /// Path of the fetched artifact, while one exists on disk
    pub local_path: Option<PathBuf>,

    /// Failure cause; non-null iff status is `failed`
    pub error_message: Option<String>,

    /// Operator-visible annotations (e.g. recovery resets)
    pub note: Option<String>,

    /// One-shot flag set by duplicate resolution: the next scheduler pass
    /// skips the fingerprint check for this item, then clears the flag.
    #[serde(default)]
    pub skip_fingerprint_once: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set only when the item reaches a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(source: MediaSource, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source,
            title,
            status: ItemStatus::Queued,
            local_path: None,
            error_message: None,
            note: None,
            skip_fingerprint_once: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Best available display label for this item
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(t) => t.clone(),
            None => self.source.to_string(),
        }
    }
}

/// Optional field updates applied together with a status transition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,

    /// Clear `local_path` (used when the artifact has been deleted)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clear_local_path: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_fingerprint_once: Option<bool>,
}

impl StatusFields {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn note(message: impl Into<String>) -> Self {
        Self {
            note: Some(message.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_admit_no_transitions() {
        for terminal in [
            ItemStatus::Completed,
            ItemStatus::Failed,
            ItemStatus::Cancelled,
        ] {
            for next in [
                ItemStatus::Queued,
                ItemStatus::Downloading,
                ItemStatus::Completed,
                ItemStatus::Failed,
                ItemStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn pipeline_path_is_legal() {
        use ItemStatus::*;
        assert!(Queued.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Converting));
        assert!(Converting.can_transition_to(Transcribing));
        assert!(Transcribing.can_transition_to(Completed));
    }

    #[test]
    fn no_stage_skipping() {
        use ItemStatus::*;
        assert!(!Queued.can_transition_to(Transcribing));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Downloading.can_transition_to(Completed));
        assert!(!Converting.can_transition_to(Completed));
    }

    #[test]
    fn duplicate_resolution_edges() {
        use ItemStatus::*;
        assert!(Queued.can_transition_to(PendingDuplicate));
        assert!(PendingDuplicate.can_transition_to(Queued));
        assert!(PendingDuplicate.can_transition_to(Cancelled));
        assert!(!PendingDuplicate.can_transition_to(Downloading));
    }

    #[test]
    fn recovery_edges_requeue_in_flight_work() {
        use ItemStatus::*;
        for s in [Downloading, Converting, Transcribing] {
            assert!(s.can_transition_to(Queued));
        }
    }

    #[test]
    fn source_display() {
        let remote = MediaSource::Remote {
            url: "https://example.com/a.mp3".into(),
        };
        assert_eq!(remote.to_string(), "https://example.com/a.mp3");

        let upload = MediaSource::Uploaded {
            path: "/tmp/x.ogg".into(),
            original_name: "talk.m4a".into(),
        };
        assert_eq!(upload.to_string(), "upload:talk.m4a");
    }
}
