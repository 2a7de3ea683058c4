//! Read-only progress aggregation.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::domain::{ItemStatus, RunState, RunStatus};
use crate::store::QueueStore;

/// Client-facing progress snapshot.
///
/// Computed from a single consistent read of the queue, so the numerator can
/// never exceed the denominator even while the scheduler is writing.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub run_status: RunStatus,
    pub generation: u64,

    /// `completed/total_considered`; cancelled items and parked duplicates
    /// are excluded from the denominator
    pub progress: String,

    pub processed: Vec<ProcessedEntry>,
    pub failed: Vec<FailedEntry>,
    pub duplicates_pending: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedEntry {
    pub source: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedEntry {
    pub source: String,
    pub error: String,
}

/// Aggregates queue state and run state into snapshots
pub struct StatusReporter {
    store: Arc<QueueStore>,
    run: Arc<Mutex<RunState>>,
}

impl StatusReporter {
    pub fn new(store: Arc<QueueStore>, run: Arc<Mutex<RunState>>) -> Self {
        Self { store, run }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let items = self.store.list().await;
        let run = *self.run.lock().await;

        let mut completed = 0usize;
        let mut total = 0usize;
        let mut processed = Vec::new();
        let mut failed = Vec::new();
        let mut duplicates_pending = 0usize;

        for item in &items {
            match item.status {
                ItemStatus::Cancelled => {}
                ItemStatus::PendingDuplicate => duplicates_pending += 1,
                status => {
                    total += 1;
                    if status == ItemStatus::Completed {
                        completed += 1;
                        processed.push(ProcessedEntry {
                            source: item.source.to_string(),
                            title: item.title.clone(),
                        });
                    } else if status == ItemStatus::Failed {
                        failed.push(FailedEntry {
                            source: item.source.to_string(),
                            error: item
                                .error_message
                                .clone()
                                .unwrap_or_else(|| "unknown error".into()),
                        });
                    }
                }
            }
        }

        Snapshot {
            run_status: run.status,
            generation: run.generation,
            progress: format!("{}/{}", completed, total),
            processed,
            failed,
            duplicates_pending,
        }
    }
}
