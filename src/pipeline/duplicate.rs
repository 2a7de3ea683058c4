//! Duplicate resolution.
//!
//! Items whose fingerprint already exists are parked as `pending_duplicate`
//! and wait for a human decision: overwrite the earlier transcript, or give
//! up. Either way the decision is an explicit action, never a silent
//! re-queue.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ItemStatus, QueueItem, StatusFields};
use crate::error::{lookup_err, EngineError};
use crate::store::QueueStore;

/// The two ways a parked duplicate can be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Re-queue the item; the next scheduler pass skips the fingerprint
    /// check exactly once, so the item can overwrite the earlier record.
    Overwrite,

    /// Drop the item.
    Cancel,
}

/// Applies resolution decisions to parked duplicates
pub struct DuplicateResolver {
    store: Arc<QueueStore>,
    work_dir: PathBuf,
}

impl DuplicateResolver {
    pub fn new(store: Arc<QueueStore>, work_dir: PathBuf) -> Self {
        Self { store, work_dir }
    }

    /// Resolve a parked duplicate. Fails with a conflict error when the item
    /// is in any other status.
    pub async fn resolve(
        &self,
        id: Uuid,
        action: ResolutionAction,
    ) -> Result<QueueItem, EngineError> {
        let item = self.store.get(id).await.map_err(lookup_err)?;

        if item.status != ItemStatus::PendingDuplicate {
            return Err(EngineError::ItemConflict {
                id,
                status: item.status.to_string(),
                expected: ItemStatus::PendingDuplicate.to_string(),
            });
        }

        let (next, fields) = match action {
            ResolutionAction::Overwrite => {
                let fields = StatusFields {
                    skip_fingerprint_once: Some(true),
                    note: Some("duplicate overwrite approved".into()),
                    ..StatusFields::default()
                };
                (ItemStatus::Queued, fields)
            }
            ResolutionAction::Cancel => (
                ItemStatus::Cancelled,
                StatusFields::note("duplicate cancelled"),
            ),
        };

        let moved = self
            .store
            .compare_and_set_status(id, ItemStatus::PendingDuplicate, next, fields)
            .await?;
        if !moved {
            // Another resolution won the race.
            let current = self.store.get(id).await.map_err(lookup_err)?;
            return Err(EngineError::ItemConflict {
                id,
                status: current.status.to_string(),
                expected: ItemStatus::PendingDuplicate.to_string(),
            });
        }

        if action == ResolutionAction::Cancel {
            // Parked items have not fetched anything, but clean up any
            // leftover work dir from an earlier overwrite pass.
            let workdir = self.work_dir.join(id.to_string());
            if let Err(e) = fs::remove_dir_all(&workdir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(%id, error = %e, "failed to remove work dir");
                }
            }
        }

        info!(%id, ?action, "duplicate resolved");
        self.store.get(id).await.map_err(lookup_err)
    }
}
