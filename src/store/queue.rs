//! Durable queue store: append-ahead JSONL log with an in-memory index.
//!
//! Every mutation is written to the log before it is applied in memory and
//! before the call returns, so the queue survives a process crash at any
//! point. Current state is rebuilt by replaying the log on open; a recovery
//! pass then re-queues any item that was mid-stage when the process died.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ItemStatus, MediaSource, QueueItem, StatusFields};

/// Errors from queue storage
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue item not found: {0}")]
    NotFound(Uuid),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },

    #[error("item is {0}; only terminal items can be removed")]
    NotTerminal(ItemStatus),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One entry in the queue log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
enum LogRecord {
    Enqueued {
        item: QueueItem,
    },
    Transition {
        id: Uuid,
        from: ItemStatus,
        to: ItemStatus,
        at: DateTime<Utc>,
        #[serde(default)]
        fields: StatusFields,
    },
    Removed {
        id: Uuid,
    },
}

/// Durable repository of queue items
pub struct QueueStore {
    log_path: PathBuf,
    items: Mutex<HashMap<Uuid, QueueItem>>,
}

impl QueueStore {
    /// Open (or create) a queue store backed by the given log file, replay
    /// its history, and run the crash-recovery pass.
    pub async fn open(log_path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let log_path = log_path.into();

        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let items = Self::replay(&log_path).await?;
        let store = Self {
            log_path,
            items: Mutex::new(items),
        };
        store.recover().await?;

        Ok(store)
    }

    /// Replay the log into current state
    async fn replay(log_path: &Path) -> Result<HashMap<Uuid, QueueItem>, QueueError> {
        let mut items = HashMap::new();

        if !log_path.exists() {
            return Ok(items);
        }

        let file = File::open(log_path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(&line)?;
            Self::apply(&mut items, record);
        }

        Ok(items)
    }

    /// Apply a single log record to the state
    fn apply(items: &mut HashMap<Uuid, QueueItem>, record: LogRecord) {
        match record {
            LogRecord::Enqueued { item } => {
                items.insert(item.id, item);
            }
            LogRecord::Transition {
                id,
                to,
                at,
                fields,
                ..
            } => {
                if let Some(item) = items.get_mut(&id) {
                    item.status = to;
                    item.updated_at = at;

                    if to.is_terminal() {
                        item.completed_at = Some(at);
                    }
                    // error_message is non-null iff failed
                    item.error_message = if to == ItemStatus::Failed {
                        fields.error_message
                    } else {
                        None
                    };

                    if let Some(title) = fields.title {
                        item.title = Some(title);
                    }
                    if let Some(path) = fields.local_path {
                        item.local_path = Some(path);
                    }
                    if fields.clear_local_path {
                        item.local_path = None;
                    }
                    if let Some(note) = fields.note {
                        item.note = match item.note.take() {
                            Some(existing) => Some(format!("{}; {}", existing, note)),
                            None => Some(note),
                        };
                    }
                    if let Some(skip) = fields.skip_fingerprint_once {
                        item.skip_fingerprint_once = skip;
                    }
                }
            }
            LogRecord::Removed { id } => {
                items.remove(&id);
            }
        }
    }

    /// Append a record to the log, fsync-before-return
    async fn append(&self, record: &LogRecord) -> Result<(), QueueError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        let json = serde_json::to_string(record)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        Ok(())
    }

    /// Crash recovery: any item found mid-stage is put back to `queued` with
    /// a note, so interrupted work is neither lost nor stuck.
    async fn recover(&self) -> Result<(), QueueError> {
        let interrupted: Vec<(Uuid, ItemStatus)> = {
            let items = self.items.lock().await;
            items
                .values()
                .filter(|i| i.status.is_in_flight())
                .map(|i| (i.id, i.status))
                .collect()
        };

        for (id, was) in interrupted {
            warn!(%id, status = %was, "re-queueing item interrupted by restart");
            let mut fields =
                StatusFields::note(format!("reset to queued after restart (was {})", was));
            fields.clear_local_path = true;
            self.compare_and_set_status(id, was, ItemStatus::Queued, fields)
                .await?;
        }

        Ok(())
    }

    /// Add a new item to the queue in `queued` status
    pub async fn enqueue(
        &self,
        source: MediaSource,
        title: Option<String>,
    ) -> Result<QueueItem, QueueError> {
        let item = QueueItem::new(source, title);

        let mut items = self.items.lock().await;
        self.append(&LogRecord::Enqueued { item: item.clone() })
            .await?;
        items.insert(item.id, item.clone());

        info!(id = %item.id, source = %item.source, "enqueued");
        Ok(item)
    }

    /// Get a single item by id
    pub async fn get(&self, id: Uuid) -> Result<QueueItem, QueueError> {
        let items = self.items.lock().await;
        items.get(&id).cloned().ok_or(QueueError::NotFound(id))
    }

    /// Consistent snapshot of all items, oldest first
    pub async fn list(&self) -> Vec<QueueItem> {
        let items = self.items.lock().await;
        let mut all: Vec<QueueItem> = items.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Atomically move an item from `expected` to `next`, applying `fields`.
    ///
    /// Returns `Ok(false)` without any change when the item's current status
    /// is not `expected` — the caller must re-read and decide. An illegal
    /// transition is a programming error and returns `Err`.
    pub async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: ItemStatus,
        next: ItemStatus,
        fields: StatusFields,
    ) -> Result<bool, QueueError> {
        let mut items = self.items.lock().await;

        let current = items.get(&id).ok_or(QueueError::NotFound(id))?.status;
        if current != expected {
            return Ok(false);
        }
        if !expected.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                from: expected,
                to: next,
            });
        }

        let record = LogRecord::Transition {
            id,
            from: expected,
            to: next,
            at: Utc::now(),
            fields,
        };
        // Durable before visible
        self.append(&record).await?;
        Self::apply(&mut items, record);

        Ok(true)
    }

    /// Remove a terminal item from the queue
    pub async fn remove(&self, id: Uuid) -> Result<QueueItem, QueueError> {
        let mut items = self.items.lock().await;

        let item = items.get(&id).ok_or(QueueError::NotFound(id))?.clone();
        if !item.status.is_terminal() {
            return Err(QueueError::NotTerminal(item.status));
        }

        self.append(&LogRecord::Removed { id }).await?;
        items.remove(&id);

        Ok(item)
    }

    /// Wipe all items. The log is rewritten (truncated) so cleared items can
    /// never replay back into existence.
    pub async fn clear_all(&self) -> Result<(), QueueError> {
        let mut items = self.items.lock().await;

        let file = File::create(&self.log_path).await?;
        file.sync_data().await?;
        items.clear();

        info!("queue cleared");
        Ok(())
    }
}
