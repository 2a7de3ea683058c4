//! Single-flight run scheduler.
//!
//! `trigger()` performs the run-state CAS and hands off to a background loop
//! that walks queued items one at a time through the stages. All item
//! movement goes through the queue store's compare-and-set, which is also how
//! concurrent cancellation is observed: when a follow-up CAS fails because
//! the item moved underneath us, the stage result is discarded.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{ItemStatus, MediaSource, QueueItem, RunState, RunStatus, StatusFields};
use crate::error::{lookup_err, EngineError};
use crate::media::fingerprint;
use crate::store::{QueueError, QueueStore};

use super::stages::{StageError, Stages};

/// Result of a `trigger()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A run was started for this generation
    Started { generation: u64 },

    /// Nothing is queued; no state change was made
    EmptyQueue,
}

/// How one item ended in this pass
enum ItemOutcome {
    Completed,
    Failed,
    ParkedDuplicate,
    /// The item moved underneath the scheduler (cancelled); nothing counted
    Discarded,
}

/// Coarse two-phase run signal, flipped once per run
#[derive(Default)]
struct PhaseSignals {
    downloads: bool,
    transcriptions: bool,
}

/// Owns the run-level state machine and drives items through the stages
pub struct PipelineScheduler {
    store: Arc<QueueStore>,
    stages: Stages,
    run: Arc<Mutex<RunState>>,
    work_dir: PathBuf,
}

impl PipelineScheduler {
    pub fn new(
        store: Arc<QueueStore>,
        stages: Stages,
        run: Arc<Mutex<RunState>>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            stages,
            run,
            work_dir,
        }
    }

    /// Start a run if none is active. Never blocks on the actual processing:
    /// the loop runs as a background task and this returns immediately.
    pub async fn trigger(self: &Arc<Self>) -> Result<TriggerOutcome, EngineError> {
        let has_queued = self
            .store
            .list()
            .await
            .iter()
            .any(|i| i.status == ItemStatus::Queued);

        let generation = {
            let mut run = self.run.lock().await;
            if run.status.is_active() {
                return Err(EngineError::RunActive(run.status));
            }
            if !has_queued {
                return Ok(TriggerOutcome::EmptyQueue);
            }
            run.status = RunStatus::Queued;
            run.generation += 1;
            run.generation
        };

        info!(generation, "run triggered");
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_loop(generation).await });

        Ok(TriggerOutcome::Started { generation })
    }

    /// Cancel an item. Terminal items are a no-op returning their current
    /// status; cancellation of an in-flight item is cooperative (the loop
    /// discards the stage result at the next boundary).
    pub async fn cancel(&self, id: Uuid) -> Result<ItemStatus, EngineError> {
        loop {
            let item = self.store.get(id).await.map_err(lookup_err)?;

            if item.status.is_terminal() {
                return Ok(item.status);
            }
            if !item.status.is_cancellable() {
                return Err(EngineError::ItemConflict {
                    id,
                    status: item.status.to_string(),
                    expected: "queued or an in-flight stage".into(),
                });
            }

            let moved = self
                .store
                .compare_and_set_status(
                    id,
                    item.status,
                    ItemStatus::Cancelled,
                    StatusFields::note("cancelled by user"),
                )
                .await?;
            if moved {
                info!(%id, was = %item.status, "item cancelled");
                return Ok(ItemStatus::Cancelled);
            }
            // Raced with the scheduler; re-read and try again.
        }
    }

    #[instrument(skip(self))]
    async fn run_loop(&self, generation: u64) {
        let mut processed = 0usize;
        let mut failed = 0usize;
        let mut considered = 0usize;
        let mut signals = PhaseSignals::default();

        // This run covers the items queued right now. An item re-queued while
        // the run is active (a duplicate resolved as overwrite) waits for the
        // next trigger.
        let mut pending: HashSet<Uuid> = self
            .store
            .list()
            .await
            .into_iter()
            .filter(|i| i.status == ItemStatus::Queued)
            .map(|i| i.id)
            .collect();

        loop {
            let next = self
                .store
                .list()
                .await
                .into_iter()
                .find(|i| i.status == ItemStatus::Queued && pending.contains(&i.id));
            let Some(item) = next else { break };
            pending.remove(&item.id);

            considered += 1;
            match self.process_item(item, generation, &mut signals).await {
                Ok(ItemOutcome::Completed) => processed += 1,
                Ok(ItemOutcome::Failed) => failed += 1,
                Ok(ItemOutcome::ParkedDuplicate | ItemOutcome::Discarded) => {}
                Err(e) => {
                    // Structural storage failure: the log no longer accepts
                    // appends, so no further item movement can be recorded.
                    // Abort the run instead of re-selecting the item forever.
                    error!(generation, error = %e, "queue storage failure; aborting run");
                    failed += 1;
                    break;
                }
            }
        }

        let mut run = self.run.lock().await;
        if run.generation != generation {
            // A clear reset the run state while we were finishing; our
            // generation is stale and must not overwrite anything.
            return;
        }
        run.status = if considered == 0 {
            // The queue emptied between the trigger CAS and the loop start.
            RunStatus::Idle
        } else if failed == 0 {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        };
        info!(
            generation,
            processed, failed, status = %run.status, "run finished"
        );
    }

    /// Drive one item through fingerprint check and the stage sequence.
    /// Whatever happens, the item leaves `queued` before this returns; an
    /// `Err` means the queue log itself stopped accepting appends.
    async fn process_item(
        &self,
        item: QueueItem,
        generation: u64,
        signals: &mut PhaseSignals,
    ) -> Result<ItemOutcome, QueueError> {
        let id = item.id;

        let key = match fingerprint::source_key(&item.source).await {
            Ok(key) => key,
            Err(e) => {
                let err = StageError::Fetch(format!("cannot fingerprint source: {}", e));
                return self.fail_item(&item, ItemStatus::Queued, &err, None).await;
            }
        };

        if !item.skip_fingerprint_once {
            match self.stages.persister.lookup(&key).await {
                Ok(true) => {
                    info!(%id, %key, "already processed; parking as duplicate");
                    let parked = self
                        .store
                        .compare_and_set_status(
                            id,
                            ItemStatus::Queued,
                            ItemStatus::PendingDuplicate,
                            StatusFields::default(),
                        )
                        .await?;
                    return Ok(if parked {
                        ItemOutcome::ParkedDuplicate
                    } else {
                        ItemOutcome::Discarded
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    return self.fail_item(&item, ItemStatus::Queued, &e, None).await;
                }
            }
        }

        if !signals.downloads {
            self.advance_run_status(generation, RunStatus::ProcessingDownloads)
                .await;
            signals.downloads = true;
        }

        // Claim the item; the one-shot fingerprint bypass is consumed here.
        let mut claim = StatusFields::default();
        if item.skip_fingerprint_once {
            claim.skip_fingerprint_once = Some(false);
        }
        if !self
            .store
            .compare_and_set_status(id, ItemStatus::Queued, ItemStatus::Downloading, claim)
            .await?
        {
            return Ok(ItemOutcome::Discarded);
        }

        let workdir = self.work_dir.join(id.to_string());
        if let Err(e) = fs::create_dir_all(&workdir).await {
            let err = StageError::Fetch(format!("cannot create work dir: {}", e));
            return self
                .fail_item(&item, ItemStatus::Downloading, &err, None)
                .await;
        }

        // Fetch
        let fetched = match self.stages.fetcher.fetch(&item.source, &workdir).await {
            Ok(f) => f,
            Err(e) => {
                return self
                    .fail_item(&item, ItemStatus::Downloading, &e, Some(&workdir))
                    .await;
            }
        };

        let mut fields = StatusFields {
            local_path: Some(fetched.path.clone()),
            ..StatusFields::default()
        };
        if item.title.is_none() {
            fields.title = fetched.title.clone();
        }
        if !self
            .store
            .compare_and_set_status(id, ItemStatus::Downloading, ItemStatus::Converting, fields)
            .await?
        {
            self.cleanup_artifacts(&item, &workdir, false).await;
            return Ok(ItemOutcome::Discarded);
        }

        // Convert
        let audio = match self.stages.converter.convert(&fetched.path, &workdir).await {
            Ok(path) => path,
            Err(e) => {
                return self
                    .fail_item(&item, ItemStatus::Converting, &e, Some(&workdir))
                    .await;
            }
        };

        if !signals.transcriptions {
            self.advance_run_status(generation, RunStatus::ProcessingTranscriptions)
                .await;
            signals.transcriptions = true;
        }
        if !self
            .store
            .compare_and_set_status(
                id,
                ItemStatus::Converting,
                ItemStatus::Transcribing,
                StatusFields::default(),
            )
            .await?
        {
            self.cleanup_artifacts(&item, &workdir, false).await;
            return Ok(ItemOutcome::Discarded);
        }

        // Transcribe
        let transcript = match self.stages.transcriber.transcribe(&audio).await {
            Ok(t) => t,
            Err(e) => {
                return self
                    .fail_item(&item, ItemStatus::Transcribing, &e, Some(&workdir))
                    .await;
            }
        };

        // Persist: transcript record + fingerprint, atomically
        let title = item
            .title
            .clone()
            .or_else(|| fetched.title.clone())
            .unwrap_or_else(|| item.source.to_string());
        if let Err(e) = self.stages.persister.persist(&key, &title, &transcript).await {
            return self
                .fail_item(&item, ItemStatus::Transcribing, &e, Some(&workdir))
                .await;
        }

        // Cleanup, then settle
        self.cleanup_artifacts(&item, &workdir, true).await;
        let fields = StatusFields {
            clear_local_path: true,
            ..StatusFields::default()
        };
        if self
            .store
            .compare_and_set_status(id, ItemStatus::Transcribing, ItemStatus::Completed, fields)
            .await?
        {
            info!(%id, %title, "item completed");
            Ok(ItemOutcome::Completed)
        } else {
            Ok(ItemOutcome::Discarded)
        }
    }

    /// Mark an item failed with the stage cause; cleanup is still attempted
    /// for any partial artifact. A lost CAS here means the item was cancelled
    /// while the stage was in flight, so nothing is counted.
    async fn fail_item(
        &self,
        item: &QueueItem,
        from: ItemStatus,
        err: &StageError,
        workdir: Option<&Path>,
    ) -> Result<ItemOutcome, QueueError> {
        warn!(id = %item.id, source = %item.source, error = %err, "item failed");

        if let Some(workdir) = workdir {
            self.cleanup_artifacts(item, workdir, false).await;
        }

        let mut fields = StatusFields::error(err.to_string());
        fields.clear_local_path = true;
        let moved = self
            .store
            .compare_and_set_status(item.id, from, ItemStatus::Failed, fields)
            .await?;

        Ok(if moved {
            ItemOutcome::Failed
        } else {
            ItemOutcome::Discarded
        })
    }

    /// Best-effort deletion of the per-item work dir, and of the uploaded
    /// source file once the item has been fully processed.
    async fn cleanup_artifacts(&self, item: &QueueItem, workdir: &Path, include_upload: bool) {
        if let Err(e) = fs::remove_dir_all(workdir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(id = %item.id, error = %e, "failed to remove work dir");
            }
        }
        if include_upload {
            if let MediaSource::Uploaded { path, .. } = &item.source {
                if let Err(e) = fs::remove_file(path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(id = %item.id, error = %e, "failed to remove uploaded source");
                    }
                }
            }
        }
    }

    /// Move the coarse run signal forward, unless the generation is stale
    async fn advance_run_status(&self, generation: u64, status: RunStatus) {
        let mut run = self.run.lock().await;
        if run.generation == generation && run.status.is_active() {
            run.status = status;
        }
    }
}
