//! Engine facade: source validation, upload intake, and the operations the
//! external surface (CLI today, HTTP tomorrow) drives.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::domain::{ItemStatus, MediaSource, QueueItem, RunState, RunStatus};
use crate::error::{lookup_err, EngineError};
use crate::pipeline::{
    DuplicateResolver, PipelineScheduler, ResolutionAction, Snapshot, Stages, StatusReporter,
    TriggerOutcome,
};
use crate::store::{QueueError, QueueStore};

/// File extensions accepted for uploads
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "ogg", "aac", "wma", "opus"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "flv", "wmv", "m4v"];

/// Filesystem layout and limits for an engine instance
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub queue_log: PathBuf,
    pub work_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl EngineOptions {
    /// Conventional layout under a single home directory
    pub fn under(home: &Path) -> Self {
        Self {
            queue_log: home.join("queue.jsonl"),
            work_dir: home.join("work"),
            uploads_dir: home.join("uploads"),
            max_upload_bytes: 500 * 1024 * 1024,
        }
    }
}

/// The queue-and-pipeline engine
pub struct Engine {
    store: Arc<QueueStore>,
    scheduler: Arc<PipelineScheduler>,
    resolver: DuplicateResolver,
    reporter: StatusReporter,
    run: Arc<Mutex<RunState>>,
    options: EngineOptions,
}

impl Engine {
    /// Open the engine: replays the queue log (including crash recovery) and
    /// wires the stage executors into a scheduler.
    pub async fn open(options: EngineOptions, stages: Stages) -> Result<Self, EngineError> {
        fs::create_dir_all(&options.work_dir).await?;
        fs::create_dir_all(&options.uploads_dir).await?;

        let store = Arc::new(QueueStore::open(options.queue_log.clone()).await?);
        let run = Arc::new(Mutex::new(RunState::default()));
        let scheduler = Arc::new(PipelineScheduler::new(
            Arc::clone(&store),
            stages,
            Arc::clone(&run),
            options.work_dir.clone(),
        ));
        let resolver = DuplicateResolver::new(Arc::clone(&store), options.work_dir.clone());
        let reporter = StatusReporter::new(Arc::clone(&store), Arc::clone(&run));

        Ok(Self {
            store,
            scheduler,
            resolver,
            reporter,
            run,
            options,
        })
    }

    /// Enqueue a remote media URL. Duplicates are not rejected here; the
    /// fingerprint check happens when the pipeline picks the item up.
    pub async fn enqueue_url(
        &self,
        url: &str,
        title: Option<String>,
    ) -> Result<QueueItem, EngineError> {
        let parsed = Url::parse(url)
            .map_err(|e| EngineError::Validation(format!("not a valid URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(EngineError::Validation(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let item = self
            .store
            .enqueue(MediaSource::Remote { url: url.into() }, title)
            .await?;
        Ok(item)
    }

    /// Take in a local media file: validate, copy it into the uploads
    /// directory under a unique name, and enqueue it.
    pub async fn upload(
        &self,
        file: &Path,
        title: Option<String>,
    ) -> Result<QueueItem, EngineError> {
        let original_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| EngineError::Validation("upload has no file name".into()))?
            .to_string();

        let extension = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !AUDIO_EXTENSIONS.contains(&extension.as_str())
            && !VIDEO_EXTENSIONS.contains(&extension.as_str())
        {
            return Err(EngineError::Validation(format!(
                "unsupported file type .{}; supported: {}",
                extension,
                AUDIO_EXTENSIONS
                    .iter()
                    .chain(VIDEO_EXTENSIONS)
                    .map(|e| format!(".{}", e))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let metadata = fs::metadata(file)
            .await
            .map_err(|e| EngineError::Validation(format!("cannot read upload: {}", e)))?;
        if metadata.len() > self.options.max_upload_bytes {
            return Err(EngineError::Validation(format!(
                "file is {} bytes; maximum upload size is {} bytes",
                metadata.len(),
                self.options.max_upload_bytes
            )));
        }

        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("upload");
        let safe_stem: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let unique_name = format!(
            "{}_{}.{}",
            safe_stem,
            Utc::now().timestamp_micros(),
            extension
        );
        let stored_path = self.options.uploads_dir.join(&unique_name);
        fs::copy(file, &stored_path).await?;

        let title = title.or_else(|| Some(original_name.clone()));
        let item = self
            .store
            .enqueue(
                MediaSource::Uploaded {
                    path: stored_path,
                    original_name,
                },
                title,
            )
            .await?;

        info!(id = %item.id, name = %unique_name, "upload accepted");
        Ok(item)
    }

    /// Start a run. Returns the snapshot right after the trigger; conflict
    /// error if a run is already active.
    pub async fn trigger(&self) -> Result<Snapshot, EngineError> {
        match self.scheduler.trigger().await? {
            TriggerOutcome::Started { generation } => {
                info!(generation, "processing triggered");
            }
            TriggerOutcome::EmptyQueue => {
                info!("queue is empty; nothing to trigger");
            }
        }
        Ok(self.reporter.snapshot().await)
    }

    /// Current progress snapshot
    pub async fn status(&self) -> Snapshot {
        self.reporter.snapshot().await
    }

    /// All queue items, oldest first
    pub async fn list_items(&self) -> Vec<QueueItem> {
        self.store.list().await
    }

    pub async fn get_item(&self, id: Uuid) -> Result<QueueItem, EngineError> {
        self.store.get(id).await.map_err(lookup_err)
    }

    pub async fn resolve_duplicate(
        &self,
        id: Uuid,
        action: ResolutionAction,
    ) -> Result<QueueItem, EngineError> {
        self.resolver.resolve(id, action).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<ItemStatus, EngineError> {
        self.scheduler.cancel(id).await
    }

    /// Remove a terminal item, dropping any leftover work dir with it
    pub async fn remove(&self, id: Uuid) -> Result<QueueItem, EngineError> {
        let item = match self.store.remove(id).await {
            Ok(item) => item,
            Err(QueueError::NotFound(id)) => return Err(EngineError::NotFound(id)),
            Err(QueueError::NotTerminal(status)) => {
                return Err(EngineError::ItemConflict {
                    id,
                    status: status.to_string(),
                    expected: "a terminal status".into(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let workdir = self.options.work_dir.join(id.to_string());
        if let Err(e) = fs::remove_dir_all(&workdir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(%id, error = %e, "failed to remove work dir");
            }
        }

        Ok(item)
    }

    /// Wipe the queue and reset the run state to idle. Refused while a run
    /// is active.
    pub async fn clear(&self) -> Result<(), EngineError> {
        let mut run = self.run.lock().await;
        if run.status.is_active() {
            return Err(EngineError::RunActive(run.status));
        }

        self.store.clear_all().await?;
        run.status = RunStatus::Idle;

        Ok(())
    }
}
