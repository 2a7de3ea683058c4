//! Pipeline Integration Tests
//!
//! End-to-end runs through the engine with the external tools replaced by
//! in-memory doubles: batch completion, single-flight enforcement,
//! duplicate parking and resolution, and failure accounting.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{Mutex, Notify};

use scribeq::domain::{ItemStatus, MediaSource, RunStatus};
use scribeq::engine::{Engine, EngineOptions};
use scribeq::error::EngineError;
use scribeq::media::fingerprint;
use scribeq::pipeline::stages::{
    Converter, FetchedMedia, Fetcher, Persister, StageError, Stages, Transcriber, Transcript,
};
use scribeq::pipeline::{ResolutionAction, Snapshot};

/// In-memory replacement for all four stage executors
#[derive(Default)]
struct MockBackend {
    /// Sources (by display string) whose fetch fails
    fail_fetch: HashSet<String>,
    /// Whether persist fails for everything
    fail_persist: bool,
    /// When set, fetch blocks until the gate is released
    gate: Option<Arc<Notify>>,

    fingerprints: Mutex<HashSet<String>>,
    persisted: Mutex<Vec<String>>,
}

impl MockBackend {
    async fn seed_fingerprint(&self, key: &str) {
        self.fingerprints.lock().await.insert(key.to_string());
    }

    async fn persisted_keys(&self) -> Vec<String> {
        self.persisted.lock().await.clone()
    }
}

#[async_trait]
impl Fetcher for MockBackend {
    async fn fetch(
        &self,
        source: &MediaSource,
        workdir: &Path,
    ) -> Result<FetchedMedia, StageError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let name = source.to_string();
        if self.fail_fetch.contains(&name) {
            return Err(StageError::Fetch("HTTP 404".into()));
        }

        let path = workdir.join("media.bin");
        tokio::fs::write(&path, b"media")
            .await
            .map_err(|e| StageError::Fetch(e.to_string()))?;
        Ok(FetchedMedia {
            path,
            title: Some(format!("title of {}", name)),
        })
    }
}

#[async_trait]
impl Converter for MockBackend {
    async fn convert(&self, _input: &Path, workdir: &Path) -> Result<PathBuf, StageError> {
        let path = workdir.join("audio.ogg");
        tokio::fs::write(&path, b"audio")
            .await
            .map_err(|e| StageError::Convert(e.to_string()))?;
        Ok(path)
    }
}

#[async_trait]
impl Transcriber for MockBackend {
    async fn transcribe(&self, _audio: &Path) -> Result<Transcript, StageError> {
        Ok(Transcript {
            text: "hello world".into(),
            language: "en".into(),
            duration_seconds: 1.5,
        })
    }
}

#[async_trait]
impl Persister for MockBackend {
    async fn lookup(&self, key: &str) -> Result<bool, StageError> {
        Ok(self.fingerprints.lock().await.contains(key))
    }

    async fn persist(
        &self,
        key: &str,
        _title: &str,
        _transcript: &Transcript,
    ) -> Result<(), StageError> {
        if self.fail_persist {
            return Err(StageError::Persist("disk full".into()));
        }
        self.fingerprints.lock().await.insert(key.to_string());
        self.persisted.lock().await.push(key.to_string());
        Ok(())
    }
}

async fn open_engine(temp: &TempDir, backend: Arc<MockBackend>) -> Engine {
    let stages = Stages {
        fetcher: backend.clone(),
        converter: backend.clone(),
        transcriber: backend.clone(),
        persister: backend,
    };
    Engine::open(EngineOptions::under(temp.path()), stages)
        .await
        .unwrap()
}

/// Poll until the run settles
async fn wait_idle(engine: &Engine) -> Snapshot {
    for _ in 0..500 {
        let snapshot = engine.status().await;
        if !snapshot.run_status.is_active() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run did not finish in time");
}

#[tokio::test]
async fn batch_with_one_failure_finishes_with_errors() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend {
        fail_fetch: HashSet::from(["https://example.com/broken.mp3".to_string()]),
        ..Default::default()
    });
    let engine = open_engine(&temp, backend.clone()).await;

    engine
        .enqueue_url("https://example.com/good.mp3", None)
        .await
        .unwrap();
    engine
        .enqueue_url("https://example.com/broken.mp3", None)
        .await
        .unwrap();

    engine.trigger().await.unwrap();
    let snapshot = wait_idle(&engine).await;

    assert_eq!(snapshot.run_status, RunStatus::CompletedWithErrors);
    assert_eq!(snapshot.progress, "1/2");
    assert_eq!(snapshot.processed.len(), 1);
    assert_eq!(snapshot.failed.len(), 1);
    assert_eq!(snapshot.failed[0].source, "https://example.com/broken.mp3");
    assert!(snapshot.failed[0].error.starts_with("fetch:"));

    // One transcript landed; the failure never touched the fingerprint index
    assert_eq!(backend.persisted_keys().await.len(), 1);
}

#[tokio::test]
async fn completed_item_carries_discovered_title_and_no_local_path() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::default());
    let engine = open_engine(&temp, backend).await;

    let item = engine
        .enqueue_url("https://example.com/talk.mp3", None)
        .await
        .unwrap();

    engine.trigger().await.unwrap();
    wait_idle(&engine).await;

    let item = engine.get_item(item.id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(
        item.title.as_deref(),
        Some("title of https://example.com/talk.mp3")
    );
    assert!(item.local_path.is_none());
    assert!(item.completed_at.is_some());
}

#[tokio::test]
async fn second_trigger_while_active_is_rejected() {
    let temp = TempDir::new().unwrap();
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(MockBackend {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let engine = open_engine(&temp, backend).await;

    engine
        .enqueue_url("https://example.com/slow.mp3", None)
        .await
        .unwrap();

    let snapshot = engine.trigger().await.unwrap();
    assert!(snapshot.run_status.is_active());

    // The first run holds the slot until the gate opens
    match engine.trigger().await {
        Err(EngineError::RunActive(_)) => {}
        other => panic!("expected RunActive, got {:?}", other.map(|s| s.run_status)),
    }

    gate.notify_one();
    let snapshot = wait_idle(&engine).await;
    assert_eq!(snapshot.run_status, RunStatus::Completed);
    assert_eq!(snapshot.progress, "1/1");
}

#[tokio::test]
async fn known_fingerprint_parks_item_without_derailing_the_run() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::default());

    let dup_url = "https://example.com/seen-before.mp3";
    let key = fingerprint::source_key(&MediaSource::Remote {
        url: dup_url.into(),
    })
    .await
    .unwrap();
    backend.seed_fingerprint(&key).await;

    let engine = open_engine(&temp, backend).await;
    let dup = engine.enqueue_url(dup_url, None).await.unwrap();
    engine
        .enqueue_url("https://example.com/fresh.mp3", None)
        .await
        .unwrap();

    engine.trigger().await.unwrap();
    let snapshot = wait_idle(&engine).await;

    // The parked duplicate neither fails the run nor counts toward progress
    assert_eq!(snapshot.run_status, RunStatus::Completed);
    assert_eq!(snapshot.progress, "1/1");
    assert_eq!(snapshot.duplicates_pending, 1);

    let dup = engine.get_item(dup.id).await.unwrap();
    assert_eq!(dup.status, ItemStatus::PendingDuplicate);
}

#[tokio::test]
async fn overwrite_resolution_reprocesses_exactly_once() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::default());

    let url = "https://example.com/again.mp3";
    let key = fingerprint::source_key(&MediaSource::Remote { url: url.into() })
        .await
        .unwrap();
    backend.seed_fingerprint(&key).await;

    let engine = open_engine(&temp, backend.clone()).await;
    let item = engine.enqueue_url(url, None).await.unwrap();

    engine.trigger().await.unwrap();
    wait_idle(&engine).await;
    assert_eq!(
        engine.get_item(item.id).await.unwrap().status,
        ItemStatus::PendingDuplicate
    );

    let resolved = engine
        .resolve_duplicate(item.id, ResolutionAction::Overwrite)
        .await
        .unwrap();
    assert_eq!(resolved.status, ItemStatus::Queued);

    engine.trigger().await.unwrap();
    let snapshot = wait_idle(&engine).await;
    assert_eq!(snapshot.run_status, RunStatus::Completed);

    let item = engine.get_item(item.id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    // The bypass was one-shot
    assert!(!item.skip_fingerprint_once);
    assert_eq!(backend.persisted_keys().await, vec![key]);
}

#[tokio::test]
async fn cancel_resolution_is_terminal() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::default());

    let url = "https://example.com/unwanted.mp3";
    let key = fingerprint::source_key(&MediaSource::Remote { url: url.into() })
        .await
        .unwrap();
    backend.seed_fingerprint(&key).await;

    let engine = open_engine(&temp, backend.clone()).await;
    let item = engine.enqueue_url(url, None).await.unwrap();

    engine.trigger().await.unwrap();
    wait_idle(&engine).await;

    let resolved = engine
        .resolve_duplicate(item.id, ResolutionAction::Cancel)
        .await
        .unwrap();
    assert_eq!(resolved.status, ItemStatus::Cancelled);

    // Nothing left to process and nothing was persisted; the empty-queue
    // trigger leaves the previous run's final state in place
    let snapshot = engine.trigger().await.unwrap();
    assert_eq!(snapshot.run_status, RunStatus::Completed);
    assert!(backend.persisted_keys().await.is_empty());

    // Resolving twice is a conflict, not a silent no-op
    assert!(matches!(
        engine
            .resolve_duplicate(item.id, ResolutionAction::Cancel)
            .await,
        Err(EngineError::ItemConflict { .. })
    ));

    // Terminal items can be removed
    engine.remove(item.id).await.unwrap();
    assert!(engine.list_items().await.is_empty());
}

#[tokio::test]
async fn resolve_rejects_items_that_are_not_parked() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::default());
    let engine = open_engine(&temp, backend).await;

    let item = engine
        .enqueue_url("https://example.com/normal.mp3", None)
        .await
        .unwrap();

    assert!(matches!(
        engine
            .resolve_duplicate(item.id, ResolutionAction::Overwrite)
            .await,
        Err(EngineError::ItemConflict { .. })
    ));
}

#[tokio::test]
async fn persist_failure_marks_item_failed_and_leaves_no_fingerprint() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend {
        fail_persist: true,
        ..Default::default()
    });
    let engine = open_engine(&temp, backend.clone()).await;

    let url = "https://example.com/doomed.mp3";
    let item = engine.enqueue_url(url, None).await.unwrap();

    engine.trigger().await.unwrap();
    let snapshot = wait_idle(&engine).await;

    assert_eq!(snapshot.run_status, RunStatus::CompletedWithErrors);
    let item = engine.get_item(item.id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert!(item
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("persist:"));

    // A failed item must never be findable as a duplicate later
    let key = fingerprint::source_key(&MediaSource::Remote { url: url.into() })
        .await
        .unwrap();
    assert!(!backend.fingerprints.lock().await.contains(&key));
}

#[tokio::test]
async fn cancelled_items_are_skipped_and_excluded_from_progress() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::default());
    let engine = open_engine(&temp, backend).await;

    let keep = engine
        .enqueue_url("https://example.com/keep.mp3", None)
        .await
        .unwrap();
    let drop = engine
        .enqueue_url("https://example.com/drop.mp3", None)
        .await
        .unwrap();

    let status = engine.cancel(drop.id).await.unwrap();
    assert_eq!(status, ItemStatus::Cancelled);

    engine.trigger().await.unwrap();
    let snapshot = wait_idle(&engine).await;

    assert_eq!(snapshot.run_status, RunStatus::Completed);
    assert_eq!(snapshot.progress, "1/1");
    assert_eq!(
        engine.get_item(keep.id).await.unwrap().status,
        ItemStatus::Completed
    );
    assert_eq!(
        engine.get_item(drop.id).await.unwrap().status,
        ItemStatus::Cancelled
    );

    // Cancelling a terminal item again is an idempotent no-op
    assert_eq!(
        engine.cancel(drop.id).await.unwrap(),
        ItemStatus::Cancelled
    );
}

#[tokio::test]
async fn storage_failure_aborts_run_instead_of_spinning() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::default());
    let engine = open_engine(&temp, backend).await;

    let item = engine
        .enqueue_url("https://example.com/doomed-log.mp3", None)
        .await
        .unwrap();

    // Break the queue log underneath the engine: every append now fails
    let log = temp.path().join("queue.jsonl");
    tokio::fs::remove_file(&log).await.unwrap();
    tokio::fs::create_dir(&log).await.unwrap();

    engine.trigger().await.unwrap();
    let snapshot = wait_idle(&engine).await;

    // The run aborts and finalizes rather than re-selecting the item forever
    assert_eq!(snapshot.run_status, RunStatus::CompletedWithErrors);
    assert_eq!(
        engine.get_item(item.id).await.unwrap().status,
        ItemStatus::Queued
    );

    // The engine is not wedged: once storage is back, clear is accepted
    // because the aborted run settled instead of staying active
    tokio::fs::remove_dir(&log).await.unwrap();
    engine.clear().await.unwrap();
    assert!(engine.list_items().await.is_empty());
}

#[tokio::test]
async fn overwrite_during_active_run_waits_for_next_trigger() {
    let temp = TempDir::new().unwrap();
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(MockBackend {
        gate: Some(gate.clone()),
        ..Default::default()
    });

    let dup_url = "https://example.com/parked.mp3";
    let key = fingerprint::source_key(&MediaSource::Remote {
        url: dup_url.into(),
    })
    .await
    .unwrap();
    backend.seed_fingerprint(&key).await;

    let engine = open_engine(&temp, backend).await;
    let dup = engine.enqueue_url(dup_url, None).await.unwrap();
    let slow = engine
        .enqueue_url("https://example.com/slow.mp3", None)
        .await
        .unwrap();

    engine.trigger().await.unwrap();

    // Wait until the duplicate is parked and the other item sits in fetch
    for _ in 0..500 {
        let parked =
            engine.get_item(dup.id).await.unwrap().status == ItemStatus::PendingDuplicate;
        let fetching =
            engine.get_item(slow.id).await.unwrap().status == ItemStatus::Downloading;
        if parked && fetching {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let resolved = engine
        .resolve_duplicate(dup.id, ResolutionAction::Overwrite)
        .await
        .unwrap();
    assert_eq!(resolved.status, ItemStatus::Queued);

    gate.notify_one();
    wait_idle(&engine).await;

    // The active run finished without picking up the re-queued item
    assert_eq!(
        engine.get_item(slow.id).await.unwrap().status,
        ItemStatus::Completed
    );
    assert_eq!(
        engine.get_item(dup.id).await.unwrap().status,
        ItemStatus::Queued
    );

    // The next trigger processes it
    engine.trigger().await.unwrap();
    gate.notify_one();
    let snapshot = wait_idle(&engine).await;
    assert_eq!(snapshot.run_status, RunStatus::Completed);
    assert_eq!(
        engine.get_item(dup.id).await.unwrap().status,
        ItemStatus::Completed
    );
}

#[tokio::test]
async fn clear_refuses_while_a_run_is_active() {
    let temp = TempDir::new().unwrap();
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(MockBackend {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let engine = open_engine(&temp, backend).await;

    engine
        .enqueue_url("https://example.com/busy.mp3", None)
        .await
        .unwrap();
    engine.trigger().await.unwrap();

    assert!(matches!(engine.clear().await, Err(EngineError::RunActive(_))));

    gate.notify_one();
    wait_idle(&engine).await;

    engine.clear().await.unwrap();
    assert!(engine.list_items().await.is_empty());
    assert_eq!(engine.status().await.run_status, RunStatus::Idle);
}
