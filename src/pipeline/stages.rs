//! Capability interfaces for the per-item pipeline stages.
//!
//! Each stage is an opaque boundary injected into the scheduler, so the
//! production tools (yt-dlp, ffmpeg, whisper, sqlite) can be swapped for
//! test doubles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::MediaSource;

/// A per-item stage failure. Always local to the item: the scheduler records
/// it in the item's `error_message` and moves on.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("fetch: {0}")]
    Fetch(String),

    #[error("convert: {0}")]
    Convert(String),

    #[error("transcribe: {0}")]
    Transcribe(String),

    #[error("persist: {0}")]
    Persist(String),
}

/// A fetched media artifact on local disk
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    /// Path of the artifact
    pub path: PathBuf,

    /// Title discovered at fetch time, if any
    pub title: Option<String>,
}

/// Output of the transcribe stage
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub language: String,
    pub duration_seconds: f64,
}

/// Retrieves a media source into a local artifact
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &MediaSource, workdir: &Path)
        -> Result<FetchedMedia, StageError>;
}

/// Normalizes a fetched artifact into an audio file the transcriber accepts
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, input: &Path, workdir: &Path) -> Result<PathBuf, StageError>;
}

/// Speech-to-text over a normalized audio file
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript, StageError>;
}

/// Durable transcript storage plus the fingerprint index.
///
/// `persist` must write the transcript record and the fingerprint atomically:
/// a fingerprint is never observable without its completed record.
#[async_trait]
pub trait Persister: Send + Sync {
    /// Whether this fingerprint has already been successfully processed
    async fn lookup(&self, key: &str) -> Result<bool, StageError>;

    async fn persist(
        &self,
        key: &str,
        title: &str,
        transcript: &Transcript,
    ) -> Result<(), StageError>;
}

/// The full set of stage executors wired into a scheduler
#[derive(Clone)]
pub struct Stages {
    pub fetcher: Arc<dyn Fetcher>,
    pub converter: Arc<dyn Converter>,
    pub transcriber: Arc<dyn Transcriber>,
    pub persister: Arc<dyn Persister>,
}
