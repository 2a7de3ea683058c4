//! Production fetch stage.
//!
//! YouTube locators go through yt-dlp (audio-only extraction), other remote
//! URLs are downloaded directly over HTTP, and uploads are already on disk.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::MediaSource;
use crate::pipeline::stages::{FetchedMedia, Fetcher, StageError};

use super::fingerprint::is_youtube;

/// Fetcher backed by yt-dlp and a plain HTTP client
pub struct MediaFetcher {
    ytdlp_bin: String,
    client: reqwest::Client,
}

impl MediaFetcher {
    pub fn new(ytdlp_bin: impl Into<String>) -> Self {
        Self {
            ytdlp_bin: ytdlp_bin.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Ask yt-dlp for the media title; a failed lookup is not fatal
    async fn youtube_title(&self, url: &str) -> Option<String> {
        let output = Command::new(&self.ytdlp_bin)
            .arg("--get-title")
            .arg("--no-playlist")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            warn!(%url, "yt-dlp --get-title failed");
            return None;
        }

        let title = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!title.is_empty()).then_some(title)
    }

    async fn fetch_youtube(&self, url: &str, workdir: &Path) -> Result<FetchedMedia, StageError> {
        let title = self.youtube_title(url).await;

        let output = Command::new(&self.ytdlp_bin)
            .arg("--extract-audio")
            .arg("--audio-format")
            .arg("opus")
            .arg("--audio-quality")
            .arg("0")
            .arg("--no-playlist")
            .arg("-P")
            .arg(workdir)
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StageError::Fetch(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::Fetch(format!("yt-dlp: {}", stderr.trim())));
        }

        let path = first_file_with_extension(workdir, "opus")
            .await
            .map_err(|e| StageError::Fetch(e.to_string()))?
            .ok_or_else(|| StageError::Fetch("no opus file found after download".into()))?;

        debug!(path = %path.display(), "youtube audio downloaded");
        Ok(FetchedMedia { path, title })
    }

    async fn fetch_http(&self, url: &str, workdir: &Path) -> Result<FetchedMedia, StageError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StageError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StageError::Fetch(format!(
                "server returned {}",
                response.status()
            )));
        }

        let name = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && !s.contains('?'))
            .unwrap_or("download.bin");
        let path = workdir.join(name);

        let mut file = File::create(&path)
            .await
            .map_err(|e| StageError::Fetch(e.to_string()))?;
        let mut response = response;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| StageError::Fetch(e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| StageError::Fetch(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| StageError::Fetch(e.to_string()))?;

        debug!(path = %path.display(), "direct download complete");
        Ok(FetchedMedia { path, title: None })
    }
}

#[async_trait]
impl Fetcher for MediaFetcher {
    async fn fetch(
        &self,
        source: &MediaSource,
        workdir: &Path,
    ) -> Result<FetchedMedia, StageError> {
        match source {
            MediaSource::Uploaded { path, .. } => {
                if !fs::try_exists(path)
                    .await
                    .map_err(|e| StageError::Fetch(e.to_string()))?
                {
                    return Err(StageError::Fetch(format!(
                        "uploaded file missing: {}",
                        path.display()
                    )));
                }
                Ok(FetchedMedia {
                    path: path.clone(),
                    title: None,
                })
            }
            MediaSource::Remote { url } => {
                if is_youtube(url) {
                    self.fetch_youtube(url, workdir).await
                } else {
                    self.fetch_http(url, workdir).await
                }
            }
        }
    }
}

/// Find the first file in `dir` with the given extension
async fn first_file_with_extension(
    dir: &Path,
    ext: &str,
) -> std::io::Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(ext) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
