//! Production convert stage: ffmpeg normalization to Opus-in-OGG.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::pipeline::stages::{Converter, StageError};

/// Converter that shells out to ffmpeg
pub struct FfmpegConverter {
    ffmpeg_bin: String,
}

impl FfmpegConverter {
    pub fn new(ffmpeg_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }
}

#[async_trait]
impl Converter for FfmpegConverter {
    async fn convert(&self, input: &Path, workdir: &Path) -> Result<PathBuf, StageError> {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let output = workdir.join(format!("{}.ogg", stem));

        // Opus input needs only a container remux; anything else is
        // re-encoded to opus.
        let already_opus = input.extension().and_then(|e| e.to_str()) == Some("opus");

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.arg("-nostdin")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-map")
            .arg("0:a:0")
            .arg("-vn");

        if already_opus {
            cmd.arg("-c:a").arg("copy");
        } else {
            cmd.arg("-c:a")
                .arg("libopus")
                .arg("-compression_level")
                .arg("4")
                .arg("-b:a")
                .arg("128k");
        }

        let result = cmd
            .arg("-y")
            .arg(&output)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StageError::Convert(format!("failed to run ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(StageError::Convert(format!("ffmpeg: {}", stderr.trim())));
        }

        debug!(input = %input.display(), output = %output.display(), remux = already_opus, "converted");
        Ok(output)
    }
}
