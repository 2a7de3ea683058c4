//! Production transcribe stage: local whisper binary.
//!
//! Whisper is asked for JSON output in a temp directory; the JSON carries
//! the text, the detected language and per-segment timings.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::pipeline::stages::{StageError, Transcriber, Transcript};

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    end: f64,
}

/// Transcriber that shells out to a local whisper install
pub struct WhisperTranscriber {
    whisper_bin: String,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(whisper_bin: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            whisper_bin: whisper_bin.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript, StageError> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| StageError::Transcribe(format!("temp dir: {}", e)))?;

        let output = Command::new(&self.whisper_bin)
            .arg(audio)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StageError::Transcribe(format!("failed to run whisper: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::Transcribe(format!(
                "whisper: {}",
                stderr.trim()
            )));
        }

        let stem = audio.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = temp_dir.path().join(format!("{}.json", stem));

        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .map_err(|e| StageError::Transcribe(format!("reading whisper output: {}", e)))?;

        let whisper: WhisperOutput = serde_json::from_str(&json_content)
            .map_err(|e| StageError::Transcribe(format!("parsing whisper JSON: {}", e)))?;

        let duration = whisper.segments.last().map(|s| s.end).unwrap_or(0.0);

        Ok(Transcript {
            text: whisper.text.trim().to_string(),
            language: if whisper.language.is_empty() {
                "en".to_string()
            } else {
                whisper.language
            },
            duration_seconds: duration,
        })
    }
}
