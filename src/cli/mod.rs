//! Command-line interface for scribeq.
//!
//! Provides commands for enqueueing URLs and uploads, triggering a
//! processing run, checking status, resolving duplicates, and managing
//! queue items.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::config;
use crate::engine::{Engine, EngineOptions};
use crate::media::{FfmpegConverter, MediaFetcher, WhisperTranscriber};
use crate::pipeline::{ResolutionAction, Snapshot, Stages};
use crate::store::TranscriptDb;

/// scribeq - Durable media transcription queue
#[derive(Parser, Debug)]
#[command(name = "scribeq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add one or more media URLs to the queue
    Add {
        /// URLs to enqueue (http/https)
        #[arg(required = true)]
        urls: Vec<String>,

        /// Custom title (applies to a single URL only)
        #[arg(long)]
        title: Option<String>,
    },

    /// Upload a local media file into the queue
    Upload {
        /// Path to an audio or video file
        file: PathBuf,

        /// Custom title (defaults to the file name)
        #[arg(long)]
        title: Option<String>,
    },

    /// Process the queue, blocking until the run finishes
    Trigger {
        /// Suppress per-poll progress lines
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show run status and progress
    Status,

    /// List all queue items
    Items,

    /// Resolve an item parked as a duplicate
    Resolve {
        /// Item ID (UUID)
        id: String,

        /// What to do with the duplicate
        #[arg(value_enum)]
        action: ResolveAction,
    },

    /// Cancel a queue item
    Cancel {
        /// Item ID (UUID)
        id: String,
    },

    /// Remove a finished item from the queue
    Remove {
        /// Item ID (UUID)
        id: String,
    },

    /// Remove all items from the queue
    Clear,

    /// Show resolved configuration (debug)
    Config,
}

/// Duplicate resolution for CLI (maps to ResolutionAction)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ResolveAction {
    /// Transcribe anyway, replacing the existing transcript
    Overwrite,

    /// Drop the item
    Cancel,
}

impl From<ResolveAction> for ResolutionAction {
    fn from(a: ResolveAction) -> Self {
        match a {
            ResolveAction::Overwrite => ResolutionAction::Overwrite,
            ResolveAction::Cancel => ResolutionAction::Cancel,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Add { urls, title } => add_urls(urls, title).await,
            Commands::Upload { file, title } => upload_file(&file, title).await,
            Commands::Trigger { quiet } => trigger(quiet).await,
            Commands::Status => show_status().await,
            Commands::Items => list_items().await,
            Commands::Resolve { id, action } => resolve(&id, action.into()).await,
            Commands::Cancel { id } => cancel(&id).await,
            Commands::Remove { id } => remove(&id).await,
            Commands::Clear => clear().await,
            Commands::Config => show_config(),
        }
    }
}

/// Build the engine from the resolved configuration
async fn build_engine() -> Result<Engine> {
    let cfg = config::config()?;

    let db = TranscriptDb::open(&cfg.transcript_db())
        .with_context(|| format!("Failed to open {}", cfg.transcript_db().display()))?;

    let stages = Stages {
        fetcher: Arc::new(MediaFetcher::new(cfg.tools.ytdlp.clone())),
        converter: Arc::new(FfmpegConverter::new(cfg.tools.ffmpeg.clone())),
        transcriber: Arc::new(WhisperTranscriber::new(
            cfg.tools.whisper.clone(),
            cfg.tools.whisper_model.clone(),
        )),
        persister: Arc::new(db),
    };

    let mut options = EngineOptions::under(&cfg.home);
    options.max_upload_bytes = cfg.limits.max_upload_bytes;

    Engine::open(options, stages)
        .await
        .context("Failed to open queue")
}

fn parse_id(id_str: &str) -> Result<Uuid> {
    Uuid::parse_str(id_str).with_context(|| format!("Invalid item ID: {}", id_str))
}

async fn add_urls(urls: Vec<String>, title: Option<String>) -> Result<()> {
    if title.is_some() && urls.len() > 1 {
        anyhow::bail!("--title can only be used with a single URL");
    }

    let engine = build_engine().await?;

    for url in &urls {
        let item = engine.enqueue_url(url, title.clone()).await?;
        println!("queued {} {}", item.id, item.source);
    }

    Ok(())
}

async fn upload_file(file: &PathBuf, title: Option<String>) -> Result<()> {
    let engine = build_engine().await?;
    let item = engine.upload(file, title).await?;
    println!("queued {} {}", item.id, item.source);
    Ok(())
}

async fn trigger(quiet: bool) -> Result<()> {
    let engine = build_engine().await?;
    engine.trigger().await?;

    // The run happens on this process's runtime, so block until it settles.
    loop {
        let snapshot = engine.status().await;
        if !snapshot.run_status.is_active() {
            print_snapshot(&snapshot);
            return Ok(());
        }
        if !quiet {
            eprintln!("[{}] {}", snapshot.run_status, snapshot.progress);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn show_status() -> Result<()> {
    let engine = build_engine().await?;
    let snapshot = engine.status().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("status:   {}", snapshot.run_status);
    println!("progress: {}", snapshot.progress);
    for entry in &snapshot.processed {
        println!(
            "  done    {}",
            entry.title.as_deref().unwrap_or(&entry.source)
        );
    }
    for entry in &snapshot.failed {
        println!("  failed  {} ({})", entry.source, entry.error);
    }
    if snapshot.duplicates_pending > 0 {
        println!(
            "{} duplicate(s) awaiting resolution; see 'scribeq items'",
            snapshot.duplicates_pending
        );
    }
}

async fn list_items() -> Result<()> {
    let engine = build_engine().await?;
    let items = engine.list_items().await;

    if items.is_empty() {
        println!("Queue is empty. Use 'scribeq add <url>' to queue media.");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<50}", "ID", "STATUS", "SOURCE");
    println!("{}", "-".repeat(108));

    for item in &items {
        let source = truncate_display(&item.source.to_string(), 47);
        println!("{:<38} {:<20} {:<50}", item.id, item.status, source);
        if let Some(error) = &item.error_message {
            println!("{:38} error: {}", "", error);
        }
    }

    println!("\nTotal: {} items", items.len());

    Ok(())
}

async fn resolve(id_str: &str, action: ResolutionAction) -> Result<()> {
    let id = parse_id(id_str)?;
    let engine = build_engine().await?;
    let item = engine.resolve_duplicate(id, action).await?;
    println!("{} is now {}", item.id, item.status);
    Ok(())
}

async fn cancel(id_str: &str) -> Result<()> {
    let id = parse_id(id_str)?;
    let engine = build_engine().await?;
    let status = engine.cancel(id).await?;
    println!("{} is now {}", id, status);
    Ok(())
}

async fn remove(id_str: &str) -> Result<()> {
    let id = parse_id(id_str)?;
    let engine = build_engine().await?;
    let item = engine.remove(id).await?;
    println!("removed {} ({})", item.id, item.source);
    Ok(())
}

async fn clear() -> Result<()> {
    let engine = build_engine().await?;
    engine.clear().await?;
    println!("queue cleared");
    Ok(())
}

/// Truncate a display string for the table. Counts chars, not bytes, so
/// multibyte names (uploads carry user-controlled UTF-8) never split a code
/// point.
fn truncate_display(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    }
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:          {}", cfg.home.display());
    println!("  Queue log:     {}", cfg.queue_log().display());
    println!("  Transcript DB: {}", cfg.transcript_db().display());
    println!("  Work dir:      {}", cfg.work_dir().display());
    println!("  Uploads:       {}", cfg.uploads_dir().display());
    println!();
    println!("Tools:");
    println!("  yt-dlp:        {}", cfg.tools.ytdlp);
    println!("  ffmpeg:        {}", cfg.tools.ffmpeg);
    println!("  whisper:       {}", cfg.tools.whisper);
    println!("  whisper model: {}", cfg.tools.whisper_model);
    println!();
    println!("Limits:");
    println!("  Max upload: {} bytes", cfg.limits.max_upload_bytes);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = format!("upload:{}", "日本語の会議メモ".repeat(8));
        let out = truncate_display(&long, 47);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 50);

        let short = "upload:memo.m4a";
        assert_eq!(truncate_display(short, 47), short);
    }
}
