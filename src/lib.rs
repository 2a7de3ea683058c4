//! scribeq - Durable media transcription queue
//!
//! A queue-and-pipeline engine that turns media URLs and uploaded files
//! into transcripts via external tools (yt-dlp, ffmpeg, whisper).
//!
//! # Architecture
//!
//! The system is built around a durable queue:
//! - Every status change is appended to a JSONL log before it is applied
//! - Current state is derived by replaying the log on startup
//! - Items interrupted by a crash are re-queued automatically
//! - At most one processing run is active at a time; items advance
//!   through fetch, convert, transcribe and persist stages sequentially
//!
//! # Modules
//!
//! - `domain`: Queue items, statuses and the run state machine
//! - `store`: The append-only queue log and the transcript database
//! - `media`: Stage executors (yt-dlp fetch, ffmpeg convert, whisper)
//! - `pipeline`: The scheduler, duplicate resolution and reporting
//! - `engine`: The facade tying it all together
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Queue a video and a local recording
//! scribeq add https://www.youtube.com/watch?v=dQw4w9WgXcQ
//! scribeq upload ./meeting.m4a
//!
//! # Process everything
//! scribeq trigger
//!
//! # Inspect progress
//! scribeq status
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod store;

// Re-export main types at crate root for convenience
pub use domain::{ItemStatus, MediaSource, QueueItem, RunState, RunStatus};
pub use engine::{Engine, EngineOptions};
pub use error::EngineError;
pub use pipeline::{ResolutionAction, Snapshot, Stages};
pub use store::{QueueStore, TranscriptDb};
