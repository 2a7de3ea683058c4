//! Pipeline orchestration: stage interfaces, the single-flight scheduler,
//! duplicate resolution and progress reporting.

pub mod duplicate;
pub mod report;
pub mod scheduler;
pub mod stages;

pub use duplicate::{DuplicateResolver, ResolutionAction};
pub use report::{Snapshot, StatusReporter};
pub use scheduler::{PipelineScheduler, TriggerOutcome};
pub use stages::{FetchedMedia, Fetcher, Converter, Persister, StageError, Stages, Transcriber, Transcript};
