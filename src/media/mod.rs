//! Media handling: source fingerprints and the production stage executors
//! (yt-dlp fetch, ffmpeg conversion, whisper transcription).

pub mod convert;
pub mod fetch;
pub mod fingerprint;
pub mod whisper;

pub use convert::FfmpegConverter;
pub use fetch::MediaFetcher;
pub use whisper::WhisperTranscriber;
