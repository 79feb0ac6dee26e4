//! Slidecast - turns a CSV transcript and per-row narration clips into a slide video
//!
//! Long transcript lines are split into continuation slides, the timeline is rendered
//! through a prioritized chain of backends, and the result can optionally be uploaded.

pub mod audio;
pub mod cli;
pub mod config;
pub mod fallback;
pub mod pipeline;
pub mod render;
pub mod segmenter;
pub mod timeline;
pub mod upload;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use fallback::{BackendConfig, FallbackManager, FallbackResult};
pub use pipeline::{CsvTimelinePipeline, RunArtifacts, RunOptions};
pub use render::{BackendKind, Quality, RenderBackend, RenderError, RenderRequest, VideoInfo};
pub use segmenter::{SegmenterConfig, TimelineSegmenter};
pub use timeline::TimelineSegment;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to slidecast runs
#[derive(thiserror::Error, Debug)]
pub enum SlidecastError {
    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    #[error("Transcript has {rows} rows but {clips} narration clips were found")]
    AudioMismatch { rows: usize, clips: usize },

    #[error("All render backends failed: {0}")]
    RenderExhausted(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Upload failed: {0}")]
    UploadFailed(String),
}
