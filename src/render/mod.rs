use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub mod authoring;
pub mod baseline;
pub mod remote;

pub use authoring::{AuthoringBackend, AutomationConfig, AutomationError};
pub use baseline::BaselineBackend;
pub use remote::RemoteBackend;

use crate::segmenter::{SlideDict, SlidesPayload};
use crate::timeline::TimelineSegment;

/// Errors a render backend can report
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("timed out after {0:.1}s")]
    Timeout(f64),

    #[error("backend not supported: {0}")]
    Unsupported(String),

    #[error("video encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("encoding failed: {0}")]
    Encoder(String),

    #[error("invalid render input: {0}")]
    InvalidInput(String),

    #[error("render cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RenderError {
    /// Retrying will not help with this error
    pub fn is_unsupported(&self) -> bool {
        matches!(self, RenderError::Unsupported(_))
    }
}

/// Identity of a render backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Stages a project for an external authoring tool, then renders via the baseline
    #[serde(alias = "ymm4")]
    Authoring,
    /// FFmpeg composition, always available
    #[serde(alias = "ffmpeg", alias = "moviepy")]
    Baseline,
    /// Hosted rendering service
    #[serde(alias = "remotion")]
    Remote,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Authoring, BackendKind::Baseline, BackendKind::Remote];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Authoring => "authoring",
            BackendKind::Baseline => "baseline",
            BackendKind::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "authoring" | "ymm4" => Ok(BackendKind::Authoring),
            "baseline" | "ffmpeg" | "moviepy" => Ok(BackendKind::Baseline),
            "remote" | "remotion" => Ok(BackendKind::Remote),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

/// Output resolution preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    pub fn resolution(&self) -> (u32, u32) {
        match self {
            Quality::Low => (854, 480),
            Quality::Medium => (1280, 720),
            Quality::High => (1920, 1080),
        }
    }

    pub fn fps(&self) -> u32 {
        30
    }

    /// x264 constant rate factor
    pub fn crf(&self) -> u8 {
        match self {
            Quality::Low => 28,
            Quality::Medium => 23,
            Quality::High => 18,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" | "480p" => Ok(Quality::Low),
            "medium" | "720p" => Ok(Quality::Medium),
            "high" | "1080p" => Ok(Quality::High),
            other => Err(format!("unknown quality preset: {}", other)),
        }
    }
}

/// Metadata of a rendered video; also written as `render_metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub duration: f64,
    pub resolution: (u32, u32),
    pub fps: u32,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
}

/// Narration audio for a render
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioHandle {
    /// Single narration track covering the whole timeline
    pub path: PathBuf,

    /// Per-segment clips the track was built from, in timeline order
    pub clips: Vec<PathBuf>,

    /// Track length in seconds
    pub duration: f64,
}

/// A slide together with its artwork, if any
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideFrame {
    pub slide: SlideDict,
    pub image: Option<PathBuf>,
}

/// Everything the slide stage produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlidePackage {
    pub frames: Vec<SlideFrame>,
    pub payload: Option<SlidesPayload>,
}

impl SlidePackage {
    pub fn total_duration(&self) -> f64 {
        self.frames.iter().map(|f| f.slide.duration).sum()
    }
}

/// Transcript the video narrates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptHandle {
    pub segments: Vec<TimelineSegment>,
    pub source_csv: Option<PathBuf>,
}

/// Inputs shared by every backend for one render
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Backend-consumed description of timing and effect hints
    pub timeline_plan: serde_json::Value,
    pub audio: AudioHandle,
    pub slides: SlidePackage,
    pub transcript: TranscriptHandle,
    pub quality: Quality,
    /// Where the finished video goes
    pub output_path: PathBuf,
}

/// Side outputs a backend may report back to the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportOutputs {
    pub workspace_dir: Option<PathBuf>,
    pub project_file: Option<PathBuf>,
    pub timeline_plan_file: Option<PathBuf>,
    pub slides_payload_file: Option<PathBuf>,
    pub csv_copy: Option<PathBuf>,
    pub audio_files: Vec<PathBuf>,
    pub instructions_file: Option<PathBuf>,
    pub automation_succeeded: bool,
}

/// Settings shared by the built-in backends
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub ffmpeg_path: PathBuf,
    pub burn_subtitles: bool,
    pub workspace_root: PathBuf,
    pub automation: AutomationConfig,
    /// Pause between attempts of the same backend
    pub retry_backoff: Duration,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            burn_subtitles: true,
            workspace_root: PathBuf::from("workspaces"),
            automation: AutomationConfig::default(),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// A strategy for turning a render request into a video file
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Render the video described by `request`.
    ///
    /// Backends that stage extra artifacts report them through `outputs`.
    async fn render(
        &self,
        request: &RenderRequest,
        outputs: Option<&mut ExportOutputs>,
    ) -> Result<VideoInfo, RenderError>;

    fn kind(&self) -> BackendKind;
}

/// Write the `render_metadata.json` sidecar into `dir`
pub fn write_render_metadata(dir: &Path, video: &VideoInfo) -> Result<PathBuf, RenderError> {
    let path = dir.join("render_metadata.json");
    let content = serde_json::to_string_pretty(video)?;
    fs_err::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("authoring".parse::<BackendKind>().unwrap(), BackendKind::Authoring);
        assert_eq!("YMM4".parse::<BackendKind>().unwrap(), BackendKind::Authoring);
        assert_eq!("moviepy".parse::<BackendKind>().unwrap(), BackendKind::Baseline);
        assert_eq!("remote".parse::<BackendKind>().unwrap(), BackendKind::Remote);
        assert!("unknown".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_serializes_lowercase() {
        let json = serde_json::to_string(&BackendKind::Baseline).unwrap();
        assert_eq!(json, "\"baseline\"");
    }

    #[test]
    fn test_quality_presets() {
        assert_eq!(Quality::Low.resolution(), (854, 480));
        assert_eq!(Quality::Medium.resolution(), (1280, 720));
        assert_eq!("1080p".parse::<Quality>().unwrap(), Quality::High);
        assert!(Quality::High.crf() < Quality::Low.crf());
    }

    #[test]
    fn test_unsupported_classification() {
        assert!(RenderError::Unsupported("x".into()).is_unsupported());
        assert!(!RenderError::Timeout(1.0).is_unsupported());
        assert_eq!(RenderError::Timeout(2.0).to_string(), "timed out after 2.0s");
    }
}
