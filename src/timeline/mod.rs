use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod csv;

pub use self::csv::{parse_transcript_csv, TranscriptRow};

use crate::SlidecastError;

/// One transcript row placed on the narration timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSegment {
    /// 1-based position of the row in the source transcript
    pub segment_id: usize,

    /// Start time in seconds
    pub start_time: f64,

    /// End time in seconds
    pub end_time: f64,

    /// Speaker name (may be empty)
    pub speaker: String,

    /// Narrated text (may be empty)
    pub text: String,

    /// Precomputed slide title, if the transcript provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_suggestion: Option<String>,

    /// Narration clip for this row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<PathBuf>,
}

impl TimelineSegment {
    pub fn new(segment_id: usize, start_time: f64, end_time: f64, speaker: &str, text: &str) -> Self {
        Self {
            segment_id,
            start_time,
            end_time: end_time.max(start_time),
            speaker: speaker.to_string(),
            text: text.to_string(),
            slide_suggestion: None,
            audio_file: None,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Load transcript rows from a CSV file
pub fn load_transcript(path: &Path) -> Result<Vec<TranscriptRow>> {
    let content = fs_err::read_to_string(path)
        .with_context(|| format!("Failed to read transcript CSV {}", path.display()))?;

    let rows = parse_transcript_csv(&content)?;
    if rows.is_empty() {
        return Err(SlidecastError::InvalidTranscript(format!(
            "no rows found in {}",
            path.display()
        ))
        .into());
    }

    tracing::info!("Loaded {} transcript rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Lay rows end to end using the measured clip durations.
///
/// Rows and clips are paired by position, so both slices must have the same length.
pub fn build_segments(
    rows: &[TranscriptRow],
    clips: &[PathBuf],
    durations: &[f64],
) -> Result<Vec<TimelineSegment>> {
    if rows.len() != clips.len() || rows.len() != durations.len() {
        return Err(SlidecastError::AudioMismatch {
            rows: rows.len(),
            clips: clips.len().min(durations.len()),
        }
        .into());
    }

    let mut cursor = 0.0;
    let segments = rows
        .iter()
        .zip(clips.iter().zip(durations))
        .enumerate()
        .map(|(index, (row, (clip, duration)))| {
            let start = cursor;
            cursor += duration.max(0.0);

            let mut segment = TimelineSegment::new(index + 1, start, cursor, &row.speaker, &row.text);
            segment.slide_suggestion = row.slide_suggestion.clone();
            segment.audio_file = Some(clip.clone());
            segment
        })
        .collect();

    Ok(segments)
}

/// Total narration length covered by the segments
pub fn total_duration(segments: &[TimelineSegment]) -> f64 {
    segments.last().map(|s| s.end_time).unwrap_or(0.0)
}

/// Render segments as SRT subtitles
pub fn to_srt(segments: &[TimelineSegment]) -> String {
    let mut srt = String::new();
    let mut index = 1;

    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }

        srt.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index,
            format_srt_timestamp(segment.start_time),
            format_srt_timestamp(segment.end_time),
            text
        ));
        index += 1;
    }

    srt
}

/// Format seconds as `HH:MM:SS,mmm`
pub fn format_srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, ms)
}
