use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{SegmentSlides, SegmenterConfig};
use crate::render::Quality;

/// Description of how transcript rows map to sub-slides, for external tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidesPayload {
    pub meta: SlidesPayloadMeta,
    pub segments: Vec<PayloadSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidesPayloadMeta {
    /// Where the transcript came from (usually the CSV path)
    pub source: String,

    pub generated_at: DateTime<Utc>,

    pub auto_split: bool,

    /// Video resolution as `WIDTHxHEIGHT`
    pub resolution: String,

    pub total_segments: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSegment {
    pub segment_id: usize,
    pub speaker: String,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<PathBuf>,
    pub subslides: Vec<PayloadSlide>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSlide {
    pub order: usize,
    pub count: usize,
    pub title: String,
    pub text: String,
    pub duration: f64,
    pub is_continued: bool,
}

/// Assemble the payload for a whole run. Performs no I/O.
pub fn build_payload(
    results: &[SegmentSlides],
    source: &str,
    config: &SegmenterConfig,
    quality: Quality,
) -> SlidesPayload {
    let (width, height) = quality.resolution();

    let segments = results
        .iter()
        .map(|result| PayloadSegment {
            segment_id: result.segment.segment_id,
            speaker: result.segment.speaker.clone(),
            start_time: result.segment.start_time,
            end_time: result.segment.end_time,
            text: result.segment.text.clone(),
            audio_file: result.segment.audio_file.clone(),
            subslides: result
                .slides
                .iter()
                .map(|slide| PayloadSlide {
                    order: slide.subslide_index,
                    count: slide.subslide_count,
                    title: slide.title.clone(),
                    text: slide.text.clone(),
                    duration: slide.duration,
                    is_continued: slide.is_continued,
                })
                .collect(),
        })
        .collect();

    SlidesPayload {
        meta: SlidesPayloadMeta {
            source: source.to_string(),
            generated_at: Utc::now(),
            auto_split: config.auto_split,
            resolution: format!("{}x{}", width, height),
            total_segments: results.len(),
        },
        segments,
    }
}

impl SlidesPayload {
    /// Every slide in payload order
    pub fn slide_count(&self) -> usize {
        self.segments.iter().map(|s| s.subslides.len()).sum()
    }
}
