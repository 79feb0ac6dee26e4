//! Expansion of transcript rows into timed slides.
//!
//! Long rows are broken into sub-slides at sentence or clause boundaries and the
//! row's duration is shared between them by character count, so the total time of
//! every row is preserved.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub mod payload;

pub use payload::{build_payload, PayloadSegment, PayloadSlide, SlidesPayload, SlidesPayloadMeta};

use crate::timeline::TimelineSegment;
use crate::SlidecastError;

/// Extra characters a chunk may extend past the target while looking for a boundary
const LOOKAHEAD_CHARS: usize = 40;

/// A boundary is only used if it sits at least this far into the target length
const MIN_BOUNDARY_RATIO: f64 = 0.6;

/// Shortest duration a segment is treated as having
const MIN_SEGMENT_DURATION: f64 = 0.1;

/// Characters of text used for a derived title
const TITLE_CHARS: usize = 30;

const EPSILON: f64 = 1e-9;

/// Segmentation options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Split long rows into several sub-slides
    pub auto_split: bool,

    /// Rows with at least this many characters are split
    pub threshold: usize,

    /// Preferred characters per sub-slide
    pub target_chars_per_subslide: usize,

    /// Upper bound on sub-slides per row
    pub max_subslides: usize,

    /// Shortest on-screen time for a sub-slide, in seconds
    pub min_subslide_duration: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            auto_split: true,
            threshold: 60,
            target_chars_per_subslide: 50,
            max_subslides: 3,
            min_subslide_duration: 0.8,
        }
    }
}

/// A single timed slide produced from one transcript row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideDict {
    pub slide_id: usize,
    pub title: String,
    pub text: String,
    pub duration: f64,
    pub source_segments: Vec<usize>,
    pub subslide_index: usize,
    pub subslide_count: usize,
    pub is_continued: bool,
}

/// The slides produced for one segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSlides {
    pub segment: TimelineSegment,
    pub slides: Vec<SlideDict>,
}

/// Turns timeline segments into slides
#[derive(Debug, Clone, Default)]
pub struct TimelineSegmenter {
    config: SegmenterConfig,
}

impl TimelineSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Whether a row of `text_length` characters gets split
    pub fn should_split(&self, text_length: usize) -> bool {
        self.config.auto_split
            && self.config.max_subslides > 1
            && self.config.target_chars_per_subslide > 0
            && text_length >= self.config.threshold
    }

    /// Chunk cap for a segment: never more chunks than fit at the minimum duration
    fn max_chunks_for(&self, segment_duration: f64) -> usize {
        let min_duration = self.config.min_subslide_duration;
        if !(min_duration > 0.0) {
            return self.config.max_subslides;
        }

        let fitting = ((segment_duration + EPSILON) / min_duration).floor() as usize;
        self.config.max_subslides.min(fitting.max(1))
    }

    /// Expand one segment into slides numbered from `start_slide_id`
    pub fn expand(&self, segment: &TimelineSegment, start_slide_id: usize) -> Vec<SlideDict> {
        let text = segment.text.trim();
        let text_length = text.chars().count();
        let segment_duration = segment.duration().max(MIN_SEGMENT_DURATION);

        let chunks = if self.should_split(text_length) {
            split_text(
                text,
                self.config.target_chars_per_subslide,
                self.max_chunks_for(segment_duration),
            )
        } else {
            vec![text.to_string()]
        };

        let durations = if chunks.len() > 1 {
            allocate_durations(segment_duration, &chunks, self.config.min_subslide_duration)
        } else {
            vec![segment_duration]
        };

        let base_title = base_title(segment);
        let count = chunks.len();

        chunks
            .into_iter()
            .zip(durations)
            .enumerate()
            .map(|(index, (chunk, duration))| {
                let title = if index > 0 {
                    format!("{} (続き {}/{})", base_title, index + 1, count)
                } else {
                    base_title.clone()
                };

                SlideDict {
                    slide_id: start_slide_id + index,
                    title,
                    text: chunk,
                    duration,
                    source_segments: vec![segment.segment_id],
                    subslide_index: index,
                    subslide_count: count,
                    is_continued: count > 1 && index > 0,
                }
            })
            .collect()
    }

    /// Expand every segment, numbering slides from 1 across the whole run.
    ///
    /// Cancellation is checked before each segment.
    pub fn expand_all(
        &self,
        segments: &[TimelineSegment],
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<Vec<SegmentSlides>> {
        let mut next_slide_id = 1;
        let mut results = Vec::with_capacity(segments.len());

        for segment in segments {
            if cancel.map(|rx| *rx.borrow()).unwrap_or(false) {
                return Err(SlidecastError::Cancelled.into());
            }

            let slides = self.expand(segment, next_slide_id);
            next_slide_id += slides.len();

            if slides.len() > 1 {
                tracing::debug!(
                    segment_id = segment.segment_id,
                    subslides = slides.len(),
                    "Split segment into sub-slides"
                );
            }

            results.push(SegmentSlides {
                segment: segment.clone(),
                slides,
            });
        }

        Ok(results)
    }
}

fn base_title(segment: &TimelineSegment) -> String {
    if let Some(suggestion) = segment
        .slide_suggestion
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return suggestion.to_string();
    }

    let text = segment.text.trim();
    if text.is_empty() {
        format!("Segment {}", segment.segment_id)
    } else {
        text.chars().take(TITLE_CHARS).collect()
    }
}

fn is_boundary(c: char) -> bool {
    matches!(
        c,
        '。' | '．' | '.' | '！' | '!' | '？' | '?' | '、' | '，' | ',' | ' ' | '\n'
    )
}

/// Split `text` into at most `max_subslides` chunks of roughly `target_chars` characters.
///
/// Each chunk ends right after the right-most boundary character found within
/// `target_chars + 40` characters, as long as that boundary lies at least 60% of
/// `target_chars` in. Otherwise the chunk is cut at exactly `target_chars`. The last
/// chunk takes whatever is left once the cap is reached.
pub fn split_text(text: &str, target_chars: usize, max_subslides: usize) -> Vec<String> {
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.is_empty() || target_chars == 0 || max_subslides <= 1 {
        return vec![chars.into_iter().collect()];
    }

    let min_cut = (target_chars as f64 * MIN_BOUNDARY_RATIO).ceil() as usize;
    let mut chunks: Vec<String> = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let remaining = chars.len() - pos;
        if chunks.len() + 1 >= max_subslides || remaining <= target_chars {
            push_chunk(&mut chunks, &chars[pos..]);
            break;
        }

        let window_end = (pos + target_chars + LOOKAHEAD_CHARS).min(chars.len());
        let window = &chars[pos..window_end];

        let cut = window
            .iter()
            .rposition(|&c| is_boundary(c))
            .map(|idx| idx + 1)
            .filter(|&cut| cut >= min_cut)
            .unwrap_or(target_chars);

        push_chunk(&mut chunks, &chars[pos..pos + cut]);
        pos += cut;
    }

    if chunks.is_empty() {
        chunks.push(String::new());
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<String>, chars: &[char]) {
    let chunk: String = chars.iter().collect();
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_string());
    }
}

/// Share `total_duration` between `chunks` by character count.
///
/// Every chunk gets at least `min_duration` and the durations sum to
/// `total_duration`, except in one boundary case: when `total_duration` is less than
/// `chunks.len() * min_duration`, every chunk is pinned at `min_duration` and the
/// sum exceeds the total. [`TimelineSegmenter::expand`] caps the chunk count so it
/// never hands this function such a split.
///
/// The proportional pass always leaves the last chunk at least `min_duration`, so the
/// final clawback only absorbs floating-point rounding.
pub fn allocate_durations(total_duration: f64, chunks: &[String], min_duration: f64) -> Vec<f64> {
    let count = chunks.len();
    if count == 0 {
        return Vec::new();
    }

    let min_duration = min_duration.max(0.0);
    if count == 1 {
        return vec![total_duration.max(min_duration)];
    }

    if total_duration + EPSILON < count as f64 * min_duration {
        return vec![min_duration; count];
    }

    let weights: Vec<f64> = chunks
        .iter()
        .map(|chunk| chunk.chars().count().max(1) as f64)
        .collect();
    let total_weight: f64 = weights.iter().sum();

    let mut durations = Vec::with_capacity(count);
    let mut remaining = total_duration;

    for (index, weight) in weights.iter().enumerate() {
        let chunks_after = (count - index - 1) as f64;
        let share = total_duration * weight / total_weight;
        let ceiling = remaining - chunks_after * min_duration;

        let duration = share.min(ceiling).max(min_duration);
        durations.push(duration);
        remaining -= duration;
    }

    let allocated: f64 = durations.iter().sum();
    let last = count - 1;
    durations[last] += total_duration - allocated;

    if durations[last] < min_duration {
        let mut deficit = min_duration - durations[last];

        for index in (0..last).rev() {
            if deficit <= EPSILON {
                break;
            }

            let slack = durations[index] - min_duration;
            if slack <= 0.0 {
                continue;
            }

            let take = slack.min(deficit);
            durations[index] -= take;
            durations[last] += take;
            deficit -= take;
        }
    }

    durations
}
