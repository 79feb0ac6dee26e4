use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;

use crate::audio;
use crate::config::Config;
use crate::fallback::{FallbackManager, FallbackResult};
use crate::render::{
    AudioHandle, BackendKind, ExportOutputs, Quality, RenderRequest, SlideFrame, SlidePackage,
    TranscriptHandle, VideoInfo,
};
use crate::segmenter::{build_payload, SegmentSlides, TimelineSegmenter};
use crate::timeline;
use crate::upload::{UploadReceipt, UploadRequest, VideoUploader};
use crate::utils;
use crate::SlidecastError;

/// Image formats picked up from a slides directory
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Inputs of one CSV-timeline run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub csv_path: PathBuf,
    pub audio_dir: PathBuf,
    /// Slide artwork, matched to slides by file-name order
    pub slides_dir: Option<PathBuf>,
    pub quality: Quality,
    /// Overrides the configured output directory
    pub output_dir: Option<PathBuf>,
    pub preferred_backend: Option<BackendKind>,
    pub upload: Option<UploadRequest>,
}

/// Everything a run produced; persisted as `run_artifacts.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifacts {
    pub run_dir: PathBuf,
    pub video: VideoInfo,
    pub render: FallbackResult,
    pub slides_payload_file: PathBuf,
    pub exports: ExportOutputs,
    pub slide_count: usize,
    pub upload: Option<UploadReceipt>,
}

/// Turns a CSV transcript and its narration clips into a video
pub struct CsvTimelinePipeline {
    config: Config,
    segmenter: TimelineSegmenter,
    manager: FallbackManager,
    uploader: Option<Box<dyn VideoUploader>>,
    cancel: watch::Receiver<bool>,
    show_progress: bool,
}

impl CsvTimelinePipeline {
    pub fn new(config: Config, cancel: watch::Receiver<bool>) -> Self {
        let mut manager = FallbackManager::new(config.backends.clone(), config.render_settings())
            .with_cancel(cancel.clone());
        if config.render.auto_detect {
            manager.auto_detect();
        }

        Self {
            segmenter: TimelineSegmenter::new(config.segmentation.clone()),
            config,
            manager,
            uploader: None,
            cancel,
            show_progress: true,
        }
    }

    pub fn with_uploader(mut self, uploader: Box<dyn VideoUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn manager(&self) -> &FallbackManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut FallbackManager {
        &mut self.manager
    }

    /// Run every stage. An exhausted fallback chain ends the run with an error.
    pub async fn run(&mut self, options: &RunOptions) -> Result<RunArtifacts> {
        let run_name = utils::file_stem(&options.csv_path);
        let output_root = options
            .output_dir
            .clone()
            .unwrap_or_else(|| self.config.render.output_dir.clone());
        let run_dir = output_root.join(utils::generate_run_id(&run_name));
        fs_err::create_dir_all(&run_dir)
            .with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;
        tracing::info!("Starting run in {}", run_dir.display());

        let progress = self.spinner("Loading transcript and narration...");

        let rows = timeline::load_transcript(&options.csv_path)?;
        let clips = audio::list_audio_files(&options.audio_dir)?;
        if rows.len() != clips.len() {
            return Err(SlidecastError::AudioMismatch {
                rows: rows.len(),
                clips: clips.len(),
            }
            .into());
        }

        let durations = audio::probe_durations(&self.config.render.ffprobe_path, &clips).await?;
        let segments = timeline::build_segments(&rows, &clips, &durations)?;
        self.check_cancelled()?;

        progress.set_message("Splitting transcript into slides...");
        let results = self.segmenter.expand_all(&segments, Some(&self.cancel))?;
        let source = options.csv_path.display().to_string();
        let payload = build_payload(&results, &source, self.segmenter.config(), options.quality);

        let slides_payload_file = run_dir.join("slides_payload.json");
        fs_err::write(&slides_payload_file, serde_json::to_string_pretty(&payload)?)?;
        tracing::info!(
            "{} segments expanded into {} slides",
            segments.len(),
            payload.slide_count()
        );

        progress.set_message("Preparing narration track...");
        let narration = run_dir.join("narration.wav");
        audio::concat_clips(&self.config.render.ffmpeg_path, &clips, &narration).await?;
        self.check_cancelled()?;

        let images = match &options.slides_dir {
            Some(dir) => list_slide_images(dir)?,
            None => Vec::new(),
        };
        let frames = attach_images(&results, &images);
        let slide_count = frames.len();

        let request = RenderRequest {
            timeline_plan: build_timeline_plan(&results, options.quality),
            audio: AudioHandle {
                path: narration,
                clips: clips.clone(),
                duration: timeline::total_duration(&segments),
            },
            slides: SlidePackage {
                frames,
                payload: Some(payload),
            },
            transcript: TranscriptHandle {
                segments,
                source_csv: Some(options.csv_path.clone()),
            },
            quality: options.quality,
            output_path: run_dir.join("video.mp4"),
        };

        progress.set_message("Rendering video...");
        let mut exports = ExportOutputs::default();
        let render = self
            .manager
            .render(&request, Some(&mut exports), options.preferred_backend)
            .await;

        let video = match (&render.video_info, render.success) {
            (Some(video), true) => video.clone(),
            _ => {
                progress.finish_and_clear();
                self.check_cancelled()?;
                return Err(SlidecastError::RenderExhausted(render.error_summary()).into());
            }
        };

        let upload = match &options.upload {
            Some(request) => {
                self.check_cancelled()?;
                progress.set_message("Uploading video...");
                let uploader = self
                    .uploader
                    .as_ref()
                    .ok_or_else(|| SlidecastError::UploadFailed("no uploader is configured".to_string()))?;
                Some(uploader.upload(&video, request).await?)
            }
            None => None,
        };

        progress.finish_with_message("Done");

        let artifacts = RunArtifacts {
            run_dir: run_dir.clone(),
            video,
            render,
            slides_payload_file,
            exports,
            slide_count,
            upload,
        };
        fs_err::write(
            run_dir.join("run_artifacts.json"),
            serde_json::to_string_pretty(&artifacts)?,
        )?;

        Ok(artifacts)
    }

    fn check_cancelled(&self) -> Result<()> {
        if *self.cancel.borrow() {
            return Err(SlidecastError::Cancelled.into());
        }
        Ok(())
    }

    fn spinner(&self, message: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            progress.set_style(style);
        }
        progress.enable_steady_tick(Duration::from_millis(120));
        progress.set_message(message.to_string());
        progress
    }
}

/// Timing and effect hints handed to the render backends
pub fn build_timeline_plan(results: &[SegmentSlides], quality: Quality) -> serde_json::Value {
    let (width, height) = quality.resolution();
    let mut cursor = 0.0;

    let segments: Vec<serde_json::Value> = results
        .iter()
        .map(|result| {
            let slides: Vec<serde_json::Value> = result
                .slides
                .iter()
                .map(|slide| {
                    let start = cursor;
                    cursor += slide.duration;
                    json!({
                        "slide_id": slide.slide_id,
                        "start": start,
                        "end": cursor,
                        "transition": if slide.is_continued { "cut" } else { "fade" },
                    })
                })
                .collect();

            json!({
                "segment_id": result.segment.segment_id,
                "speaker": result.segment.speaker,
                "start": result.segment.start_time,
                "end": result.segment.end_time,
                "slides": slides,
            })
        })
        .collect();

    json!({
        "resolution": [width, height],
        "fps": quality.fps(),
        "total_duration": cursor,
        "segments": segments,
    })
}

/// Slide images in `dir`, sorted by file name
pub fn list_slide_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    for entry in fs_err::read_dir(dir).with_context(|| format!("Failed to read slides directory {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false);

        if path.is_file() && is_image {
            images.push(path);
        }
    }

    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

/// Pair slides with images in order; slides past the last image get none
pub fn attach_images(results: &[SegmentSlides], images: &[PathBuf]) -> Vec<SlideFrame> {
    results
        .iter()
        .flat_map(|result| result.slides.iter())
        .enumerate()
        .map(|(index, slide)| SlideFrame {
            slide: slide.clone(),
            image: images.get(index).cloned(),
        })
        .collect()
}
