use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{
    write_render_metadata, BackendKind, ExportOutputs, RenderBackend, RenderError, RenderRequest,
    RenderSettings, VideoInfo,
};
use crate::timeline;

/// Background colour of slides that have no artwork
const PLACEHOLDER_COLOR: &str = "0x1f2937";

/// Lines of FFmpeg stderr kept in error messages
const STDERR_TAIL_LINES: usize = 20;

/// Direct FFmpeg composition of slides, narration and subtitles.
///
/// Needs nothing but an FFmpeg binary, which makes it the last resort of the fallback chain.
pub struct BaselineBackend {
    ffmpeg_path: PathBuf,
    burn_subtitles: bool,
    preset: String,
    crf: Option<u8>,
}

impl BaselineBackend {
    pub fn new(settings: &RenderSettings) -> Self {
        Self {
            ffmpeg_path: settings.ffmpeg_path.clone(),
            burn_subtitles: settings.burn_subtitles,
            preset: "medium".to_string(),
            crf: None,
        }
    }

    /// Apply `preset` / `crf` overrides from a backend's extra options
    pub fn with_options(mut self, options: &BTreeMap<String, String>) -> Self {
        if let Some(preset) = options.get("preset") {
            self.preset = preset.clone();
        }
        if let Some(crf) = options.get("crf").and_then(|v| v.parse().ok()) {
            self.crf = Some(crf);
        }
        self
    }

    /// Build the FFmpeg argument list for `request`
    pub fn build_args(&self, request: &RenderRequest, subtitles: Option<&Path>) -> Vec<String> {
        let (width, height) = request.quality.resolution();
        let fps = request.quality.fps();
        let frames = &request.slides.frames;
        let total = request.slides.total_duration();

        let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];

        for frame in frames {
            let duration = format!("{:.3}", frame.slide.duration);
            match &frame.image {
                Some(image) => args.extend([
                    "-loop".to_string(),
                    "1".to_string(),
                    "-t".to_string(),
                    duration,
                    "-i".to_string(),
                    image.to_string_lossy().to_string(),
                ]),
                None => args.extend([
                    "-f".to_string(),
                    "lavfi".to_string(),
                    "-t".to_string(),
                    duration,
                    "-i".to_string(),
                    format!("color=c={}:s={}x{}:r={}", PLACEHOLDER_COLOR, width, height, fps),
                ]),
            }
        }

        args.push("-i".to_string());
        args.push(request.audio.path.to_string_lossy().to_string());

        let mut filter = String::new();
        for index in 0..frames.len() {
            filter.push_str(&format!(
                "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}[v{i}];",
                i = index,
                w = width,
                h = height,
                fps = fps
            ));
        }
        for index in 0..frames.len() {
            filter.push_str(&format!("[v{}]", index));
        }
        filter.push_str(&format!("concat=n={}:v=1:a=0[vcat]", frames.len()));

        let video_label = match subtitles {
            Some(path) => {
                filter.push_str(&format!(";[vcat]subtitles='{}'[vout]", escape_filter_path(path)));
                "[vout]"
            }
            None => "[vcat]",
        };

        let crf = self.crf.unwrap_or_else(|| request.quality.crf());
        args.extend([
            "-filter_complex".to_string(),
            filter,
            "-map".to_string(),
            video_label.to_string(),
            "-map".to_string(),
            format!("{}:a", frames.len()),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            crf.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-t".to_string(),
            format!("{:.3}", total),
            "-movflags".to_string(),
            "+faststart".to_string(),
            request.output_path.to_string_lossy().to_string(),
        ]);

        args
    }

    fn validate(&self, request: &RenderRequest) -> Result<(), RenderError> {
        if request.slides.frames.is_empty() {
            return Err(RenderError::InvalidInput("no slides to render".to_string()));
        }

        if !request.audio.path.is_file() {
            return Err(RenderError::InvalidInput(format!(
                "narration audio not found: {}",
                request.audio.path.display()
            )));
        }

        if let Some(missing) = request
            .slides
            .frames
            .iter()
            .filter_map(|f| f.image.as_ref())
            .find(|image| !image.is_file())
        {
            return Err(RenderError::InvalidInput(format!(
                "slide image not found: {}",
                missing.display()
            )));
        }

        Ok(())
    }

    fn write_subtitles(&self, request: &RenderRequest, dir: &Path) -> Result<Option<PathBuf>, RenderError> {
        if !self.burn_subtitles {
            return Ok(None);
        }

        let srt = timeline::to_srt(&request.transcript.segments);
        if srt.is_empty() {
            return Ok(None);
        }

        let path = dir.join("subtitles.srt");
        fs_err::write(&path, srt)?;
        Ok(Some(path))
    }
}

#[async_trait]
impl RenderBackend for BaselineBackend {
    async fn render(
        &self,
        request: &RenderRequest,
        _outputs: Option<&mut ExportOutputs>,
    ) -> Result<VideoInfo, RenderError> {
        self.validate(request)?;

        let ffmpeg = which::which(&self.ffmpeg_path).map_err(|_| {
            RenderError::EncoderUnavailable(format!("{} not found in PATH", self.ffmpeg_path.display()))
        })?;

        let output_dir = request
            .output_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs_err::create_dir_all(&output_dir)?;

        let subtitles = self.write_subtitles(request, &output_dir)?;
        let args = self.build_args(request, subtitles.as_deref());
        tracing::debug!("Running FFmpeg: {} {}", ffmpeg.display(), args.join(" "));

        let output = Command::new(&ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::Encoder(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr_tail(&stderr)
            )));
        }

        let file_size = fs_err::metadata(&request.output_path)?.len();
        let video = VideoInfo {
            path: request.output_path.clone(),
            duration: request.slides.total_duration(),
            resolution: request.quality.resolution(),
            fps: request.quality.fps(),
            file_size,
            created_at: chrono::Utc::now(),
        };

        write_render_metadata(&output_dir, &video)?;
        tracing::info!("Rendered {} ({:.1}s)", video.path.display(), video.duration);

        Ok(video)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Baseline
    }
}

/// Escape a path for use inside a quoted filtergraph argument
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{AudioHandle, Quality, SlideFrame, SlidePackage, TranscriptHandle};
    use crate::segmenter::SlideDict;

    fn slide(id: usize, duration: f64) -> SlideDict {
        SlideDict {
            slide_id: id,
            title: format!("Slide {}", id),
            text: String::new(),
            duration,
            source_segments: vec![id],
            subslide_index: 0,
            subslide_count: 1,
            is_continued: false,
        }
    }

    fn request(frames: Vec<SlideFrame>, audio: PathBuf) -> RenderRequest {
        RenderRequest {
            timeline_plan: serde_json::json!({}),
            audio: AudioHandle {
                path: audio,
                clips: Vec::new(),
                duration: 3.0,
            },
            slides: SlidePackage {
                frames,
                payload: None,
            },
            transcript: TranscriptHandle::default(),
            quality: Quality::Low,
            output_path: PathBuf::from("out/video.mp4"),
        }
    }

    #[test]
    fn test_build_args_mixes_images_and_placeholders() {
        let backend = BaselineBackend::new(&RenderSettings::default());
        let frames = vec![
            SlideFrame {
                slide: slide(1, 1.0),
                image: Some(PathBuf::from("slides/001.png")),
            },
            SlideFrame {
                slide: slide(2, 2.0),
                image: None,
            },
        ];
        let args = backend.build_args(&request(frames, PathBuf::from("narration.wav")), None);
        let joined = args.join(" ");

        assert!(joined.contains("-loop 1 -t 1.000 -i slides/001.png"));
        assert!(joined.contains("-f lavfi -t 2.000 -i color=c=0x1f2937:s=854x480:r=30"));
        assert!(joined.contains("-i narration.wav"));
        assert!(joined.contains("[v0][v1]concat=n=2:v=1:a=0[vcat]"));
        assert!(joined.contains("-map [vcat] -map 2:a"));
        assert!(joined.contains("-crf 28"));
        assert!(joined.contains("-t 3.000"));
        assert_eq!(args.last().unwrap(), "out/video.mp4");
    }

    #[test]
    fn test_build_args_burns_subtitles_and_honours_options() {
        let mut options = BTreeMap::new();
        options.insert("preset".to_string(), "veryfast".to_string());
        options.insert("crf".to_string(), "20".to_string());
        let backend = BaselineBackend::new(&RenderSettings::default()).with_options(&options);

        let frames = vec![SlideFrame {
            slide: slide(1, 1.5),
            image: None,
        }];
        let args = backend.build_args(
            &request(frames, PathBuf::from("a.wav")),
            Some(Path::new("C:\\out\\subs.srt")),
        );
        let joined = args.join(" ");

        assert!(joined.contains("[vcat]subtitles='C\\:/out/subs.srt'[vout]"));
        assert!(joined.contains("-map [vout]"));
        assert!(joined.contains("-preset veryfast"));
        assert!(joined.contains("-crf 20"));
    }

    #[tokio::test]
    async fn test_render_rejects_empty_slides() {
        let backend = BaselineBackend::new(&RenderSettings::default());
        let err = backend
            .render(&request(Vec::new(), PathBuf::from("missing.wav")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_render_reports_missing_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("narration.wav");
        fs_err::write(&audio, b"RIFF").unwrap();

        let settings = RenderSettings {
            ffmpeg_path: PathBuf::from("definitely-not-an-encoder-binary"),
            ..RenderSettings::default()
        };
        let backend = BaselineBackend::new(&settings);
        let frames = vec![SlideFrame {
            slide: slide(1, 1.0),
            image: None,
        }];

        let err = backend.render(&request(frames, audio), None).await.unwrap_err();
        assert!(matches!(err, RenderError::EncoderUnavailable(_)));
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr = (0..30).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let tail = stderr_tail(&stderr);
        assert!(tail.starts_with("10\n"));
        assert!(tail.ends_with("29"));
    }
}
