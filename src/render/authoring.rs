use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{
    BackendKind, BaselineBackend, ExportOutputs, RenderBackend, RenderError, RenderRequest,
    RenderSettings, VideoInfo,
};
use crate::utils;

const PLACEHOLDER_PROJECT: &str = "project.ymmp";
const TIMELINE_PLAN_FILE: &str = "timeline_plan.json";
const SLIDES_PAYLOAD_FILE: &str = "slides_payload.json";
const INSTRUCTIONS_FILE: &str = "INSTRUCTIONS.txt";

/// Where to find the authoring tool and how to drive it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// AutoHotkey (or compatible) executable
    pub autohotkey_path: Option<PathBuf>,

    /// Automation script run against the staged workspace
    pub script_path: Option<PathBuf>,

    /// The authoring application itself
    pub authoring_app_path: Option<PathBuf>,

    /// Project copied into each workspace
    pub project_template: Option<PathBuf>,

    /// Upper bound for one automation run, in seconds
    pub timeout_seconds: Option<f64>,
}

impl AutomationConfig {
    /// Whether the automation executable and the authoring application are present
    pub fn prerequisites_present(&self) -> bool {
        let tool = self
            .autohotkey_path
            .as_ref()
            .map(|path| which::which(path).is_ok())
            .unwrap_or(false);
        let app = self
            .authoring_app_path
            .as_ref()
            .map(|path| path.exists())
            .unwrap_or(false);

        tool && app
    }
}

/// Failures of the best-effort automation step
#[derive(thiserror::Error, Debug)]
pub enum AutomationError {
    #[error("automation is not configured ({0} missing)")]
    NotConfigured(&'static str),

    #[error("automation tool not found: {0}")]
    ToolMissing(String),

    #[error("failed to start automation: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("automation timed out after {0:.1}s")]
    TimedOut(f64),

    #[error("automation exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Files staged for the authoring tool
#[derive(Debug, Clone)]
struct StagedWorkspace {
    dir: PathBuf,
    project_file: PathBuf,
    timeline_plan_file: Option<PathBuf>,
    slides_payload_file: Option<PathBuf>,
    csv_copy: Option<PathBuf>,
    audio_files: Vec<PathBuf>,
    instructions_file: Option<PathBuf>,
}

/// Stages a project for an external authoring tool and renders through the baseline.
///
/// The authoring tool's own export cannot be relied upon, so the video always comes
/// from [`BaselineBackend`]. What this backend adds is the workspace of artifacts left
/// behind for a person or the tool to pick up.
pub struct AuthoringBackend {
    baseline: BaselineBackend,
    automation: AutomationConfig,
    workspace_root: PathBuf,
}

impl AuthoringBackend {
    pub fn new(settings: &RenderSettings) -> Self {
        Self {
            baseline: BaselineBackend::new(settings),
            automation: settings.automation.clone(),
            workspace_root: settings.workspace_root.clone(),
        }
    }

    /// Run the automation script against a staged workspace.
    ///
    /// Callers log the outcome and carry on; a failure here never fails the render.
    pub async fn attempt_external_automation(&self, workspace: &Path, project_file: &Path) -> Result<(), AutomationError> {
        let tool = self
            .automation
            .autohotkey_path
            .as_ref()
            .ok_or(AutomationError::NotConfigured("autohotkey_path"))?;
        let script = self
            .automation
            .script_path
            .as_ref()
            .ok_or(AutomationError::NotConfigured("script_path"))?;

        let tool = which::which(tool).map_err(|_| AutomationError::ToolMissing(tool.display().to_string()))?;
        if !script.is_file() {
            return Err(AutomationError::ToolMissing(script.display().to_string()));
        }

        let timeout = self.automation.timeout_seconds.unwrap_or(300.0).max(0.1);
        tracing::info!("Running authoring automation: {}", script.display());

        let run = Command::new(&tool)
            .arg(script)
            .arg(workspace)
            .arg(project_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs_f64(timeout), run)
            .await
            .map_err(|_| AutomationError::TimedOut(timeout))??;

        if !output.status.success() {
            return Err(AutomationError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    /// Stage every workspace artifact that can be written.
    ///
    /// Only a missing workspace directory is an error. Each later step that fails is
    /// logged and left out of the returned [`StagedWorkspace`].
    async fn prepare_workspace(&self, request: &RenderRequest) -> Result<StagedWorkspace, RenderError> {
        let dir = self.workspace_root.join(utils::generate_run_id("workspace"));
        fs_err::create_dir_all(&dir)?;
        tracing::info!("Staging authoring workspace in {}", dir.display());

        let project_file = self.stage_project(&dir);

        let timeline_plan_file = staged(
            TIMELINE_PLAN_FILE,
            write_json(&dir.join(TIMELINE_PLAN_FILE), &timeline_plan_document(request)),
        );

        let slides_payload_file = match &request.slides.payload {
            Some(payload) => staged(SLIDES_PAYLOAD_FILE, write_json(&dir.join(SLIDES_PAYLOAD_FILE), payload)),
            None => {
                tracing::debug!("No slides payload supplied, skipping {}", SLIDES_PAYLOAD_FILE);
                None
            }
        };

        let csv_copy = match &request.transcript.source_csv {
            Some(csv) => {
                let name = csv.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("transcript.csv"));
                let target = dir.join(name);
                staged("transcript copy", copy_file(csv, &target).await)
            }
            None => None,
        };

        let audio_files = self.stage_audio(&dir, &request.audio.clips).await;

        let instructions_file = staged(INSTRUCTIONS_FILE, {
            let path = dir.join(INSTRUCTIONS_FILE);
            fs_err::write(&path, instructions(request, &project_file, audio_files.len()))
                .map(|_| path)
                .map_err(RenderError::from)
        });

        Ok(StagedWorkspace {
            dir,
            project_file,
            timeline_plan_file,
            slides_payload_file,
            csv_copy,
            audio_files,
            instructions_file,
        })
    }

    /// Copy clips as `001.ext`, `002.ext`, ... keeping sequence numbers of skipped clips
    async fn stage_audio(&self, dir: &Path, clips: &[PathBuf]) -> Vec<PathBuf> {
        let audio_dir = dir.join("audio");
        if let Err(e) = fs_err::create_dir_all(&audio_dir) {
            tracing::warn!("Could not create workspace audio folder: {}", e);
            return Vec::new();
        }

        let mut audio_files = Vec::with_capacity(clips.len());
        for (index, clip) in clips.iter().enumerate() {
            let target = audio_dir.join(numbered_clip_name(index + 1, clip));
            let label = format!("audio clip {}", clip.display());
            if let Some(copied) = staged(&label, copy_file(clip, &target).await) {
                audio_files.push(copied);
            }
        }
        audio_files
    }

    /// Copy the project template, falling back to an empty placeholder project
    fn stage_project(&self, dir: &Path) -> PathBuf {
        if let Some(template) = &self.automation.project_template {
            let name = template
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(PLACEHOLDER_PROJECT));
            let target = dir.join(name);

            match fs_err::copy(template, &target) {
                Ok(_) => return target,
                Err(e) => tracing::warn!("Could not copy project template, using placeholder: {}", e),
            }
        }

        let placeholder = dir.join(PLACEHOLDER_PROJECT);
        if let Err(e) = fs_err::write(&placeholder, "") {
            tracing::warn!("Could not write placeholder project: {}", e);
        }
        placeholder
    }
}

#[async_trait]
impl RenderBackend for AuthoringBackend {
    async fn render(
        &self,
        request: &RenderRequest,
        outputs: Option<&mut ExportOutputs>,
    ) -> Result<VideoInfo, RenderError> {
        let staged = match self.prepare_workspace(request).await {
            Ok(staged) => Some(staged),
            Err(e) => {
                tracing::warn!("Workspace preparation failed, rendering without it: {}", e);
                None
            }
        };

        let mut automation_succeeded = false;
        if let Some(staged) = &staged {
            match self.attempt_external_automation(&staged.dir, &staged.project_file).await {
                Ok(()) => {
                    tracing::info!("Authoring automation finished");
                    automation_succeeded = true;
                }
                Err(e) => tracing::warn!("Authoring automation skipped: {}", e),
            }
        }

        let video = self.baseline.render(request, None).await?;

        if let (Some(outputs), Some(staged)) = (outputs, staged) {
            outputs.workspace_dir = Some(staged.dir);
            outputs.project_file = Some(staged.project_file);
            outputs.timeline_plan_file = staged.timeline_plan_file;
            outputs.slides_payload_file = staged.slides_payload_file;
            outputs.csv_copy = staged.csv_copy;
            outputs.audio_files = staged.audio_files;
            outputs.instructions_file = staged.instructions_file;
            outputs.automation_succeeded = automation_succeeded;
        }

        Ok(video)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Authoring
    }
}

/// Keep the path of a staged artifact, or log why it is missing
fn staged(what: &str, result: Result<PathBuf, RenderError>) -> Option<PathBuf> {
    match result {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!("Could not stage {}: {}", what, e);
            None
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<PathBuf, RenderError> {
    fs_err::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(path.to_path_buf())
}

async fn copy_file(from: &Path, to: &Path) -> Result<PathBuf, RenderError> {
    tokio::fs::copy(from, to).await.map_err(|e| {
        RenderError::InvalidInput(format!("cannot copy {}: {}", from.display(), e))
    })?;
    Ok(to.to_path_buf())
}

/// `001.wav`, `002.mp3`, ... keeping the clip's own extension
fn numbered_clip_name(sequence: usize, clip: &Path) -> String {
    let extension = clip
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("wav");
    format!("{:03}.{}", sequence, extension)
}

/// The timeline plan with audio and transcript summaries merged in
fn timeline_plan_document(request: &RenderRequest) -> serde_json::Value {
    let audio = json!({
        "path": request.audio.path,
        "duration": request.audio.duration,
        "clips": request.audio.clips,
    });
    let transcript = json!({
        "source_csv": request.transcript.source_csv,
        "segment_count": request.transcript.segments.len(),
        "total_duration": crate::timeline::total_duration(&request.transcript.segments),
    });

    let mut plan = match &request.timeline_plan {
        serde_json::Value::Object(map) => serde_json::Value::Object(map.clone()),
        other => json!({ "plan": other }),
    };
    plan["audio"] = audio;
    plan["transcript"] = transcript;
    plan["quality"] = json!(request.quality);
    plan
}

fn instructions(request: &RenderRequest, project_file: &Path, audio_count: usize) -> String {
    let (width, height) = request.quality.resolution();
    format!(
        "Slidecast authoring workspace\n\
         =============================\n\
         \n\
         1. Open {project} in the authoring tool.\n\
         2. Import the {audio_count} narration clips from the audio/ folder in numeric order.\n\
         3. Lay out the slides described in {payload} using the timings in {plan}.\n\
         4. Export the video at {width}x{height}, {fps} fps.\n\
         \n\
         A reference render produced by FFmpeg is available at {output}.\n",
        project = project_file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
        audio_count = audio_count,
        payload = SLIDES_PAYLOAD_FILE,
        plan = TIMELINE_PLAN_FILE,
        width = width,
        height = height,
        fps = request.quality.fps(),
        output = request.output_path.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{AudioHandle, Quality, SlideFrame, SlidePackage, TranscriptHandle};
    use crate::segmenter::{build_payload, SegmenterConfig, TimelineSegmenter};
    use crate::timeline::TimelineSegment;

    fn request(dir: &Path) -> RenderRequest {
        let clip_a = dir.join("a.wav");
        let clip_b = dir.join("b.mp3");
        fs_err::write(&clip_a, b"aaaa").unwrap();
        fs_err::write(&clip_b, b"bbbb").unwrap();
        let csv = dir.join("talk.csv");
        fs_err::write(&csv, "speaker,text\nA,hello\nB,world\n").unwrap();

        let segments = vec![
            TimelineSegment::new(1, 0.0, 1.0, "A", "hello"),
            TimelineSegment::new(2, 1.0, 2.0, "B", "world"),
        ];
        let results = TimelineSegmenter::default().expand_all(&segments, None).unwrap();
        let payload = build_payload(&results, "talk.csv", &SegmenterConfig::default(), Quality::Low);
        let frames = results
            .iter()
            .flat_map(|r| r.slides.iter().cloned())
            .map(|slide| SlideFrame { slide, image: None })
            .collect();

        RenderRequest {
            timeline_plan: json!({ "total_duration": 2.0 }),
            audio: AudioHandle {
                path: dir.join("narration.wav"),
                clips: vec![clip_a, clip_b],
                duration: 2.0,
            },
            slides: SlidePackage {
                frames,
                payload: Some(payload),
            },
            transcript: TranscriptHandle {
                segments,
                source_csv: Some(csv),
            },
            quality: Quality::Low,
            output_path: dir.join("out").join("video.mp4"),
        }
    }

    fn backend(workspace_root: &Path, automation: AutomationConfig) -> AuthoringBackend {
        AuthoringBackend::new(&RenderSettings {
            ffmpeg_path: PathBuf::from("definitely-not-an-encoder-binary"),
            workspace_root: workspace_root.to_path_buf(),
            automation,
            ..RenderSettings::default()
        })
    }

    #[tokio::test]
    async fn test_prepare_workspace_stages_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let request = request(dir.path());
        let backend = backend(&dir.path().join("ws"), AutomationConfig::default());

        let staged = backend.prepare_workspace(&request).await.unwrap();

        assert!(staged.dir.starts_with(dir.path().join("ws")));
        assert_eq!(staged.project_file.file_name().unwrap(), PLACEHOLDER_PROJECT);
        assert!(staged.project_file.is_file());
        assert_eq!(staged.csv_copy.as_ref().unwrap().file_name().unwrap(), "talk.csv");
        assert!(staged.instructions_file.as_ref().unwrap().is_file());

        let names: Vec<String> = staged
            .audio_files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["001.wav", "002.mp3"]);

        let plan: serde_json::Value =
            serde_json::from_str(&fs_err::read_to_string(staged.timeline_plan_file.as_ref().unwrap()).unwrap()).unwrap();
        assert_eq!(plan["total_duration"], 2.0);
        assert_eq!(plan["transcript"]["segment_count"], 2);
        assert_eq!(plan["audio"]["clips"].as_array().unwrap().len(), 2);
        assert_eq!(plan["quality"], "low");

        let payload: serde_json::Value = serde_json::from_str(
            &fs_err::read_to_string(staged.slides_payload_file.as_ref().unwrap()).unwrap(),
        )
        .unwrap();
        assert_eq!(payload["meta"]["total_segments"], 2);
    }

    #[tokio::test]
    async fn test_missing_clip_still_stages_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = request(dir.path());
        request.audio.clips.insert(1, dir.path().join("gone.wav"));
        let backend = backend(&dir.path().join("ws"), AutomationConfig::default());

        let staged = backend.prepare_workspace(&request).await.unwrap();

        let names: Vec<String> = staged
            .audio_files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["001.wav", "003.mp3"]);
        assert!(staged.project_file.is_file());
        assert!(staged.timeline_plan_file.as_ref().unwrap().is_file());
        assert!(staged.slides_payload_file.as_ref().unwrap().is_file());
        assert!(staged.csv_copy.as_ref().unwrap().is_file());

        let instructions = fs_err::read_to_string(staged.instructions_file.as_ref().unwrap()).unwrap();
        assert!(instructions.contains("Import the 2 narration clips"));
    }

    #[tokio::test]
    async fn test_unreadable_csv_is_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = request(dir.path());
        request.transcript.source_csv = Some(dir.path().join("missing.csv"));
        let backend = backend(&dir.path().join("ws"), AutomationConfig::default());

        let staged = backend.prepare_workspace(&request).await.unwrap();

        assert!(staged.csv_copy.is_none());
        assert_eq!(staged.audio_files.len(), 2);
        assert!(staged.instructions_file.is_some());
    }

    #[tokio::test]
    async fn test_missing_template_falls_back_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let automation = AutomationConfig {
            project_template: Some(dir.path().join("no-such-template.ymmp")),
            ..AutomationConfig::default()
        };
        let backend = backend(dir.path(), automation);

        let project = backend.stage_project(dir.path());
        assert_eq!(project, dir.path().join(PLACEHOLDER_PROJECT));
        assert!(project.is_file());
    }

    #[tokio::test]
    async fn test_template_is_copied_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("base.ymmp");
        fs_err::write(&template, "{}").unwrap();
        let staging = dir.path().join("stage");
        fs_err::create_dir_all(&staging).unwrap();

        let automation = AutomationConfig {
            project_template: Some(template),
            ..AutomationConfig::default()
        };
        let project = backend(dir.path(), automation).stage_project(&staging);

        assert_eq!(project, staging.join("base.ymmp"));
        assert_eq!(fs_err::read_to_string(project).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_automation_without_configuration_is_an_error_value() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path(), AutomationConfig::default());

        let result = backend
            .attempt_external_automation(dir.path(), &dir.path().join(PLACEHOLDER_PROJECT))
            .await;
        assert!(matches!(result, Err(AutomationError::NotConfigured("autohotkey_path"))));
    }

    #[tokio::test]
    async fn test_render_failure_comes_from_baseline_not_automation() {
        let dir = tempfile::tempdir().unwrap();
        let request = request(dir.path());
        fs_err::write(&request.audio.path, b"RIFF").unwrap();
        let backend = backend(&dir.path().join("ws"), AutomationConfig::default());

        let mut outputs = ExportOutputs::default();
        let err = backend.render(&request, Some(&mut outputs)).await.unwrap_err();

        // Automation is unconfigured, so the only failure left is the missing encoder
        assert!(matches!(err, RenderError::EncoderUnavailable(_)));
        assert_eq!(outputs, ExportOutputs::default());
    }

    #[test]
    fn test_numbered_clip_name() {
        assert_eq!(numbered_clip_name(1, Path::new("x/intro.mp3")), "001.mp3");
        assert_eq!(numbered_clip_name(12, Path::new("noext")), "012.wav");
    }
}
