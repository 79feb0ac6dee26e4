use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::fallback::BackendConfig;
use crate::render::{AutomationConfig, RenderSettings};
use crate::segmenter::SegmenterConfig;
use crate::upload::Privacy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Rendering settings
    #[serde(default)]
    pub render: RenderConfig,

    /// Transcript segmentation settings
    #[serde(default)]
    pub segmentation: SegmenterConfig,

    /// Authoring tool automation
    #[serde(default)]
    pub automation: AutomationConfig,

    /// Fallback chain; the built-in chain is used when absent
    #[serde(default)]
    pub backends: Option<Vec<BackendConfig>>,

    /// Upload settings
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Directory receiving one folder per run
    pub output_dir: PathBuf,

    /// Directory receiving authoring workspaces
    pub workspace_root: PathBuf,

    /// FFmpeg executable
    pub ffmpeg_path: PathBuf,

    /// FFprobe executable
    pub ffprobe_path: PathBuf,

    /// Burn the transcript into the video as subtitles
    pub burn_subtitles: bool,

    /// Pause between retries of the same backend, in milliseconds
    pub retry_backoff_ms: u64,

    /// Disable backends whose tools are missing
    pub auto_detect: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// External program that publishes a finished video
    pub command: Option<PathBuf>,

    /// Privacy used when none is given on the command line
    pub default_privacy: Privacy,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            workspace_root: PathBuf::from("output").join("workspaces"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            burn_subtitles: true,
            retry_backoff_ms: 1000,
            auto_detect: true,
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config = Self::from_yaml(&content)?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Parse and validate YAML configuration
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("slidecast").join("config.yaml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let segmentation = &self.segmentation;
        if segmentation.max_subslides == 0 {
            anyhow::bail!("segmentation.max_subslides must be at least 1");
        }

        if !(segmentation.min_subslide_duration > 0.0) {
            anyhow::bail!("segmentation.min_subslide_duration must be positive");
        }

        if let Some(backends) = &self.backends {
            for backend in backends {
                if !(backend.timeout_seconds > 0.0) {
                    anyhow::bail!("backend {} must have a positive timeout", backend.kind);
                }
                if backend.retry_count == 0 {
                    anyhow::bail!("backend {} must have a retry_count of at least 1", backend.kind);
                }
            }
        }

        if let Some(timeout) = self.automation.timeout_seconds {
            if !(timeout > 0.0) {
                anyhow::bail!("automation.timeout_seconds must be positive");
            }
        }

        Ok(())
    }

    /// Settings handed to the render backends
    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            ffmpeg_path: self.render.ffmpeg_path.clone(),
            burn_subtitles: self.render.burn_subtitles,
            workspace_root: self.render.workspace_root.clone(),
            automation: self.automation.clone(),
            retry_backoff: Duration::from_millis(self.render.retry_backoff_ms),
        }
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Output Directory: {}", self.render.output_dir.display());
        println!("  Workspace Root: {}", self.render.workspace_root.display());
        println!("  FFmpeg: {}", self.render.ffmpeg_path.display());
        println!("  Burn Subtitles: {}", self.render.burn_subtitles);
        println!("  Auto Split: {}", self.segmentation.auto_split);
        println!(
            "  Split Threshold: {} chars (target {}, max {} sub-slides)",
            self.segmentation.threshold,
            self.segmentation.target_chars_per_subslide,
            self.segmentation.max_subslides
        );
        if let Some(tool) = &self.automation.autohotkey_path {
            println!("  Automation Tool: {}", tool.display());
        }
        if let Some(command) = &self.upload.command {
            println!("  Upload Command: {}", command.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::BackendKind;

    #[test]
    fn test_default_round_trips_through_yaml() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        let config = Config::from_yaml(&yaml).unwrap();

        assert_eq!(config.render.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.segmentation.max_subslides, 3);
        assert!(config.backends.is_none());
    }

    #[test]
    fn test_partial_backend_list() {
        let yaml = r#"
render:
  output_dir: out
  workspace_root: out/ws
  ffmpeg_path: /usr/bin/ffmpeg
  ffprobe_path: /usr/bin/ffprobe
  burn_subtitles: false
  retry_backoff_ms: 250
  auto_detect: false
segmentation:
  auto_split: true
  threshold: 40
  target_chars_per_subslide: 40
  max_subslides: 4
  min_subslide_duration: 1.0
backends:
  - kind: baseline
    priority: 1
    retry_count: 3
    extra_options:
      preset: veryfast
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let backends = config.backends.as_ref().unwrap();

        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].kind, BackendKind::Baseline);
        assert_eq!(backends[0].extra_options["preset"], "veryfast");
        assert_eq!(config.render_settings().retry_backoff, Duration::from_millis(250));
        assert!(config.upload.command.is_none());
    }

    #[test]
    fn test_backend_tags_accept_legacy_names() {
        let yaml = r#"
backends:
  - kind: ymm4
    priority: 1
  - kind: moviepy
    priority: 2
  - kind: ffmpeg
    priority: 3
  - kind: remotion
    priority: 4
    enabled: false
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let kinds: Vec<BackendKind> = config.backends.unwrap().iter().map(|b| b.kind).collect();

        assert_eq!(
            kinds,
            vec![BackendKind::Authoring, BackendKind::Baseline, BackendKind::Baseline, BackendKind::Remote]
        );
        assert_eq!(serde_yaml::to_string(&BackendKind::Baseline).unwrap().trim(), "baseline");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.segmentation.max_subslides = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.segmentation.min_subslide_duration = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backends = Some(vec![
            BackendConfig::new(BackendKind::Baseline, 1).with_timeout(0.0)
        ]);
        assert!(config.validate().is_err());
    }
}
