use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use tokio::process::Command;

use crate::render::VideoInfo;
use crate::SlidecastError;

/// Visibility of an uploaded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Private,
    Unlisted,
    Public,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Private => "private",
            Privacy::Unlisted => "unlisted",
            Privacy::Public => "public",
        }
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Privacy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "private" => Ok(Privacy::Private),
            "unlisted" => Ok(Privacy::Unlisted),
            "public" => Ok(Privacy::Public),
            other => Err(format!("unknown privacy setting: {}", other)),
        }
    }
}

/// What to publish alongside the video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub title: String,
    pub description: String,
    pub privacy: Privacy,
}

/// Where the video ended up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Last line the uploader printed, usually a video URL or id
    pub location: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Publishes a rendered video
#[async_trait]
pub trait VideoUploader: Send + Sync {
    async fn upload(&self, video: &VideoInfo, request: &UploadRequest) -> Result<UploadReceipt>;
}

/// Hands the video to an external upload program.
///
/// Invoked as `<command> <video> --title <title> --description <text> --privacy <privacy>`.
pub struct CommandUploader {
    command: PathBuf,
}

impl CommandUploader {
    pub fn new(command: PathBuf) -> Self {
        Self { command }
    }
}

#[async_trait]
impl VideoUploader for CommandUploader {
    async fn upload(&self, video: &VideoInfo, request: &UploadRequest) -> Result<UploadReceipt> {
        tracing::info!("Uploading {} as {}", video.path.display(), request.privacy);

        let output = Command::new(&self.command)
            .arg(&video.path)
            .args(["--title", request.title.as_str()])
            .args(["--description", request.description.as_str()])
            .args(["--privacy", request.privacy.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to run uploader {}", self.command.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SlidecastError::UploadFailed(format!("{}: {}", output.status, stderr.trim())).into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let location = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);

        Ok(UploadReceipt {
            location,
            uploaded_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_parsing() {
        assert_eq!("Public".parse::<Privacy>().unwrap(), Privacy::Public);
        assert_eq!(Privacy::default(), Privacy::Private);
        assert!("secret".parse::<Privacy>().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_uploader_reports_last_line() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("upload.sh");
        fs_err::write(&script, "#!/bin/sh\necho uploading \"$1\"\necho https://example.invalid/v/abc\n").unwrap();
        fs_err::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let video = VideoInfo {
            path: dir.path().join("video.mp4"),
            duration: 1.0,
            resolution: (1280, 720),
            fps: 30,
            file_size: 10,
            created_at: Utc::now(),
        };
        let request = UploadRequest {
            title: "Episode 1".to_string(),
            description: String::new(),
            privacy: Privacy::Unlisted,
        };

        let receipt = CommandUploader::new(script).upload(&video, &request).await.unwrap();
        assert_eq!(receipt.location.as_deref(), Some("https://example.invalid/v/abc"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_uploader_failure() {
        let video = VideoInfo {
            path: PathBuf::from("video.mp4"),
            duration: 1.0,
            resolution: (1280, 720),
            fps: 30,
            file_size: 10,
            created_at: Utc::now(),
        };
        let request = UploadRequest {
            title: "t".to_string(),
            description: String::new(),
            privacy: Privacy::Private,
        };

        let err = CommandUploader::new(PathBuf::from("false"))
            .upload(&video, &request)
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<SlidecastError>(), Some(SlidecastError::UploadFailed(_))));
    }
}
