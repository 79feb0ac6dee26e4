use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Extensions accepted as narration clips
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "aac", "flac", "ogg"];

/// Whether `path` looks like a narration clip
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Narration clips in `dir`, sorted by file name
pub fn list_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut clips = Vec::new();

    for entry in fs_err::read_dir(dir).with_context(|| format!("Failed to read audio directory {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && is_audio_file(&path) {
            clips.push(path);
        }
    }

    clips.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(clips)
}

/// Measure a clip's duration in seconds with ffprobe
pub async fn probe_duration(ffprobe: &Path, path: &Path) -> Result<f64> {
    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to run {}", ffprobe.display()))?;

    if !output.status.success() {
        let error = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Failed to analyze {} with ffprobe: {}", path.display(), error.trim());
    }

    let info: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    parse_probe_duration(&info)
        .with_context(|| format!("ffprobe reported no duration for {}", path.display()))
}

fn parse_probe_duration(info: &serde_json::Value) -> Option<f64> {
    let duration = &info["format"]["duration"];
    duration
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| duration.as_f64())
        .filter(|d| d.is_finite() && *d >= 0.0)
}

/// Measure every clip, in order
pub async fn probe_durations(ffprobe: &Path, clips: &[PathBuf]) -> Result<Vec<f64>> {
    let mut durations = Vec::with_capacity(clips.len());
    for clip in clips {
        let duration = probe_duration(ffprobe, clip).await?;
        tracing::debug!("{}: {:.3}s", clip.display(), duration);
        durations.push(duration);
    }
    Ok(durations)
}

/// Concatenate clips into a single WAV narration track
pub async fn concat_clips(ffmpeg: &Path, clips: &[PathBuf], output_path: &Path) -> Result<()> {
    if clips.is_empty() {
        anyhow::bail!("No narration clips to concatenate");
    }

    let list_path = output_path.with_extension("txt");
    fs_err::write(&list_path, concat_list(clips)?)?;

    tracing::debug!("Concatenating {} clips into {}", clips.len(), output_path.display());

    let output = Command::new(ffmpeg)
        .args(["-y", "-v", "error", "-f", "concat", "-safe", "0", "-i"])
        .arg(&list_path)
        .args(["-c:a", "pcm_s16le", "-ar", "44100", "-ac", "2"])
        .arg(output_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to run {}", ffmpeg.display()))?;

    if !output.status.success() {
        let error = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Failed to concatenate narration with ffmpeg: {}", error.trim());
    }

    Ok(())
}

/// Body of an FFmpeg concat-demuxer list file
fn concat_list(clips: &[PathBuf]) -> Result<String> {
    let mut list = String::new();
    for clip in clips {
        let absolute = clip
            .canonicalize()
            .with_context(|| format!("Narration clip not found: {}", clip.display()))?;
        let escaped = absolute.to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{}'\n", escaped));
    }
    Ok(list)
}
