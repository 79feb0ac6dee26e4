use std::path::Path;

/// Byte count with a binary unit, e.g. `1.5 KB`
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if size < 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = *next;
    }

    format!("{:.1} {}", size, unit)
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0).round() as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Sanitize filename for safe filesystem usage
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            // Keep alphanumeric characters, hyphens, underscores, and dots
            c if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' => c,
            _ => '_',
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Unique, sortable name for a run or workspace directory
pub fn generate_run_id(base_name: &str) -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let random_suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

    let base = sanitize_filename(base_name);
    let base = if base.is_empty() { "run".to_string() } else { base };

    format!("{}_{}_{}", base, timestamp, random_suffix)
}

/// File stem of `path` as an owned string
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("slidecast")
        .to_string()
}

/// Check if the current environment has the external tools the renderers use
pub fn check_dependencies(ffmpeg: &Path, ffprobe: &Path) -> Vec<String> {
    let mut missing = Vec::new();

    if which::which(ffmpeg).is_err() {
        missing.push(format!("{} - required for rendering and audio concatenation", ffmpeg.display()));
    }

    if which::which(ffprobe).is_err() {
        missing.push(format!("{} - required to measure narration clips", ffprobe.display()));
    }

    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1048576), "1.0 MB");
        assert_eq!(format_file_size(5 * 1024u64.pow(5)), "5120.0 TB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
        assert_eq!(format_duration(-5.0), "0s");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Hello World!"), "Hello_World");
        assert_eq!(sanitize_filename("test/file?name"), "test_file_name");
        assert_eq!(sanitize_filename("  spaced  "), "spaced");
        assert_eq!(sanitize_filename("会議メモ"), "会議メモ");
    }

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id("my talk");
        assert!(id.starts_with("my_talk_"));
        assert_ne!(id, generate_run_id("my talk"));
        assert!(generate_run_id("???").starts_with("run_"));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(Path::new("dir/episode-01.csv")), "episode-01");
    }
}
