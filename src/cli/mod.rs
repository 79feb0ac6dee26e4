use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::render::{BackendKind, Quality};
use crate::upload::Privacy;

#[derive(Parser)]
#[command(
    name = "slidecast",
    about = "Slidecast - Turn a CSV transcript and narration clips into a slide video",
    version,
    long_about = "Builds a timeline from a speaker/text CSV and one narration clip per row, splits long lines into continuation slides, and renders the result through a chain of fallback backends."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a video from a CSV transcript
    Render {
        /// CSV file with speaker,text[,slide] rows
        #[arg(long, value_name = "FILE")]
        csv: PathBuf,

        /// Directory holding one narration clip per CSV row
        #[arg(long, value_name = "DIR")]
        audio_dir: PathBuf,

        /// Directory of slide images, matched by file-name order
        #[arg(long, value_name = "DIR")]
        slides_dir: Option<PathBuf>,

        /// Output quality (low, medium, high)
        #[arg(long, default_value = "medium")]
        quality: Quality,

        /// Output directory (defaults to the configured one)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Try this backend before the rest of the chain
        #[arg(long, value_name = "KIND")]
        backend: Option<BackendKind>,

        /// Keep every transcript row on a single slide
        #[arg(long)]
        no_auto_split: bool,

        /// Publish the finished video with the configured upload command
        #[arg(long)]
        upload: bool,

        /// Upload privacy (private, unlisted, public)
        #[arg(long, requires = "upload")]
        privacy: Option<Privacy>,

        /// Upload title (defaults to the CSV file name)
        #[arg(long, requires = "upload")]
        title: Option<String>,
    },

    /// Show the render backend chain
    Backends,

    /// Show or create the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_render_command() {
        let cli = Cli::try_parse_from([
            "slidecast", "render", "--csv", "talk.csv", "--audio-dir", "clips",
            "--quality", "1080p", "--backend", "ffmpeg", "--no-auto-split",
        ])
        .unwrap();

        match cli.command {
            Commands::Render { csv, quality, backend, no_auto_split, upload, .. } => {
                assert_eq!(csv, PathBuf::from("talk.csv"));
                assert_eq!(quality, Quality::High);
                assert_eq!(backend, Some(BackendKind::Baseline));
                assert!(no_auto_split);
                assert!(!upload);
            }
            _ => panic!("expected render command"),
        }
    }

    #[test]
    fn test_privacy_requires_upload() {
        let result = Cli::try_parse_from([
            "slidecast", "render", "--csv", "a.csv", "--audio-dir", "a", "--privacy", "public",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let result = Cli::try_parse_from([
            "slidecast", "render", "--csv", "a.csv", "--audio-dir", "a", "--backend", "blender",
        ]);
        assert!(result.is_err());
    }
}
