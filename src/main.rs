use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slidecast::fallback::FallbackManager;
use slidecast::pipeline::{CsvTimelinePipeline, RunOptions};
use slidecast::upload::{CommandUploader, UploadRequest};
use slidecast::{utils, Cli, Commands, Config, SlidecastError};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "slidecast=debug" } else { "slidecast=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            let _ = cancel_tx.send(true);
        }
    });

    match run(cli, cancel_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if matches!(err.downcast_ref::<SlidecastError>(), Some(SlidecastError::Cancelled)) {
                eprintln!("{}", style("Cancelled").yellow());
                return ExitCode::from(130);
            }
            eprintln!("{} {:#}", style("Error:").red().bold(), err);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, cancel: watch::Receiver<bool>) -> Result<()> {
    let mut config = Config::load().await?;

    match cli.command {
        Commands::Render {
            csv,
            audio_dir,
            slides_dir,
            quality,
            output,
            backend,
            no_auto_split,
            upload,
            privacy,
            title,
        } => {
            // Check for required external tools (non-fatal, a backend may not need them)
            let missing_deps = utils::check_dependencies(&config.render.ffmpeg_path, &config.render.ffprobe_path);
            if !missing_deps.is_empty() {
                eprintln!("⚠️  Dependency check warnings:");
                for dep in missing_deps {
                    eprintln!("   • {}", dep);
                }
            }

            if no_auto_split {
                config.segmentation.auto_split = false;
            }

            let upload_request = if upload {
                Some(UploadRequest {
                    title: title.unwrap_or_else(|| utils::file_stem(&csv)),
                    description: String::new(),
                    privacy: privacy.unwrap_or(config.upload.default_privacy),
                })
            } else {
                None
            };

            let uploader = match (&upload_request, &config.upload.command) {
                (Some(_), Some(command)) => Some(CommandUploader::new(command.clone())),
                (Some(_), None) => {
                    anyhow::bail!("--upload needs upload.command in {}", Config::config_path()?.display())
                }
                _ => None,
            };

            let mut pipeline = CsvTimelinePipeline::new(config, cancel).with_progress(!cli.quiet);
            if let Some(uploader) = uploader {
                pipeline = pipeline.with_uploader(Box::new(uploader));
            }

            tracing::info!("Rendering {} with narration from {}", csv.display(), audio_dir.display());

            let options = RunOptions {
                csv_path: csv,
                audio_dir,
                slides_dir,
                quality,
                output_dir: output,
                preferred_backend: backend,
                upload: upload_request,
            };
            let artifacts = pipeline.run(&options).await?;

            println!("{} {}", style("Video:").green().bold(), artifacts.video.path.display());
            println!(
                "  {} slides, {}, {}x{}, {}",
                artifacts.slide_count,
                utils::format_duration(artifacts.video.duration),
                artifacts.video.resolution.0,
                artifacts.video.resolution.1,
                utils::format_file_size(artifacts.video.file_size)
            );
            if let Some(used) = artifacts.render.used_backend {
                println!("  Backend: {} (tried {})", used, artifacts.render.attempted_backends.len());
            }
            if let Some(workspace) = &artifacts.exports.workspace_dir {
                println!("  Workspace: {}", workspace.display());
            }
            if let Some(receipt) = &artifacts.upload {
                println!(
                    "  Uploaded: {}",
                    receipt.location.as_deref().unwrap_or("(no location reported)")
                );
            }
        }
        Commands::Backends => {
            let mut manager = FallbackManager::new(config.backends.clone(), config.render_settings());
            if config.render.auto_detect {
                manager.auto_detect();
            }

            let status = manager.status();
            println!("Render backends (in fallback order):");
            for backend in &status.backends {
                let state = if backend.enabled {
                    style("enabled").green()
                } else {
                    style("disabled").dim()
                };
                println!(
                    "  {}. {:<10} {}  timeout {:.0}s, {} attempt(s)",
                    backend.priority, backend.kind, state, backend.timeout_seconds, backend.retry_count
                );
            }
            if status.available.is_empty() {
                println!("{}", style("No backend is enabled; renders will fail").yellow());
            }
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                let path = Config::config_path().context("Could not locate configuration file")?;
                println!("Configuration file: {}", path.display());
            }
        }
    }

    Ok(())
}
