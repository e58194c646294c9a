use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use youtube_batch_lib::config::Settings;
use youtube_batch_lib::console::ConsoleSink;
use youtube_batch_lib::downloader::models::parse_limit;
use youtube_batch_lib::downloader::OutputSelection;
use youtube_batch_lib::{init_logging, run_batch, BatchRequest};

#[derive(Parser, Debug)]
#[command(name = "youtube-batch-downloader")]
#[command(version, about = "Import YouTube videos, playlists and channels and download them", long_about = None)]
struct Cli {
    /// Audio and video combined into one file (default when no -a/-v)
    #[arg(short = 'c', long)]
    combine: bool,

    /// Audio only
    #[arg(short = 'a', long)]
    audio: bool,

    /// Video only
    #[arg(short = 'v', long)]
    video: bool,

    /// Subtitles
    #[arg(short = 's', long)]
    subtitles: bool,

    #[arg(short = 't', long)]
    thumbnails: bool,

    /// Info JSON
    #[arg(short = 'i', long)]
    info: bool,

    #[arg(short = 'm', long)]
    comments: bool,

    /// Maximum resolution, e.g. 720p or max
    #[arg(short = 'r', long)]
    resolution: Option<String>,

    /// Maximum frame rate, e.g. 30 fps or max
    #[arg(short = 'f', long)]
    fps: Option<String>,

    /// Maximum audio bitrate, e.g. 128 kbps or max
    #[arg(short = 'b', long)]
    bitrate: Option<String>,

    /// Output directory
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Resolve URLs concurrently
    #[arg(long = "enable-analysis-threading", visible_alias = "eat")]
    analysis_threading: bool,

    /// Download items concurrently
    #[arg(long = "enable-download-threading", visible_alias = "edt")]
    download_threading: bool,

    /// Worker pool size
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// URLs or text containing URLs
    #[arg(required = true, num_args = 1..)]
    urls: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(dir) = cli.output {
        settings = settings.with_output_dir(dir);
    }
    if let Some(workers) = cli.workers {
        settings = settings.with_max_workers(workers);
    }
    let mut limits = settings.limits.clone();
    if let Some(bitrate) = &cli.bitrate {
        limits.max_audio_bitrate_kbps = parse_limit(bitrate, "kbps");
    }
    if let Some(resolution) = &cli.resolution {
        limits.max_resolution = parse_limit(resolution, "p");
    }
    if let Some(fps) = &cli.fps {
        limits.max_fps = parse_limit(fps, "fps");
    }
    let analysis = settings.analysis_concurrent || cli.analysis_threading;
    let download = settings.download_concurrent || cli.download_threading;
    settings = settings.with_concurrency(analysis, download).with_limits(limits);

    let selection = OutputSelection::from_flags(
        cli.combine,
        cli.audio,
        cli.video,
        cli.subtitles,
        cli.thumbnails,
        cli.info,
        cli.comments,
    );
    let request = BatchRequest {
        text: cli.urls.join("\n"),
        selection,
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling queued work");
                cancel.cancel();
            }
        }
    });

    let outcome = run_batch(&settings, request, Arc::new(ConsoleSink::new()), cancel)
        .await
        .context("batch failed")?;

    for url in &outcome.resolve.dropped {
        println!("Skipped: {}", url);
    }
    println!("{}", outcome.download);
    if outcome.download.errored > 0 {
        std::process::exit(1);
    }
    Ok(())
}
