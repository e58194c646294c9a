pub mod config;
pub mod console;
pub mod downloader;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use config::Settings;
use downloader::backends::YtDlpBackend;
use downloader::extractors::{HttpPageFetcher, ResolverChain, ResolverMode, YtDlpResolver};
use downloader::{
    BatchSummary, Catalog, DownloadError, DownloadOrchestrator, OutputSelection, ResolutionFrontier, ResolveReport,
    StatusSink,
};

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `default_level`;
/// calling it twice is harmless.
pub fn init_logging(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// One import-and-download run
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Free text holding the URLs to import
    pub text: String,
    pub selection: OutputSelection,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub resolve: ResolveReport,
    pub download: BatchSummary,
}

/// Resolve the request's URLs with yt-dlp, then download every resolved
/// item with yt-dlp + ffmpeg. The binary is preferred; the python module
/// serves resolution, enumeration and downloads when the binary is missing.
pub async fn run_batch(
    settings: &Settings,
    request: BatchRequest,
    sink: Arc<dyn StatusSink>,
    cancel: CancellationToken,
) -> Result<BatchOutcome, DownloadError> {
    let resolver_config = settings.resolver_config();

    // Probing spawns yt-dlp and python synchronously
    let chain = tokio::task::spawn_blocking({
        let resolver_config = resolver_config.clone();
        let use_fallback = settings.use_fallback_resolver;
        move || {
            let chain = ResolverChain::new(Arc::new(YtDlpResolver::cli(resolver_config.clone())));
            if use_fallback {
                chain.with_fallback(Arc::new(YtDlpResolver::python_module(resolver_config)))
            } else {
                chain
            }
        }
    })
    .await
    .map_err(|e| DownloadError::Unknown(format!("resolver probe failed: {}", e)))?;

    let status = chain.status();
    tracing::info!(
        "[Resolver] primary available: {}, fallback available: {}",
        status.primary_available,
        status.fallback_available
    );
    if !status.any_available() {
        return Err(DownloadError::ToolNotFound(
            "yt-dlp (install it or set YTDLP_PATH)".to_string(),
        ));
    }
    let mode = if status.primary_available {
        ResolverMode::Cli
    } else {
        ResolverMode::Python
    };
    let chain = Arc::new(chain);

    let fetcher = Arc::new(HttpPageFetcher::new(settings.proxy.as_deref())?);
    let catalog = Catalog::new();

    let frontier = ResolutionFrontier::new(catalog.clone(), chain.clone(), chain, fetcher)
        .with_extractor(settings.url_extractor())
        .with_page_timeout(settings.page_fetch_timeout())
        .with_selection(request.selection)
        .with_sink(sink.clone())
        .with_max_workers(settings.max_workers)
        .with_interval(settings.diagnostics_interval())
        .with_cancel(cancel.clone());

    let resolve = frontier
        .resolve_text(&request.text, settings.analysis_concurrent)
        .await;
    if catalog.is_empty() || cancel.is_cancelled() {
        return Ok(BatchOutcome {
            resolve,
            download: catalog.status_counts(),
        });
    }

    let download_config = settings.download_config();
    tokio::fs::create_dir_all(&download_config.output_dir).await?;

    let orchestrator = DownloadOrchestrator::new(catalog, Arc::new(YtDlpBackend::new(mode, resolver_config)))
        .with_sink(sink)
        .with_max_workers(settings.max_workers)
        .with_interval(settings.diagnostics_interval())
        .with_cancel(cancel);
    let download = orchestrator
        .run_catalog(settings.download_concurrent, &download_config)
        .await;

    Ok(BatchOutcome { resolve, download })
}
