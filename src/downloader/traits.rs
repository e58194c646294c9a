// Backend and presentation seams

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::errors::DownloadError;
use super::models::{Job, OutputKind, ProgressSnapshot};

/// Per-stream progress callback: percent in `[0, 100]` and a status line
pub type ProgressFn<'a> = dyn for<'s> Fn(f32, &'s str) + Send + Sync + 'a;

/// Produces the files of a job (download + mux)
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Download the best audio stream within the job limits into `dir`
    async fn download_audio(
        &self,
        job: &Job,
        dir: &Path,
        progress: &ProgressFn<'_>,
    ) -> Result<PathBuf, DownloadError>;

    /// Download the best video-only stream within the job limits into `dir`
    async fn download_video(
        &self,
        job: &Job,
        dir: &Path,
        progress: &ProgressFn<'_>,
    ) -> Result<PathBuf, DownloadError>;

    async fn download_subtitles(&self, job: &Job, dir: &Path) -> Result<Vec<PathBuf>, DownloadError>;

    /// Mux a video with audio and subtitle tracks into `output`
    async fn combine(
        &self,
        video: &Path,
        audios: &[PathBuf],
        subtitles: &[PathBuf],
        output: &Path,
    ) -> Result<PathBuf, DownloadError>;

    /// Thumbnail, info or comments
    async fn save_extra(&self, job: &Job, kind: OutputKind, dir: &Path) -> Result<PathBuf, DownloadError>;
}

/// Capability the core reports through; implemented per presentation surface
pub trait StatusSink: Send + Sync {
    /// Most recent meaningful event, human readable
    fn on_status(&self, message: &str);

    fn on_progress(&self, snapshot: &ProgressSnapshot);

    /// Sub-progress of one item's job
    fn on_item_progress(&self, _item_id: &str, _percent: f32, _status: &str) {}
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn on_status(&self, _message: &str) {}

    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn on_status(&self, message: &str) {
        tracing::info!("[Status] {}", message);
    }

    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        tracing::debug!(
            completed = snapshot.completed,
            total = snapshot.total,
            active = snapshot.active_workers,
            errored = snapshot.errored,
            "[Progress] {:.2}%",
            snapshot.percent()
        );
    }

    fn on_item_progress(&self, item_id: &str, percent: f32, status: &str) {
        tracing::trace!("[Progress] {} {:.1}% {}", item_id, percent, status);
    }
}
