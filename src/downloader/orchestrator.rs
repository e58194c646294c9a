// Download orchestrator - drives each item's job through the state machine
//
// Ready -> InProgress right before the job starts, then Done or Error.
// Every job works in its own hidden temp directory which is removed
// whatever the outcome. After each terminal transition the batch summary
// is republished.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::catalog::Catalog;
use super::errors::DownloadError;
use super::extractors::{describe_failure, diagnose};
use super::models::{BatchSummary, DownloadConfig, ItemStatus, Job, OutputKind, ProgressSnapshot};
use super::pool::{PoolStats, WorkerPool};
use super::progress::MonotonicSink;
use super::traits::{MediaBackend, NullSink, StatusSink};

pub const DOWNLOAD_LABEL: &str = "Download(s)";

/// Sub-progress of the items currently downloading, in whole units
#[derive(Debug, Default)]
struct InFlight {
    fractions: Mutex<HashMap<String, f64>>,
}

impl InFlight {
    fn set(&self, id: &str, percent: f32) {
        let fraction = (f64::from(percent) / 100.0).clamp(0.0, 1.0);
        self.fractions.lock().insert(id.to_string(), fraction);
    }

    fn clear(&self, id: &str) {
        self.fractions.lock().remove(id);
    }

    fn total(&self) -> f64 {
        self.fractions.lock().values().sum()
    }
}

/// Everything one job needs, shareable with pool tasks
struct JobRunner {
    catalog: Catalog,
    backend: Arc<dyn MediaBackend>,
    sink: Arc<dyn StatusSink>,
    in_flight: InFlight,
    batch: Vec<String>,
}

impl JobRunner {
    fn snapshot(&self) -> (BatchSummary, ProgressSnapshot) {
        let summary = self.catalog.summary_for(&self.batch);
        (summary, summary.snapshot().with_fraction(self.in_flight.total()))
    }

    fn publish(&self) -> BatchSummary {
        let (summary, snapshot) = self.snapshot();
        self.sink.on_status(&summary.to_string());
        self.sink.on_progress(&snapshot);
        summary
    }

    /// Run one item to a terminal state. Only a state machine violation
    /// is returned as an error; job failures end in `Error`.
    async fn run_item(&self, id: &str, config: &DownloadConfig) -> Result<ItemStatus, DownloadError> {
        let item = self.catalog.get(id)?;
        self.catalog.transition(id, ItemStatus::InProgress)?;
        self.catalog.log(id, "Download started")?;
        tracing::info!("[Orchestrator] downloading {} ({})", item.title, id);

        let job = Job::new(item, config.clone());
        let result = self.run_job(&job).await;
        self.in_flight.clear(id);

        let status = match result {
            Ok(files) => {
                self.catalog.update(id, |item| {
                    for file in &files {
                        item.log(format!("Saved {}", file.display()));
                    }
                })?;
                ItemStatus::Done
            }
            Err(e) => {
                let reason = describe_failure(&e);
                tracing::warn!("[Orchestrator] {} failed: {}", id, e);
                if diagnose(&e).map_or(false, |r| r.cookies_might_help()) {
                    tracing::info!("[Orchestrator] {} may work with a cookies file (cookies_path)", id);
                }
                self.catalog.log(id, format!("Error: {}", e))?;
                self.sink.on_status(&format!("{}: {}", job.item.title, reason));
                ItemStatus::Error
            }
        };

        self.catalog.transition(id, status)?;
        self.publish();
        Ok(status)
    }

    async fn run_job(&self, job: &Job) -> Result<Vec<PathBuf>, DownloadError> {
        let temp = job.temp_dir();
        tokio::fs::create_dir_all(&temp).await?;
        self.catalog
            .log(&job.item.id, format!("Create temporary directory: {}", temp.display()))?;

        let result = self.produce(job, &temp).await;

        if let Err(e) = tokio::fs::remove_dir_all(&temp).await {
            tracing::warn!("[Orchestrator] could not remove {}: {}", temp.display(), e);
        }
        result
    }

    async fn produce(&self, job: &Job, temp: &Path) -> Result<Vec<PathBuf>, DownloadError> {
        let selection = job.item.selection;
        let output_dir = &job.config.output_dir;
        let id = job.item.id.clone();
        let progress = |percent: f32, status: &str| {
            self.in_flight.set(&id, percent);
            self.sink.on_item_progress(&id, percent, status);
            self.sink.on_progress(&self.snapshot().1);
        };
        let mut produced = Vec::new();

        let audio = if selection.needs_audio() {
            Some(self.backend.download_audio(job, temp, &progress).await?)
        } else {
            None
        };
        let video = if selection.needs_video() {
            Some(self.backend.download_video(job, temp, &progress).await?)
        } else {
            None
        };
        let subtitles = if selection.contains(OutputKind::Subtitles) {
            self.backend.download_subtitles(job, temp).await?
        } else {
            Vec::new()
        };

        if selection.contains(OutputKind::Combined) {
            if let (Some(video), Some(audio)) = (&video, &audio) {
                let output = job.output_file();
                let combined = self
                    .backend
                    .combine(video, std::slice::from_ref(audio), &subtitles, &output)
                    .await?;
                produced.push(combined);
            }
        }
        if selection.contains(OutputKind::AudioOnly) {
            if let Some(audio) = &audio {
                produced.push(move_into(audio, output_dir).await?);
            }
        }
        if selection.contains(OutputKind::VideoOnly) {
            if let Some(video) = &video {
                produced.push(move_into(video, output_dir).await?);
            }
        }
        for subtitle in &subtitles {
            produced.push(move_into(subtitle, output_dir).await?);
        }

        for kind in [OutputKind::Thumbnail, OutputKind::Info, OutputKind::Comments] {
            if selection.contains(kind) {
                produced.push(self.backend.save_extra(job, kind, output_dir).await?);
            }
        }

        Ok(produced)
    }
}

/// Move a finished file from the temp dir into `dir`, keeping its name
async fn move_into(file: &Path, dir: &Path) -> Result<PathBuf, DownloadError> {
    let name = file
        .file_name()
        .ok_or_else(|| DownloadError::Io(format!("{} has no file name", file.display())))?;
    let target = dir.join(name);
    if tokio::fs::rename(file, &target).await.is_err() {
        tokio::fs::copy(file, &target).await?;
        tokio::fs::remove_file(file).await?;
    }
    Ok(target)
}

pub struct DownloadOrchestrator {
    catalog: Catalog,
    backend: Arc<dyn MediaBackend>,
    sink: Arc<dyn StatusSink>,
    max_workers: usize,
    interval: Duration,
    cancel: CancellationToken,
}

impl DownloadOrchestrator {
    pub fn new(catalog: Catalog, backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            catalog,
            backend,
            sink: Arc::new(NullSink),
            max_workers: 4,
            interval: Duration::from_millis(100),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Download every Ready item of the catalog
    pub async fn run_catalog(&self, concurrent: bool, config: &DownloadConfig) -> BatchSummary {
        let ids = self.catalog.ids();
        self.run_all(&ids, concurrent, config).await
    }

    /// Drive the given items to a terminal state and return the final
    /// summary. Items that are not Ready are skipped.
    pub async fn run_all(&self, ids: &[String], concurrent: bool, config: &DownloadConfig) -> BatchSummary {
        let batch: Vec<String> = ids
            .iter()
            .filter(|id| match self.catalog.get(id) {
                Ok(item) if item.status == ItemStatus::Ready => true,
                Ok(item) => {
                    tracing::info!("[Orchestrator] skipping {} ({})", id, item.status.label());
                    false
                }
                Err(e) => {
                    tracing::warn!("[Orchestrator] {}", e);
                    false
                }
            })
            .cloned()
            .collect();

        let runner = Arc::new(JobRunner {
            catalog: self.catalog.clone(),
            backend: self.backend.clone(),
            sink: Arc::new(MonotonicSink::new(self.sink.clone())),
            in_flight: InFlight::default(),
            batch: batch.clone(),
        });
        runner.publish();

        let pool = WorkerPool::new(DOWNLOAD_LABEL, self.max_workers)
            .with_sink(runner.sink.clone())
            .with_interval(self.interval)
            .with_cancel(self.cancel.clone())
            .with_progress_source({
                let runner = runner.clone();
                Arc::new(move |_: &PoolStats| runner.snapshot().1)
            });

        if concurrent {
            let handles: Vec<_> = batch
                .iter()
                .map(|id| {
                    let runner = runner.clone();
                    let id = id.clone();
                    let config = config.clone();
                    pool.spawn(&format!("download {}", id), async move { runner.run_item(&id, &config).await })
                })
                .collect();
            for handle in handles {
                let name = handle.name().to_string();
                if handle.join().await.is_none() {
                    tracing::debug!("[Orchestrator] {} did not complete", name);
                }
            }
            pool.finish_diagnostics().await;
        } else {
            for id in &batch {
                let name = format!("download {}", id);
                if pool.run_inline(&name, runner.run_item(id, config)).await.is_none() {
                    tracing::debug!("[Orchestrator] {} did not complete", name);
                }
            }
        }

        let summary = runner.publish();
        tracing::info!("[Orchestrator] {}", summary);
        summary
    }
}
