use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use youtube_batch_lib::downloader::{
    Catalog, DownloadConfig, DownloadError, DownloadOrchestrator, Item, ItemStatus, MediaBackend, MediaInfo,
    OutputKind, OutputSelection, ProgressFn, ProgressSnapshot, StatusSink,
};
use youtube_batch_lib::downloader::models::Job;

/// Writes small placeholder files instead of downloading
#[derive(Default)]
struct StubBackend {
    /// Item ids whose video download fails
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    work_dirs: Mutex<Vec<PathBuf>>,
}

impl StubBackend {
    fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn write(&self, dir: &Path, name: String) -> Result<PathBuf, DownloadError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let path = dir.join(name);
        let result = tokio::fs::write(&path, b"data").await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result?;
        Ok(path)
    }
}

#[async_trait]
impl MediaBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn download_audio(
        &self,
        job: &Job,
        dir: &Path,
        progress: &ProgressFn<'_>,
    ) -> Result<PathBuf, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.work_dirs.lock().push(dir.to_path_buf());
        progress(50.0, "downloading audio");
        let path = self.write(dir, format!("{}.audio.m4a", job.file_stem())).await?;
        progress(100.0, "audio done");
        Ok(path)
    }

    async fn download_video(
        &self,
        job: &Job,
        dir: &Path,
        progress: &ProgressFn<'_>,
    ) -> Result<PathBuf, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.work_dirs.lock().push(dir.to_path_buf());
        if self.failing.contains(&job.item.id) {
            return Err(DownloadError::DownloadFailed("HTTP Error 403: Forbidden".to_string()));
        }
        progress(25.0, "downloading video");
        self.write(dir, format!("{}.video.mp4", job.file_stem())).await
    }

    async fn download_subtitles(&self, job: &Job, dir: &Path) -> Result<Vec<PathBuf>, DownloadError> {
        Ok(vec![self.write(dir, format!("{}.en.vtt", job.file_stem())).await?])
    }

    async fn combine(
        &self,
        video: &Path,
        audios: &[PathBuf],
        _subtitles: &[PathBuf],
        output: &Path,
    ) -> Result<PathBuf, DownloadError> {
        assert!(video.exists());
        assert!(audios.iter().all(|a| a.exists()));
        tokio::fs::write(output, b"muxed").await?;
        Ok(output.to_path_buf())
    }

    async fn save_extra(&self, job: &Job, kind: OutputKind, dir: &Path) -> Result<PathBuf, DownloadError> {
        let suffix = match kind {
            OutputKind::Thumbnail => "_thumbnail.jpg",
            OutputKind::Info => "_info.info.json",
            _ => "_comments.info.json",
        };
        self.write(dir, format!("{}{}", job.file_stem(), suffix)).await
    }
}

#[derive(Default)]
struct RecordingSink {
    statuses: Mutex<Vec<String>>,
    snapshots: Mutex<Vec<ProgressSnapshot>>,
}

impl StatusSink for RecordingSink {
    fn on_status(&self, message: &str) {
        self.statuses.lock().push(message.to_string());
    }

    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.snapshots.lock().push(*snapshot);
    }
}

fn catalog_with(ids: &[&str], selection: OutputSelection) -> Catalog {
    let titles: Vec<String> = ids.iter().map(|id| format!("Title {}", id)).collect();
    let items: Vec<(&str, &str)> = ids.iter().copied().zip(titles.iter().map(String::as_str)).collect();
    catalog_titled(&items, selection)
}

fn catalog_titled(items: &[(&str, &str)], selection: OutputSelection) -> Catalog {
    let catalog = Catalog::new();
    for (id, title) in items {
        let url = format!("https://x.com/watch?id={}", id);
        let mut item = Item::from_info(MediaInfo::new(*id, url).with_title(*title));
        item.selection = selection;
        assert!(catalog.add(item).is_inserted());
    }
    catalog
}

fn config_for(dir: &Path) -> DownloadConfig {
    DownloadConfig {
        output_dir: dir.to_path_buf(),
        ..DownloadConfig::default()
    }
}

#[tokio::test]
async fn failed_item_is_isolated_and_temp_dirs_are_removed() {
    let out = tempfile::tempdir().unwrap();
    let catalog = catalog_with(&["AAA", "BBB", "CCC"], OutputSelection::default());
    let backend = Arc::new(StubBackend::failing(&["BBB"]));

    let summary = DownloadOrchestrator::new(catalog.clone(), backend.clone())
        .run_catalog(false, &config_for(out.path()))
        .await;

    assert_eq!((summary.total, summary.done, summary.errored), (3, 2, 1));
    assert_eq!(catalog.get("AAA").unwrap().status, ItemStatus::Done);
    assert_eq!(catalog.get("BBB").unwrap().status, ItemStatus::Error);
    assert_eq!(catalog.get("CCC").unwrap().status, ItemStatus::Done);

    assert!(out.path().join("Title AAA [AAA].mkv").exists());
    assert!(out.path().join("Title CCC [CCC].mkv").exists());
    assert!(!out.path().join("Title BBB [BBB].mkv").exists());
    for id in ["AAA", "BBB", "CCC"] {
        assert!(!out.path().join(format!(".{}", id)).exists());
    }
    assert!(backend
        .work_dirs
        .lock()
        .iter()
        .all(|dir| dir.file_name().map_or(false, |n| n.to_string_lossy().starts_with('.'))));

    let log = catalog.get("BBB").unwrap().log;
    assert!(log.iter().any(|line| line.contains("403")));
}

#[tokio::test]
async fn separate_outputs_are_moved_into_the_output_dir() {
    let out = tempfile::tempdir().unwrap();
    let selection = OutputSelection::from_flags(false, true, false, true, false, true, false);
    let catalog = catalog_with(&["AAA"], selection);

    DownloadOrchestrator::new(catalog.clone(), Arc::new(StubBackend::default()))
        .run_catalog(false, &config_for(out.path()))
        .await;

    assert!(out.path().join("Title AAA [AAA].audio.m4a").exists());
    assert!(out.path().join("Title AAA [AAA].en.vtt").exists());
    assert!(out.path().join("Title AAA [AAA]_info.info.json").exists());
    assert!(!out.path().join("Title AAA [AAA].mkv").exists());
    assert!(!out.path().join(".AAA").exists());

    let item = catalog.get("AAA").unwrap();
    assert_eq!(item.status, ItemStatus::Done);
    assert_eq!(item.log.iter().filter(|line| line.starts_with("Saved")).count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_downloads_respect_the_worker_limit() {
    let out = tempfile::tempdir().unwrap();
    let ids = ["A1", "A2", "A3", "A4", "A5"];
    let catalog = catalog_with(&ids, OutputSelection::from_flags(false, true, false, false, false, false, false));
    let backend = Arc::new(StubBackend::default().with_delay(Duration::from_millis(20)));
    let sink = Arc::new(RecordingSink::default());

    let summary = DownloadOrchestrator::new(catalog.clone(), backend.clone())
        .with_sink(sink.clone())
        .with_max_workers(2)
        .with_interval(Duration::from_millis(5))
        .run_catalog(true, &config_for(out.path()))
        .await;

    assert_eq!(summary.done, 5);
    assert!(backend.peak.load(Ordering::SeqCst) <= 2);
    assert!(catalog.list().iter().all(|item| item.status == ItemStatus::Done));

    let percents: Vec<f64> = sink.snapshots.lock().iter().map(|s| s.percent()).collect();
    for pair in percents.windows(2) {
        assert!(pair[1] >= pair[0], "progress went from {} to {}", pair[0], pair[1]);
    }
    assert_eq!(percents.last().copied(), Some(100.0));
    let statuses = sink.statuses.lock();
    assert!(statuses
        .last()
        .map_or(false, |s| s.contains("Completed downloads 5 of 5")));
}

#[tokio::test]
async fn only_ready_items_are_downloaded() {
    let out = tempfile::tempdir().unwrap();
    let catalog = catalog_with(&["AAA", "BBB"], OutputSelection::default());
    catalog.transition("AAA", ItemStatus::InProgress).unwrap();
    catalog.transition("AAA", ItemStatus::Done).unwrap();
    let backend = Arc::new(StubBackend::default());

    let summary = DownloadOrchestrator::new(catalog.clone(), backend.clone())
        .run_catalog(true, &config_for(out.path()))
        .await;

    assert_eq!(summary.total, 1);
    // audio + video for BBB only
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert!(!out.path().join("Title AAA [AAA].mkv").exists());
    assert!(out.path().join("Title BBB [BBB].mkv").exists());
}

#[tokio::test]
async fn cancelled_batch_leaves_items_ready() {
    let out = tempfile::tempdir().unwrap();
    let catalog = catalog_with(&["AAA", "BBB"], OutputSelection::default());
    let backend = Arc::new(StubBackend::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = DownloadOrchestrator::new(catalog.clone(), backend.clone())
        .with_cancel(cancel)
        .run_catalog(true, &config_for(out.path()))
        .await;

    assert_eq!(summary.finished(), 0);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert!(catalog.list().iter().all(|item| item.status == ItemStatus::Ready));
}

#[tokio::test]
async fn empty_selection_finishes_without_files() {
    let out = tempfile::tempdir().unwrap();
    let catalog = catalog_with(&["AAA"], OutputSelection::none());
    let backend = Arc::new(StubBackend::default());

    let summary = DownloadOrchestrator::new(catalog.clone(), backend.clone())
        .run_catalog(false, &config_for(out.path()))
        .await;

    assert_eq!(summary.done, 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn a_finished_item_cannot_be_downloaded_twice() {
    let out = tempfile::tempdir().unwrap();
    let catalog = catalog_with(&["AAA"], OutputSelection::default());
    let backend = Arc::new(StubBackend::default());
    let orchestrator = DownloadOrchestrator::new(catalog.clone(), backend.clone());

    orchestrator.run_catalog(false, &config_for(out.path())).await;
    let second = orchestrator.run_catalog(false, &config_for(out.path())).await;

    assert_eq!(second.total, 0);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert!(matches!(
        catalog.transition("AAA", ItemStatus::InProgress),
        Err(DownloadError::InvalidTransition { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn items_sharing_a_title_do_not_share_files() {
    let out = tempfile::tempdir().unwrap();
    let catalog = catalog_titled(&[("BAD", "Same Title"), ("GOOD", "Same Title")], OutputSelection::default());
    // BAD fails while GOOD is still writing its video stream
    let backend = Arc::new(StubBackend::failing(&["BAD"]).with_delay(Duration::from_millis(20)));

    let summary = DownloadOrchestrator::new(catalog.clone(), backend.clone())
        .with_max_workers(2)
        .with_interval(Duration::from_millis(5))
        .run_catalog(true, &config_for(out.path()))
        .await;

    assert_eq!((summary.done, summary.errored), (1, 1));
    let good = catalog.get("GOOD").unwrap();
    assert_eq!(good.status, ItemStatus::Done, "{:?}", good.log);
    assert_eq!(catalog.get("BAD").unwrap().status, ItemStatus::Error);
    assert!(out.path().join("Same Title [GOOD].mkv").exists());
    assert!(!out.path().join("Same Title [BAD].mkv").exists());

    let dirs: HashSet<PathBuf> = backend.work_dirs.lock().iter().cloned().collect();
    assert_eq!(dirs.len(), 2);
}

#[tokio::test]
async fn degenerate_titles_never_touch_files_outside_the_job() {
    let base = tempfile::tempdir().unwrap();
    let out = base.path().join("out");
    std::fs::create_dir(&out).unwrap();
    std::fs::write(base.path().join("keep.txt"), b"keep").unwrap();
    std::fs::write(out.join("earlier.mkv"), b"earlier").unwrap();

    let catalog = catalog_titled(&[("DOT", "."), ("DOTS", ".."), ("EMPTY", "")], OutputSelection::default());
    let backend = Arc::new(StubBackend::failing(&["DOT", "DOTS"]));

    let summary = DownloadOrchestrator::new(catalog.clone(), backend)
        .run_catalog(false, &config_for(&out))
        .await;

    assert_eq!((summary.done, summary.errored), (1, 2));
    assert!(base.path().join("keep.txt").exists());
    assert!(out.join("earlier.mkv").exists());
    assert!(out.join("EMPTY.mkv").exists());
    for id in ["DOT", "DOTS", "EMPTY"] {
        assert!(!out.join(format!(".{}", id)).exists());
    }
}

#[tokio::test]
async fn sequential_progress_counts_the_running_item_fraction() {
    let out = tempfile::tempdir().unwrap();
    let audio_only = OutputSelection::from_flags(false, true, false, false, false, false, false);
    let catalog = catalog_with(&["AAA", "BBB"], audio_only);
    let sink = Arc::new(RecordingSink::default());

    DownloadOrchestrator::new(catalog, Arc::new(StubBackend::default()))
        .with_sink(sink.clone())
        .run_catalog(false, &config_for(out.path()))
        .await;

    let snapshots = sink.snapshots.lock();
    // first item half way: (0 + 0.5) / 2
    assert!(snapshots
        .iter()
        .any(|s| s.completed == 0 && s.total == 2 && s.fraction == 0.5 && s.percent() == 25.0));
    // second item half way: (1 + 0.5) / 2
    assert!(snapshots
        .iter()
        .any(|s| s.completed == 1 && s.total == 2 && s.fraction == 0.5 && s.percent() == 75.0));
    assert_eq!(snapshots.last().map(|s| s.percent()), Some(100.0));
}
