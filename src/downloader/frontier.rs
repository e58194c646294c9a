// Resolution frontier - expands a seed (text or URL list) into catalog items
//
// Each task resolves one URL. When resolution fails and the task's mode
// allows it, the URL is classified and expanded: playlists and channels
// through the enumerator, anything else by scraping the page. Expansion
// returns child tasks to the coordinator instead of awaiting them, so a
// task never holds a worker while waiting on its own children.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::catalog::{AddOutcome, Catalog};
use super::classify::{classify, UrlKind};
use super::errors::DownloadError;
use super::extractors::{describe_failure, CollectionEnumerator, ItemResolver, PageFetcher};
use super::links::UrlExtractor;
use super::models::{Item, OutputSelection, ProgressSnapshot, ResolutionMode, ResolutionTask};
use super::pool::{PoolStats, WorkerPool};
use super::progress::{MonotonicSink, UnitProgress};
use super::traits::{NullSink, StatusSink};

pub const ANALYSIS_LABEL: &str = "URL check(s)";
pub const ANALYSIS_COMPLETE: &str = "URL import and Analysis is Complete!";

/// What to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seed {
    /// Free text; URLs are extracted from it
    Text(String),
    /// Already materialized URLs (playlist or channel entries)
    Urls(Vec<String>),
}

/// Outcome of one `resolve` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Top-level units after dedup against the catalog
    pub candidates: usize,
    pub inserted: usize,
    /// Resolved, but the id was already in the catalog
    pub duplicates: usize,
    /// URLs that yielded nothing after all fallbacks
    pub dropped: Vec<String>,
    pub pruned: usize,
    pub cancelled: usize,
}

/// Per-call state shared by all tasks of one `resolve`
struct CallState {
    visited: Mutex<HashSet<String>>,
    progress: UnitProgress,
    inserted: AtomicUsize,
    duplicates: AtomicUsize,
    dropped: Mutex<Vec<String>>,
}

impl CallState {
    fn new(units: usize) -> Self {
        Self {
            visited: Mutex::new(HashSet::new()),
            progress: UnitProgress::new(units),
            inserted: AtomicUsize::new(0),
            duplicates: AtomicUsize::new(0),
            dropped: Mutex::new(Vec::new()),
        }
    }
}

/// Collaborators every task needs
struct Resolvers {
    catalog: Catalog,
    resolver: Arc<dyn ItemResolver>,
    enumerator: Arc<dyn CollectionEnumerator>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: UrlExtractor,
    page_timeout: Duration,
    selection: OutputSelection,
}

impl Resolvers {
    /// Resolve one URL; on failure return the child tasks of its expansion
    async fn resolve_one(&self, call: &CallState, task: &ResolutionTask) -> Result<Vec<ResolutionTask>, DownloadError> {
        let error = match self.resolver.resolve_item(&task.url).await {
            Ok(info) => {
                let id = info.id.clone();
                let mut item = Item::from_info(info);
                item.selection = self.selection;
                item.log(format!("Resolved from {}", task.url));

                match self.catalog.add(item) {
                    AddOutcome::Inserted { .. } => {
                        call.inserted.fetch_add(1, Ordering::SeqCst);
                        tracing::debug!("[Frontier] added {} from {}", id, task.url);
                        self.catalog.add_alias(&task.url, &id);
                    }
                    AddOutcome::Duplicate { existing_id } => {
                        call.duplicates.fetch_add(1, Ordering::SeqCst);
                        tracing::debug!("[Frontier] duplicate {} discarded ({})", id, task.url);
                        self.catalog.add_alias(&task.url, &existing_id);
                    }
                }
                return Ok(Vec::new());
            }
            Err(e) => e,
        };

        if !task.mode.allows_expansion() {
            return Err(error);
        }

        let kind = classify(&task.url);
        tracing::debug!(
            "[Frontier] {} did not resolve ({}), expanding as {:?}",
            task.url,
            describe_failure(&error),
            kind
        );

        let (urls, mode) = match kind {
            UrlKind::Playlist => (
                self.enumerator.list_playlist_urls(&task.url).await?,
                ResolutionMode::FromPlaylist,
            ),
            UrlKind::Channel => (
                self.enumerator.list_channel_urls(&task.url).await?,
                ResolutionMode::FromChannel,
            ),
            UrlKind::SingleItem | UrlKind::OpaquePage => {
                let body = self.fetcher.fetch_page(&task.url, self.page_timeout).await?;
                let scraped = self
                    .extractor
                    .extract(&body)
                    .urls
                    .into_iter()
                    .filter(|u| classify(u) == UrlKind::SingleItem)
                    .collect();
                (scraped, ResolutionMode::FromPage)
            }
        };

        Ok(urls
            .into_iter()
            .map(|url| ResolutionTask {
                url,
                mode,
                root: task.root,
            })
            .collect())
    }
}

pub struct ResolutionFrontier {
    resolvers: Arc<Resolvers>,
    sink: Arc<dyn StatusSink>,
    max_workers: usize,
    interval: Duration,
    cancel: CancellationToken,
}

impl ResolutionFrontier {
    pub fn new(
        catalog: Catalog,
        resolver: Arc<dyn ItemResolver>,
        enumerator: Arc<dyn CollectionEnumerator>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            resolvers: Arc::new(Resolvers {
                catalog,
                resolver,
                enumerator,
                fetcher,
                extractor: UrlExtractor::new(),
                page_timeout: Duration::from_secs(10),
                selection: OutputSelection::default(),
            }),
            sink: Arc::new(NullSink),
            max_workers: 4,
            interval: Duration::from_millis(100),
            cancel: CancellationToken::new(),
        }
    }

    fn resolvers_mut(&mut self) -> Option<&mut Resolvers> {
        Arc::get_mut(&mut self.resolvers)
    }

    pub fn with_extractor(mut self, extractor: UrlExtractor) -> Self {
        if let Some(r) = self.resolvers_mut() {
            r.extractor = extractor;
        }
        self
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        if let Some(r) = self.resolvers_mut() {
            r.page_timeout = timeout;
        }
        self
    }

    /// Output selection given to newly inserted items
    pub fn with_selection(mut self, selection: OutputSelection) -> Self {
        if let Some(r) = self.resolvers_mut() {
            r.selection = selection;
        }
        self
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

    pub fn catalog(&self) -> &Catalog {
        &self.resolvers.catalog
    }

    /// Convenience for `resolve(Seed::Text(text), TopLevel, concurrent)`
    pub async fn resolve_text(&self, text: &str, concurrent: bool) -> ResolveReport {
        self.resolve(Seed::Text(text.to_string()), ResolutionMode::TopLevel, concurrent)
            .await
    }

    /// Resolve a seed into the catalog. Individual failures are logged and
    /// dropped; the call always finishes with a duplicate prune and a
    /// terminal status message.
    pub async fn resolve(&self, seed: Seed, mode: ResolutionMode, concurrent: bool) -> ResolveReport {
        let sink: Arc<dyn StatusSink> = Arc::new(MonotonicSink::new(self.sink.clone()));

        let urls = match seed {
            Seed::Text(text) => {
                let extraction = self.resolvers.extractor.extract(&text);
                if let Some(degraded) = &extraction.degraded {
                    tracing::warn!("[Frontier] {}", degraded);
                }
                extraction.urls
            }
            Seed::Urls(urls) => urls,
        };

        let mut visited = HashSet::new();
        let roots: Vec<String> = urls
            .into_iter()
            .filter(|url| !self.resolvers.catalog.contains_url(url))
            .filter(|url| visited.insert(url.clone()))
            .collect();

        let call = Arc::new(CallState::new(roots.len()));
        *call.visited.lock() = visited;
        let tasks: Vec<ResolutionTask> = roots
            .into_iter()
            .enumerate()
            .map(|(root, url)| ResolutionTask { url, mode, root })
            .collect();

        tracing::info!(
            "[Frontier] resolving {} {} ({})",
            tasks.len(),
            mode.label(),
            if concurrent { "concurrent" } else { "sequential" }
        );

        let pool = WorkerPool::new(ANALYSIS_LABEL, self.max_workers)
            .with_sink(sink.clone())
            .with_interval(self.interval)
            .with_cancel(self.cancel.clone())
            .with_progress_source({
                let call = call.clone();
                Arc::new(move |stats: &PoolStats| call.progress.snapshot(stats.active, stats.errored))
            });

        let stats = if concurrent {
            self.run_concurrent(&pool, &call, tasks).await
        } else {
            self.run_sequential(&pool, &call, &sink, tasks).await
        };

        let pruned = self.resolvers.catalog.prune_duplicates();
        let units = call.progress.units();
        let last = if stats.cancelled == 0 {
            ProgressSnapshot::new(units, units, 0, stats.errored)
        } else {
            call.progress.snapshot(0, stats.errored)
        };
        sink.on_progress(&last);
        sink.on_status(ANALYSIS_COMPLETE);

        let report = ResolveReport {
            candidates: units,
            inserted: call.inserted.load(Ordering::SeqCst),
            duplicates: call.duplicates.load(Ordering::SeqCst),
            dropped: call.dropped.lock().clone(),
            pruned,
            cancelled: stats.cancelled,
        };
        tracing::info!(
            "[Frontier] done: {} inserted, {} duplicate(s), {} dropped, {} cancelled",
            report.inserted,
            report.duplicates,
            report.dropped.len(),
            report.cancelled
        );
        report
    }

    /// Keep only children not seen in this call nor already in the catalog
    fn admit_children(&self, call: &CallState, children: Vec<ResolutionTask>) -> Vec<ResolutionTask> {
        let mut visited = call.visited.lock();
        children
            .into_iter()
            .filter(|child| !self.resolvers.catalog.contains_url(&child.url))
            .filter(|child| visited.insert(child.url.clone()))
            .collect()
    }

    fn task_future(
        &self,
        call: &Arc<CallState>,
        task: ResolutionTask,
    ) -> impl std::future::Future<Output = Result<Vec<ResolutionTask>, DownloadError>> + Send + 'static {
        let resolvers = self.resolvers.clone();
        let call = call.clone();
        async move {
            let outcome = resolvers.resolve_one(&call, &task).await;
            if let Err(e) = &outcome {
                tracing::warn!("[Frontier] dropped {}: {}", task.url, describe_failure(e));
                call.dropped.lock().push(task.url.clone());
            }
            outcome
        }
    }

    /// Returns the final task counts, taken before diagnostics clear the registry
    async fn run_concurrent(&self, pool: &WorkerPool, call: &Arc<CallState>, tasks: Vec<ResolutionTask>) -> PoolStats {
        let hold = pool.hold();
        let mut running = JoinSet::new();

        let spawn = |running: &mut JoinSet<_>, task: ResolutionTask| {
            let root = task.root;
            let handle = pool.spawn(&format!("check {}", task.url), self.task_future(call, task));
            running.spawn(async move { (root, handle.join().await) });
        };

        for task in tasks {
            spawn(&mut running, task);
        }

        while let Some(joined) = running.join_next().await {
            let Ok((root, outcome)) = joined else {
                continue;
            };
            let children = self.admit_children(call, outcome.unwrap_or_default());
            call.progress.discover(root, children.len());
            call.progress.finish(root);
            for child in children {
                spawn(&mut running, child);
            }
        }

        let stats = pool.stats("");
        drop(hold);
        pool.finish_diagnostics().await;
        stats
    }

    async fn run_sequential(
        &self,
        pool: &WorkerPool,
        call: &Arc<CallState>,
        sink: &Arc<dyn StatusSink>,
        tasks: Vec<ResolutionTask>,
    ) -> PoolStats {
        let mut queue: VecDeque<ResolutionTask> = tasks.into();

        while let Some(task) = queue.pop_front() {
            let root = task.root;
            let url = task.url.clone();
            sink.on_status(&format!("Checking {}", url));

            let outcome = pool.run_inline(&format!("check {}", url), self.task_future(call, task)).await;
            let children = self.admit_children(call, outcome.unwrap_or_default());
            call.progress.discover(root, children.len());
            call.progress.finish(root);

            // depth first: children run before the next sibling
            for child in children.into_iter().rev() {
                queue.push_front(child);
            }

            let stats = pool.stats("");
            sink.on_status(&stats.message(ANALYSIS_LABEL));
            sink.on_progress(&call.progress.snapshot(0, stats.errored));
        }
        pool.stats("")
    }
}
