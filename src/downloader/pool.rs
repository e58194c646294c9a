// Worker pool and diagnostics aggregator
//
// Tasks are admitted through a semaphore, so at most `max_workers` run at
// once; the rest wait for a permit rather than for a new thread. Every
// task is recorded in a per-pool registry and all counters are derived
// from those records.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::models::ProgressSnapshot;
use super::traits::{NullSink, StatusSink};

/// Lifecycle of one pool task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    /// Never started because the pool was cancelled
    Cancelled,
}

impl TaskState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

#[derive(Debug)]
struct TaskRecord {
    name: String,
    state: Mutex<(TaskState, Option<String>)>,
}

impl TaskRecord {
    fn new(name: String) -> Self {
        Self {
            name,
            state: Mutex::new((TaskState::Queued, None)),
        }
    }

    fn state(&self) -> TaskState {
        self.state.lock().0
    }

    fn set(&self, state: TaskState) {
        self.state.lock().0 = state;
    }

    fn fail(&self, error: String) {
        *self.state.lock() = (TaskState::Failed, Some(error));
    }
}

/// Counters computed from task records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub succeeded: usize,
    pub errored: usize,
    pub cancelled: usize,
}

impl PoolStats {
    pub fn finished(&self) -> usize {
        self.succeeded + self.errored + self.cancelled
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::new(self.finished(), self.total, self.active, self.errored)
    }

    pub fn message(&self, label: &str) -> String {
        format!(
            "{} Total: {}    Active: {}    Completed: {}    Errors: {}",
            label, self.total, self.active, self.succeeded, self.errored
        )
    }
}

#[derive(Debug, Default)]
struct TaskRegistry {
    records: Mutex<Vec<Arc<TaskRecord>>>,
}

impl TaskRegistry {
    fn register(&self, name: &str) -> Arc<TaskRecord> {
        let record = Arc::new(TaskRecord::new(name.to_string()));
        self.records.lock().push(record.clone());
        record
    }

    fn stats(&self, name_filter: &str) -> PoolStats {
        compute_stats(&self.records.lock(), name_filter)
    }

    /// Clears the registry when nothing is active. Runs under the
    /// registry lock so a concurrent `register` is either counted or
    /// lands after the clear.
    fn clear_if_idle(&self, holds: &AtomicUsize, running: &AtomicBool) -> bool {
        let mut records = self.records.lock();
        let idle = holds.load(Ordering::SeqCst) == 0 && records.iter().all(|r| !r.state().is_active());
        if idle {
            records.clear();
            running.store(false, Ordering::SeqCst);
        }
        idle
    }
}

fn compute_stats(records: &[Arc<TaskRecord>], name_filter: &str) -> PoolStats {
    let mut stats = PoolStats::default();
    for record in records.iter().filter(|r| r.name.contains(name_filter)) {
        stats.total += 1;
        match record.state() {
            TaskState::Queued | TaskState::Running => stats.active += 1,
            TaskState::Succeeded => stats.succeeded += 1,
            TaskState::Failed => stats.errored += 1,
            TaskState::Cancelled => stats.cancelled += 1,
        }
    }
    stats
}

/// Handle to one scheduled task
pub struct TaskHandle<T> {
    record: Arc<TaskRecord>,
    join: Option<JoinHandle<Option<T>>>,
}

impl<T> TaskHandle<T> {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn state(&self) -> TaskState {
        self.record.state()
    }

    /// Error captured when the task failed or panicked
    pub fn error(&self) -> Option<String> {
        self.record.state.lock().1.clone()
    }

    /// Wait for the task. `None` if it failed or was cancelled.
    pub async fn join(self) -> Option<T> {
        match self.join {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        }
    }
}

/// Keeps the diagnostics loop alive while a batch is still dispatching
pub struct PoolHold {
    holds: Arc<AtomicUsize>,
}

impl Drop for PoolHold {
    fn drop(&mut self) {
        self.holds.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Computes the published snapshot from raw pool counters
pub type ProgressSource = Arc<dyn Fn(&PoolStats) -> ProgressSnapshot + Send + Sync>;

/// Bounded pool with a per-instance task registry
pub struct WorkerPool {
    label: String,
    progress_source: Option<ProgressSource>,
    semaphore: Arc<Semaphore>,
    registry: Arc<TaskRegistry>,
    cancel: CancellationToken,
    sink: Arc<dyn StatusSink>,
    interval: Duration,
    holds: Arc<AtomicUsize>,
    diagnostics_running: Arc<AtomicBool>,
    diagnostics: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(label: impl Into<String>, max_workers: usize) -> Self {
        Self {
            label: label.into(),
            progress_source: None,
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            registry: Arc::new(TaskRegistry::default()),
            cancel: CancellationToken::new(),
            sink: Arc::new(NullSink),
            interval: Duration::from_millis(100),
            holds: Arc::new(AtomicUsize::new(0)),
            diagnostics_running: Arc::new(AtomicBool::new(false)),
            diagnostics: Mutex::new(None),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Replace the flat finished/total snapshot with a custom one
    pub fn with_progress_source(mut self, source: ProgressSource) -> Self {
        self.progress_source = Some(source);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn hold(&self) -> PoolHold {
        self.holds.fetch_add(1, Ordering::SeqCst);
        PoolHold {
            holds: self.holds.clone(),
        }
    }

    /// Schedule a task. It waits for a worker permit, then runs on its own
    /// tokio task; errors and panics are captured on the handle.
    pub fn spawn<T, F>(&self, name: &str, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, DownloadError>> + Send + 'static,
    {
        let record = self.registry.register(name);

        if self.cancel.is_cancelled() {
            record.set(TaskState::Cancelled);
            return TaskHandle { record, join: None };
        }

        let semaphore = self.semaphore.clone();
        let cancel = self.cancel.clone();
        let task_record = record.clone();
        let join = tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                task_record.set(TaskState::Cancelled);
                return None;
            };

            task_record.set(TaskState::Running);
            let outcome = tokio::spawn(task).await;
            drop(permit);

            match outcome {
                Ok(Ok(value)) => {
                    task_record.set(TaskState::Succeeded);
                    Some(value)
                }
                Ok(Err(e)) => {
                    task_record.fail(e.to_string());
                    None
                }
                Err(join_error) => {
                    tracing::error!("[Pool] task {} panicked: {}", task_record.name, join_error);
                    task_record.fail(join_error.to_string());
                    None
                }
            }
        });

        self.start_diagnostics();
        TaskHandle {
            record,
            join: Some(join),
        }
    }

    /// Run a task on the caller, still recording it in the registry
    pub async fn run_inline<T, F>(&self, name: &str, task: F) -> Option<T>
    where
        F: Future<Output = Result<T, DownloadError>>,
    {
        let record = self.registry.register(name);
        if self.cancel.is_cancelled() {
            record.set(TaskState::Cancelled);
            return None;
        }

        record.set(TaskState::Running);
        match task.await {
            Ok(value) => {
                record.set(TaskState::Succeeded);
                Some(value)
            }
            Err(e) => {
                record.fail(e.to_string());
                None
            }
        }
    }

    pub fn stats(&self, name_filter: &str) -> PoolStats {
        self.registry.stats(name_filter)
    }

    /// Start the periodic status publisher unless one is already running
    pub fn start_diagnostics(&self) {
        if self
            .diagnostics_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let registry = self.registry.clone();
        let sink = self.sink.clone();
        let holds = self.holds.clone();
        let running = self.diagnostics_running.clone();
        let interval = self.interval;
        let label = self.label.clone();
        let source = self.progress_source.clone();

        let handle = tokio::spawn(async move {
            loop {
                let stats = registry.stats("");
                sink.on_status(&stats.message(&label));
                let snapshot = match &source {
                    Some(source) => source(&stats),
                    None => stats.snapshot(),
                };
                sink.on_progress(&snapshot);
                tokio::time::sleep(interval).await;

                if registry.clear_if_idle(&holds, &running) {
                    break;
                }
            }
            tracing::debug!("[Pool] {} diagnostics finished", label);
        });
        *self.diagnostics.lock() = Some(handle);
    }

    /// Wait for the diagnostics loop to drain. Callers drop their
    /// `PoolHold` first, otherwise this waits forever.
    pub async fn finish_diagnostics(&self) {
        let handle = self.diagnostics.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn diagnostics_active(&self) -> bool {
        self.diagnostics_running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::ProgressSnapshot;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSink {
        statuses: Mutex<Vec<String>>,
    }

    impl StatusSink for CountingSink {
        fn on_status(&self, message: &str) {
            self.statuses.lock().push(message.to_string());
        }

        fn on_progress(&self, _snapshot: &ProgressSnapshot) {}
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failures_are_captured_on_handles() {
        let pool = WorkerPool::new("URL check(s)", 2);
        let ok = pool.spawn("check ok", async { Ok::<_, DownloadError>(1) });
        let bad = pool.spawn("check bad", async { Err::<i32, _>(DownloadError::Unknown("boom".into())) });
        let panicking = pool.spawn("check panic", async {
            if true {
                panic!("task blew up");
            }
            Ok::<i32, DownloadError>(0)
        });

        assert_eq!(ok.join().await, Some(1));
        let bad_state = {
            let state_before = bad.record.clone();
            assert_eq!(bad.join().await, None);
            state_before.state()
        };
        assert_eq!(bad_state, TaskState::Failed);
        assert_eq!(panicking.join().await, None);

        let stats = pool.stats("check");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.errored, 2);
        assert_eq!(stats.active, 0);
        assert_eq!(pool.stats("ok").total, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded() {
        let pool = WorkerPool::new("bounded", 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                pool.spawn(&format!("task {}", i), async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, DownloadError>(i)
                })
            })
            .collect();

        for h in handles {
            h.join().await;
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.stats("task").succeeded, 8);
    }

    #[tokio::test]
    async fn cancelled_pool_does_not_start_tasks() {
        let pool = WorkerPool::new("cancel", 1);
        pool.cancel_token().cancel();
        let handle = pool.spawn("late", async { Ok::<_, DownloadError>(()) });
        assert_eq!(handle.state(), TaskState::Cancelled);
        assert_eq!(handle.join().await, None);
        assert_eq!(pool.run_inline("inline", async { Ok::<_, DownloadError>(5) }).await, None);
        assert_eq!(pool.stats("").cancelled, 2);
    }

    #[tokio::test]
    async fn inline_tasks_are_recorded() {
        let pool = WorkerPool::new("inline", 1);
        assert_eq!(pool.run_inline("a", async { Ok::<_, DownloadError>(1) }).await, Some(1));
        assert_eq!(
            pool.run_inline("b", async { Err::<i32, _>(DownloadError::Cancelled) }).await,
            None
        );
        let stats = pool.stats("");
        assert_eq!((stats.total, stats.succeeded, stats.errored), (2, 1, 1));
        assert!(!pool.diagnostics_active());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn diagnostics_start_once_and_clear_registry() {
        let sink = Arc::new(CountingSink::default());
        let pool = WorkerPool::new("URL check(s)", 4)
            .with_sink(sink.clone())
            .with_interval(Duration::from_millis(5));

        let hold = pool.hold();
        let a = pool.spawn("a", async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, DownloadError>(())
        });
        assert!(pool.diagnostics_active());
        pool.start_diagnostics();
        let b = pool.spawn("b", async { Ok::<_, DownloadError>(()) });
        a.join().await;
        b.join().await;
        drop(hold);

        pool.finish_diagnostics().await;
        assert!(!pool.diagnostics_active());
        assert_eq!(pool.stats("").total, 0);

        let statuses = sink.statuses.lock();
        assert!(!statuses.is_empty());
        assert!(statuses.iter().all(|s| s.starts_with("URL check(s) Total:")));
    }
}
