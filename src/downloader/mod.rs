// Downloader module - resolution and download engine

pub mod backends;
pub mod catalog;
pub mod classify;
pub mod errors;
pub mod extractors;
pub mod frontier;
pub mod links;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod traits;
pub mod utils;

pub use catalog::{AddOutcome, Catalog};
pub use classify::{classify, UrlKind};
pub use errors::DownloadError;
pub use frontier::{ResolutionFrontier, ResolveReport, Seed};
pub use links::{extract_urls, UrlExtractor};
pub use models::{
    BatchSummary, DownloadConfig, DownloadLimits, Item, ItemStatus, MediaInfo, OutputKind, OutputSelection,
    ProgressSnapshot, ResolutionMode, ToggleAction,
};
pub use orchestrator::DownloadOrchestrator;
pub use pool::{PoolStats, WorkerPool};
pub use traits::{LogSink, MediaBackend, NullSink, ProgressFn, StatusSink};
