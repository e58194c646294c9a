// Resolver, enumerator and page fetcher seams

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::downloader::errors::DownloadError;
use crate::downloader::models::MediaInfo;

/// Which yt-dlp entry point a resolver drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverMode {
    /// Native `yt-dlp` binary
    #[default]
    Cli,
    /// `python3 -m yt_dlp`
    Python,
}

impl fmt::Display for ResolverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Python => write!(f, "python"),
        }
    }
}

/// Options shared by every resolver invocation
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub proxy: Option<String>,
    /// Path to cookies.txt
    pub cookies_path: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            cookies_path: None,
            timeout_seconds: 30,
        }
    }
}

impl ResolverConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies_path(mut self, path: Option<String>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// Turns one URL into item metadata
#[async_trait]
pub trait ItemResolver: Send + Sync {
    /// Name of the resolver (for logging)
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool {
        true
    }

    async fn resolve_item(&self, url: &str) -> Result<MediaInfo, DownloadError>;
}

/// Expands playlists and channels into their entry URLs
#[async_trait]
pub trait CollectionEnumerator: Send + Sync {
    async fn list_playlist_urls(&self, url: &str) -> Result<Vec<String>, DownloadError>;

    /// Videos plus sub-playlists of a channel
    async fn list_channel_urls(&self, url: &str) -> Result<Vec<String>, DownloadError>;
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str, timeout: Duration) -> Result<String, DownloadError>;
}
