// Resolver chain - primary resolver with automatic fallback
//
// The primary is tried first; on failure (or when unavailable) the
// fallback is tried. The final failure surfaces only if both fail.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::diagnostics::{diagnose, FailureReason};
use super::traits::{CollectionEnumerator, ItemResolver};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::MediaInfo;

/// A chain member resolves items and enumerates collections
pub trait ChainMember: ItemResolver + CollectionEnumerator {}

impl<T: ItemResolver + CollectionEnumerator + ?Sized> ChainMember for T {}

type Lookup<'a, T> = Pin<Box<dyn Future<Output = Result<T, DownloadError>> + Send + 'a>>;

/// Member plus its availability, probed once when the chain is built
struct Link {
    member: Arc<dyn ChainMember>,
    available: bool,
}

impl Link {
    fn probe(member: Arc<dyn ChainMember>) -> Self {
        let available = member.is_available();
        Self { member, available }
    }
}

pub struct ResolverChain {
    primary: Link,
    fallback: Option<Link>,
}

/// Availability of the chain members
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStatus {
    pub primary_available: bool,
    pub fallback_available: bool,
}

impl ChainStatus {
    pub fn any_available(&self) -> bool {
        self.primary_available || self.fallback_available
    }
}

impl ResolverChain {
    /// Probes the member's availability, which may spawn a process
    pub fn new(primary: Arc<dyn ChainMember>) -> Self {
        Self {
            primary: Link::probe(primary),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ChainMember>) -> Self {
        self.fallback = Some(Link::probe(fallback));
        self
    }

    pub fn status(&self) -> ChainStatus {
        ChainStatus {
            primary_available: self.primary.available,
            fallback_available: self.fallback.as_ref().map_or(false, |f| f.available),
        }
    }

    /// Run `op` on the primary, then on the fallback unless the primary
    /// succeeded or failed for a permanent reason.
    async fn lookup<T, F>(&self, url: &str, op: F) -> Result<T, DownloadError>
    where
        T: Send,
        F: for<'a> Fn(&'a dyn ChainMember, &'a str) -> Lookup<'a, T> + Send + Sync,
    {
        let mut last_error = None;

        if self.primary.available {
            let primary = self.primary.member.as_ref();
            match op(primary, url).await {
                Ok(found) => return Ok(found),
                Err(e) => {
                    tracing::debug!("[Resolver] primary {} failed for {}: {}", primary.name(), url, e);
                    // Permanent causes (removed, private, DRM) fail the same way everywhere
                    if diagnose(&e).map_or(false, |r: FailureReason| r.is_permanent()) {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        } else {
            tracing::debug!("[Resolver] {} unavailable, skipping", self.primary.member.name());
        }

        if let Some(fallback) = self.fallback.as_ref().filter(|f| f.available) {
            let fallback = fallback.member.as_ref();
            match op(fallback, url).await {
                Ok(found) => {
                    tracing::debug!("[Resolver] fallback {} succeeded for {}", fallback.name(), url);
                    return Ok(found);
                }
                Err(e) => {
                    tracing::debug!("[Resolver] fallback {} failed for {}: {}", fallback.name(), url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DownloadError::ToolNotFound("Neither yt-dlp binary nor python yt_dlp module available".to_string())
        }))
    }
}

#[async_trait]
impl ItemResolver for ResolverChain {
    fn name(&self) -> &'static str {
        "resolver-chain"
    }

    fn is_available(&self) -> bool {
        self.status().any_available()
    }

    async fn resolve_item(&self, url: &str) -> Result<MediaInfo, DownloadError> {
        self.lookup(url, |member, url| member.resolve_item(url)).await
    }
}

#[async_trait]
impl CollectionEnumerator for ResolverChain {
    async fn list_playlist_urls(&self, url: &str) -> Result<Vec<String>, DownloadError> {
        self.lookup(url, |member, url| member.list_playlist_urls(url)).await
    }

    async fn list_channel_urls(&self, url: &str) -> Result<Vec<String>, DownloadError> {
        self.lookup(url, |member, url| member.list_channel_urls(url)).await
    }
}
