// HTTP page fetcher used to scrape links out of opaque pages

use async_trait::async_trait;
use std::time::Duration;

use super::traits::PageFetcher;
use crate::downloader::errors::DownloadError;

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    /// Client with an optional proxy (`socks5h://...` or `http://...`)
    pub fn new(proxy: Option<&str>) -> Result<Self, DownloadError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| DownloadError::InvalidUrl(format!("proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str, timeout: Duration) -> Result<String, DownloadError> {
        tracing::debug!("[PageFetch] GET {}", url);
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::FetchFailed(format!("{} returned {}", url, status)));
        }
        Ok(response.text().await?)
    }
}
