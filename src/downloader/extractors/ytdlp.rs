// yt-dlp resolver - item metadata and playlist/channel enumeration
//
// Two entry points share the same argument building and JSON parsing:
// - CLI mode: native `yt-dlp` binary (faster, no Python dependency)
// - Python mode: `python3 -m yt_dlp` (works with a pip-installed yt-dlp)

use async_trait::async_trait;

use super::traits::{CollectionEnumerator, ItemResolver, ResolverConfig, ResolverMode};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::MediaInfo;
use crate::downloader::utils::{
    binary_responds, find_ytdlp, network_args, python_cmd, python_has_module, run_output_with_timeout,
};

const WATCH_PREFIX: &str = "https://www.youtube.com/watch?v=";
const PLAYLIST_PREFIX: &str = "https://www.youtube.com/playlist?list=";

pub struct YtDlpResolver {
    mode: ResolverMode,
    program: String,
    /// Arguments placed before the yt-dlp options (`-m yt_dlp`)
    prefix: Vec<String>,
    config: ResolverConfig,
}

impl YtDlpResolver {
    pub fn cli(config: ResolverConfig) -> Self {
        Self {
            mode: ResolverMode::Cli,
            program: find_ytdlp(),
            prefix: Vec::new(),
            config,
        }
    }

    pub fn python_module(config: ResolverConfig) -> Self {
        Self {
            mode: ResolverMode::Python,
            program: python_cmd(),
            prefix: vec!["-m".to_string(), "yt_dlp".to_string()],
            config,
        }
    }

    pub fn mode(&self) -> ResolverMode {
        self.mode
    }

    fn build_args(&self, options: &[&str], url: &str) -> Vec<String> {
        let mut args = self.prefix.clone();
        args.extend(options.iter().map(|s| s.to_string()));
        args.push("--no-warnings".to_string());
        args.extend(network_args(
            self.config.proxy.as_deref(),
            self.config.cookies_path.as_deref(),
            self.config.timeout_seconds,
        ));
        args.push(url.to_string());
        args
    }

    async fn run(&self, options: &[&str], url: &str) -> Result<Vec<u8>, DownloadError> {
        let args = self.build_args(options, url);
        tracing::debug!("[Resolver] {} {} {}", self.mode, self.program, args.join(" "));

        let output = run_output_with_timeout(&self.program, args, self.config.timeout_seconds).await?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!("[Resolver] {} failed for {}: {}", self.mode, url, stderr);
            Err(DownloadError::from(stderr))
        }
    }

    async fn enumerate(&self, url: &str) -> Result<Vec<String>, DownloadError> {
        let stdout = self.run(&["--flat-playlist", "--dump-json"], url).await?;
        Ok(parse_flat_entries(&String::from_utf8_lossy(&stdout)))
    }
}

#[async_trait]
impl ItemResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        match self.mode {
            ResolverMode::Cli => "cli-yt-dlp",
            ResolverMode::Python => "python-yt-dlp",
        }
    }

    fn is_available(&self) -> bool {
        match self.mode {
            ResolverMode::Cli => binary_responds(&self.program, "--version"),
            ResolverMode::Python => python_has_module(&self.program, "yt_dlp"),
        }
    }

    async fn resolve_item(&self, url: &str) -> Result<MediaInfo, DownloadError> {
        let stdout = self.run(&["--dump-json", "--no-playlist"], url).await?;
        parse_media_json(&stdout, url)
    }
}

#[async_trait]
impl CollectionEnumerator for YtDlpResolver {
    async fn list_playlist_urls(&self, url: &str) -> Result<Vec<String>, DownloadError> {
        self.enumerate(url).await
    }

    async fn list_channel_urls(&self, url: &str) -> Result<Vec<String>, DownloadError> {
        let base = url.trim_end_matches('/');
        let mut urls = self.enumerate(&format!("{}/videos", base)).await?;

        // A channel without a playlists tab is not an error
        match self.enumerate(&format!("{}/playlists", base)).await {
            Ok(playlists) => urls.extend(playlists),
            Err(e) => tracing::debug!("[Resolver] no playlists for {}: {}", url, e),
        }
        Ok(urls)
    }
}

/// Parse `--dump-json` output for a single item
pub fn parse_media_json(stdout: &[u8], requested_url: &str) -> Result<MediaInfo, DownloadError> {
    let json: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {}", e)))?;

    let id = json["id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DownloadError::ParseError("JSON has no id".to_string()))?;
    let source_url = json["webpage_url"]
        .as_str()
        .filter(|u| !u.is_empty())
        .unwrap_or(requested_url);

    Ok(MediaInfo {
        id: id.to_string(),
        source_url: source_url.to_string(),
        title: json["title"].as_str().unwrap_or(id).to_string(),
        uploader: json["uploader"].as_str().unwrap_or("Unknown").to_string(),
        duration_seconds: json["duration"].as_f64().unwrap_or(0.0) as u64,
        thumbnail: json["thumbnail"].as_str().unwrap_or("").to_string(),
    })
}

/// Entry URLs from `--flat-playlist --dump-json` (one JSON object per line)
pub fn parse_flat_entries(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter_map(|entry| {
            let url = entry["url"].as_str().or_else(|| entry["webpage_url"].as_str());
            match url {
                Some(u) if u.contains("://") => Some(u.to_string()),
                _ => {
                    let id = entry["id"].as_str()?;
                    let is_playlist = entry["ie_key"].as_str() == Some("YoutubeTab")
                        || entry["_type"].as_str() == Some("playlist");
                    Some(if is_playlist {
                        format!("{}{}", PLAYLIST_PREFIX, id)
                    } else {
                        format!("{}{}", WATCH_PREFIX, id)
                    })
                }
            }
        })
        .collect()
}
