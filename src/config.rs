// Application settings: optional TOML file, then YTB_* environment overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::downloader::extractors::ResolverConfig;
use crate::downloader::links::UrlExtractor;
use crate::downloader::models::{DownloadConfig, DownloadLimits};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Resolve URLs through the worker pool instead of one by one
    pub analysis_concurrent: bool,
    pub download_concurrent: bool,
    pub max_workers: usize,
    pub diagnostics_interval_ms: u64,
    pub page_fetch_timeout_secs: u64,
    pub resolver_timeout_secs: u64,
    pub proxy: Option<String>,
    pub cookies_path: Option<String>,
    /// Try `python3 -m yt_dlp` when the yt-dlp binary fails
    pub use_fallback_resolver: bool,
    pub output_dir: PathBuf,
    pub output_ext: String,
    pub limits: DownloadLimits,
    pub regex_only_extraction: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            analysis_concurrent: false,
            download_concurrent: false,
            max_workers: 4,
            diagnostics_interval_ms: 100,
            page_fetch_timeout_secs: 10,
            resolver_timeout_secs: 30,
            proxy: None,
            cookies_path: None,
            use_fallback_resolver: true,
            output_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            output_ext: ".mkv".to_string(),
            limits: DownloadLimits::default(),
            regex_only_extraction: false,
        }
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

impl Settings {
    /// Defaults, then the file (if any), then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|var| std::env::var(var).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut settings: Settings = toml::from_str(text)?;
        settings.max_workers = settings.max_workers.max(1);
        Ok(settings)
    }

    /// Apply `YTB_*` overrides using `lookup` to read variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup("YTB_MAX_WORKERS") {
            let workers: usize = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "YTB_MAX_WORKERS".to_string(),
                value: value.clone(),
            })?;
            self.max_workers = workers.max(1);
        }
        if let Some(value) = lookup("YTB_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("YTB_PROXY") {
            self.proxy = Some(value).filter(|p| !p.trim().is_empty());
        }
        if let Some(value) = lookup("YTB_ANALYSIS_CONCURRENT") {
            self.analysis_concurrent = parse_bool("YTB_ANALYSIS_CONCURRENT", &value)?;
        }
        if let Some(value) = lookup("YTB_DOWNLOAD_CONCURRENT") {
            self.download_concurrent = parse_bool("YTB_DOWNLOAD_CONCURRENT", &value)?;
        }
        Ok(())
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_concurrency(mut self, analysis: bool, download: bool) -> Self {
        self.analysis_concurrent = analysis;
        self.download_concurrent = download;
        self
    }

    pub fn with_limits(mut self, limits: DownloadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn diagnostics_interval(&self) -> Duration {
        Duration::from_millis(self.diagnostics_interval_ms.max(1))
    }

    pub fn page_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.page_fetch_timeout_secs)
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig::default()
            .with_proxy(self.proxy.clone())
            .with_cookies_path(self.cookies_path.clone())
            .with_timeout(self.resolver_timeout_secs)
    }

    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            limits: self.limits.clone(),
            output_dir: self.output_dir.clone(),
            output_ext: self.output_ext.clone(),
        }
    }

    pub fn url_extractor(&self) -> UrlExtractor {
        if self.regex_only_extraction {
            UrlExtractor::regex_only()
        } else {
            UrlExtractor::new()
        }
    }
}
