// Error types for resolution and download

use thiserror::Error;

use super::models::ItemStatus;

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Primary URL extraction strategy was unavailable; regex fallback used
    #[error("URL extraction degraded: {0}")]
    ExtractionDegraded(String),

    /// A URL yielded no item after all fallbacks
    #[error("Resolution failed: {0}")]
    ResolutionFailed(String),

    /// Network error while reaching a page or resolver
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Network timeout while talking to the provider
    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    /// Provider refused the request (429, bot detection, etc.)
    #[error("Request blocked by provider: {0}")]
    Blocked(String),

    /// yt-dlp, python or ffmpeg not found in system
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse tool JSON output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A job could not produce one of its artifacts
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Programming-contract violation on the item state machine
    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DownloadError {
    /// Whether the error is a network-level failure rather than a content one
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed(_) | Self::NetworkTimeout(_) | Self::Blocked(_)
        )
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::NetworkTimeout(e.to_string())
        } else {
            Self::FetchFailed(e.to_string())
        }
    }
}

// Classify raw tool stderr into a typed error
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            return Self::NetworkTimeout(s);
        }

        if lower.contains("429") || lower.contains("too many requests") || lower.contains("blocked") {
            return Self::Blocked(s);
        }

        if lower.contains("command not found") || lower.contains("no such file") {
            return Self::ToolNotFound(s);
        }

        if lower.contains("json") || lower.contains("parse") {
            return Self::ParseError(s);
        }

        if lower.contains("unsupported url") || lower.contains("invalid url") || lower.contains("is not a valid url") {
            return Self::InvalidUrl(s);
        }

        Self::Unknown(s)
    }
}

impl From<&str> for DownloadError {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}
