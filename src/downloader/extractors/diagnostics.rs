// Failure diagnostics - turns raw resolver/downloader errors into a
// classified reason the status line can show instead of tool stderr.

use serde::{Deserialize, Serialize};

use crate::downloader::errors::DownloadError;

/// Known reasons a provider refuses or fails a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// DRM-protected or paid content; never downloadable
    DrmProtected,
    MembersOnly,
    AgeRestricted,
    PrivateItem,
    /// Removed or otherwise gone
    Unavailable,
    GeoBlocked,
    RateLimited,
    BotDetection,
    /// HTTP 403 without a more specific cause
    AccessDenied,
    NetworkTimeout,
    UnsupportedUrl,
    ToolMissing,
}

impl FailureReason {
    /// Whether trying again later (or with other settings) can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::BotDetection | Self::AccessDenied | Self::NetworkTimeout
        )
    }

    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::DrmProtected | Self::Unavailable | Self::PrivateItem | Self::UnsupportedUrl
        )
    }

    pub fn cookies_might_help(&self) -> bool {
        matches!(
            self,
            Self::AgeRestricted | Self::PrivateItem | Self::MembersOnly | Self::BotDetection | Self::AccessDenied
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::DrmProtected => "DRM-protected content, cannot be downloaded",
            Self::MembersOnly => "Members-only content",
            Self::AgeRestricted => "Age-restricted content (sign-in required)",
            Self::PrivateItem => "Private video",
            Self::Unavailable => "Video unavailable",
            Self::GeoBlocked => "Not available in this region",
            Self::RateLimited => "Rate limited by the provider",
            Self::BotDetection => "Provider bot detection triggered",
            Self::AccessDenied => "Access denied (HTTP 403)",
            Self::NetworkTimeout => "Network timeout",
            Self::UnsupportedUrl => "Unsupported URL",
            Self::ToolMissing => "yt-dlp is not installed",
        }
    }
}

const DRM_PATTERNS: &[&str] = &[
    "drm",
    "widevine",
    "playready",
    "encrypted media",
    "requires purchase",
    "requires payment",
    "rental",
];
const MEMBERS_PATTERNS: &[&str] = &["members only", "members-only", "join this channel", "available to members"];
const AGE_PATTERNS: &[&str] = &["age-restricted", "confirm your age", "age_verification"];
const PRIVATE_PATTERNS: &[&str] = &["private video", "video is private", "been granted access"];
const UNAVAILABLE_PATTERNS: &[&str] = &[
    "video unavailable",
    "video is unavailable",
    "has been removed",
    "no longer available",
];
const GEO_PATTERNS: &[&str] = &["not available in your country", "blocked in your country", "geo restrict"];
const RATE_PATTERNS: &[&str] = &["429", "rate limit", "too many requests"];
const BOT_PATTERNS: &[&str] = &["not a bot", "captcha", "unusual traffic"];
const FORBIDDEN_PATTERNS: &[&str] = &["403", "forbidden"];
const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout", "connection refused", "network unreachable"];
const UNSUPPORTED_PATTERNS: &[&str] = &["unsupported url", "is not a valid url"];

/// Classify a raw error message; `None` when nothing specific matches.
/// Checked from the most to the least specific cause.
pub fn diagnose_message(message: &str) -> Option<FailureReason> {
    let lower = message.to_lowercase();
    let any = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    let table: [(&[&str], FailureReason); 11] = [
        (DRM_PATTERNS, FailureReason::DrmProtected),
        (MEMBERS_PATTERNS, FailureReason::MembersOnly),
        (AGE_PATTERNS, FailureReason::AgeRestricted),
        (PRIVATE_PATTERNS, FailureReason::PrivateItem),
        (UNAVAILABLE_PATTERNS, FailureReason::Unavailable),
        (GEO_PATTERNS, FailureReason::GeoBlocked),
        (RATE_PATTERNS, FailureReason::RateLimited),
        (BOT_PATTERNS, FailureReason::BotDetection),
        (FORBIDDEN_PATTERNS, FailureReason::AccessDenied),
        (TIMEOUT_PATTERNS, FailureReason::NetworkTimeout),
        (UNSUPPORTED_PATTERNS, FailureReason::UnsupportedUrl),
    ];

    table
        .iter()
        .find(|(patterns, _)| any(patterns))
        .map(|(_, reason)| *reason)
}

/// Classify a typed error, using its variant first and its text second
pub fn diagnose(error: &DownloadError) -> Option<FailureReason> {
    match error {
        DownloadError::NetworkTimeout(_) => Some(FailureReason::NetworkTimeout),
        DownloadError::ToolNotFound(_) => Some(FailureReason::ToolMissing),
        DownloadError::InvalidUrl(_) => Some(FailureReason::UnsupportedUrl),
        DownloadError::Cancelled | DownloadError::InvalidTransition { .. } | DownloadError::NotFound(_) => None,
        other => diagnose_message(&other.to_string()),
    }
}

/// User-facing status text for a failure: the classified reason when one
/// applies, the raw message as a last resort.
pub fn describe_failure(error: &DownloadError) -> String {
    match diagnose(error) {
        Some(reason) => reason.description().to_string(),
        None => error.to_string(),
    }
}
