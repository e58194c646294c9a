// URL extraction from free text
//
// The primary strategy tokenizes and validates with the `url` crate, which
// also picks up scheme-less `www.` and `youtu.be/` links. When it is
// disabled or fails, a plain regex scan for `http(s)://` tokens is used.

use regex::Regex;
use std::collections::HashSet;
use url::Url;

use super::errors::DownloadError;

lazy_static::lazy_static! {
    static ref HTTP_URL_RE: Regex = Regex::new(r#"https?://[^\s<>"'`\\]+"#).unwrap();
}

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '"', '>'];
const TOKEN_SEPARATORS: &[char] = &['"', '\'', '<', '>', '`', '(', ')', '[', ']', '{', '}', '\\'];

/// A way of finding URLs in text
pub trait ExtractStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn find_urls(&self, text: &str) -> Result<Vec<String>, DownloadError>;
}

/// Token scan validated by the `url` parser
#[derive(Debug, Default, Clone, Copy)]
pub struct ParsedUrlStrategy;

impl ParsedUrlStrategy {
    fn candidate(token: &str) -> Option<String> {
        let token = token.trim_end_matches(TRAILING_PUNCTUATION);
        let lower = token.to_lowercase();

        let absolute = if lower.starts_with("http://") || lower.starts_with("https://") {
            token.to_string()
        } else if lower.starts_with("www.") || lower.starts_with("youtu.be/") {
            format!("https://{}", token)
        } else {
            return None;
        };

        let parsed = Url::parse(&absolute).ok()?;
        let host = parsed.host_str()?;
        if !host.contains('.') {
            return None;
        }
        Some(absolute)
    }
}

impl ExtractStrategy for ParsedUrlStrategy {
    fn name(&self) -> &'static str {
        "url-parser"
    }

    fn find_urls(&self, text: &str) -> Result<Vec<String>, DownloadError> {
        Ok(text
            .split(|c: char| c.is_whitespace() || TOKEN_SEPARATORS.contains(&c))
            .filter_map(Self::candidate)
            .collect())
    }
}

/// Regex scan for absolute http(s) URLs
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexUrlStrategy;

impl ExtractStrategy for RegexUrlStrategy {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn find_urls(&self, text: &str) -> Result<Vec<String>, DownloadError> {
        Ok(HTTP_URL_RE
            .find_iter(text)
            .map(|m| m.as_str().trim_end_matches(TRAILING_PUNCTUATION).to_string())
            .collect())
    }
}

/// Result of one extraction
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Deduplicated, in first-seen order
    pub urls: Vec<String>,
    /// Set when the fallback strategy had to be used
    pub degraded: Option<DownloadError>,
}

/// Finds all plausible absolute URLs in a text blob
pub struct UrlExtractor {
    primary: Option<Box<dyn ExtractStrategy>>,
    fallback: RegexUrlStrategy,
}

impl UrlExtractor {
    pub fn new() -> Self {
        Self {
            primary: Some(Box::new(ParsedUrlStrategy)),
            fallback: RegexUrlStrategy,
        }
    }

    /// Extractor that only runs the regex scan
    pub fn regex_only() -> Self {
        Self {
            primary: None,
            fallback: RegexUrlStrategy,
        }
    }

    pub fn with_primary(primary: Box<dyn ExtractStrategy>) -> Self {
        Self {
            primary: Some(primary),
            fallback: RegexUrlStrategy,
        }
    }

    pub fn extract(&self, text: &str) -> Extraction {
        let degraded = match &self.primary {
            Some(primary) => match primary.find_urls(text) {
                Ok(urls) => {
                    return Extraction {
                        urls: dedup(urls),
                        degraded: None,
                    }
                }
                Err(e) => {
                    tracing::warn!("[Extractor] {} failed: {}; using regex fallback", primary.name(), e);
                    DownloadError::ExtractionDegraded(format!("{} failed: {}", primary.name(), e))
                }
            },
            None => DownloadError::ExtractionDegraded("primary strategy unavailable".to_string()),
        };

        let urls = match self.fallback.find_urls(text) {
            Ok(urls) => urls,
            Err(e) => {
                tracing::error!("[Extractor] regex fallback failed: {}", e);
                Vec::new()
            }
        };

        Extraction {
            urls: dedup(urls),
            degraded: Some(degraded),
        }
    }
}

impl Default for UrlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper around the default extractor
pub fn extract_urls(text: &str) -> Vec<String> {
    UrlExtractor::new().extract(text).urls
}

fn dedup(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct BrokenStrategy;

    impl ExtractStrategy for BrokenStrategy {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn find_urls(&self, _text: &str) -> Result<Vec<String>, DownloadError> {
            Err(DownloadError::Unknown("tld list missing".to_string()))
        }
    }

    const TEXT: &str = "see https://x.com/watch?id=AAA, and (https://x.com/watch?id=AAA) \
                        or www.youtube.com/watch?v=dQw4w9WgXcQ. <a href=\"https://x.com/playlist?list=P1\">";

    #[test]
    fn primary_finds_scheme_less_and_dedups() {
        let result = UrlExtractor::new().extract(TEXT);
        assert!(result.degraded.is_none());
        assert_eq!(
            result.urls,
            vec![
                "https://x.com/watch?id=AAA".to_string(),
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
                "https://x.com/playlist?list=P1".to_string(),
            ]
        );
    }

    #[test]
    fn fallback_is_subset_of_primary() {
        let primary = UrlExtractor::new().extract(TEXT).urls;
        let fallback = UrlExtractor::regex_only().extract(TEXT);
        assert!(fallback.degraded.is_some());
        assert!(fallback.urls.iter().all(|u| primary.contains(u)));
        assert_eq!(fallback.urls.len(), 2);
    }

    #[test]
    fn failing_primary_degrades_to_regex() {
        let result = UrlExtractor::with_primary(Box::new(BrokenStrategy)).extract(TEXT);
        assert!(matches!(result.degraded, Some(DownloadError::ExtractionDegraded(_))));
        assert!(result.urls.contains(&"https://x.com/playlist?list=P1".to_string()));
    }

    #[test]
    fn no_urls_in_plain_text() {
        assert!(extract_urls("nothing to see here.").is_empty());
        assert!(extract_urls("").is_empty());
    }
}
