// URL classification by known provider URL shapes

use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static::lazy_static! {
    static ref WATCH_RE: Regex = Regex::new(
        r"(?i)^(https?://)?(www\.)?(m\.)?(youtube\.com|youtube-nocookie\.com|youtube\.googleapis\.com)/(watch\?(.*&)?v=[\w-]{11}|embed/[\w-]{11}|v/[\w-]{11}|shorts/[\w-]{11})"
    ).unwrap();
    static ref SHORT_RE: Regex = Regex::new(r"(?i)^(https?://)?youtu\.be/[\w-]{11}").unwrap();
    static ref GENERIC_WATCH_RE: Regex = Regex::new(r"(?i)^(https?://)?[^/\s?#]+/watch\?(.*&)?(v|id)=[\w-]+").unwrap();
    static ref PLAYLIST_RE: Regex = Regex::new(r"(?i)^(https?://)?[^/\s?#]+/playlist\?(.*&)?list=[\w-]+").unwrap();
    static ref CHANNEL_RE: Regex = Regex::new(
        r"(?i)^(https?://)?(www\.)?(m\.)?youtube\.com/(channel/UC[\w-]{22}|c/[\w-]+|user/[\w-]+|@[\w.-]+)"
    ).unwrap();
    static ref YOUTUBE_DOMAIN_RE: Regex = Regex::new(
        r"(?i)(https?://)?(www\.)?(m\.)?(youtube\.com|youtu\.be|youtube-nocookie\.com|youtube\.googleapis\.com)"
    ).unwrap();
    static ref DISALLOWED_FILENAME_RE: Regex = Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap();
}

/// Routing decision for a single URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UrlKind {
    SingleItem,
    Playlist,
    Channel,
    OpaquePage,
}

/// Classify a URL. Playlist endpoints win over watch URLs only when the
/// path itself is `/playlist`; a `watch?v=..&list=..` URL is a single item.
pub fn classify(url: &str) -> UrlKind {
    let url = url.trim();
    if PLAYLIST_RE.is_match(url) {
        UrlKind::Playlist
    } else if is_single_item(url) {
        UrlKind::SingleItem
    } else if CHANNEL_RE.is_match(url) {
        UrlKind::Channel
    } else {
        UrlKind::OpaquePage
    }
}

pub fn is_single_item(url: &str) -> bool {
    WATCH_RE.is_match(url) || SHORT_RE.is_match(url) || GENERIC_WATCH_RE.is_match(url)
}

pub fn is_youtube_url(url: &str) -> bool {
    YOUTUBE_DOMAIN_RE.is_match(url)
}

/// Replace characters that no common filesystem accepts. The result is
/// always a single non-empty path component other than `.` or `..`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = DISALLOWED_FILENAME_RE.replace_all(name, "_");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_urls_are_single_items() {
        assert_eq!(classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), UrlKind::SingleItem);
        assert_eq!(classify("https://youtu.be/dQw4w9WgXcQ"), UrlKind::SingleItem);
        assert_eq!(classify("https://www.youtube.com/shorts/dQw4w9WgXcQ"), UrlKind::SingleItem);
        assert_eq!(classify("https://x.com/watch?id=AAA"), UrlKind::SingleItem);
        assert_eq!(
            classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123"),
            UrlKind::SingleItem
        );
    }

    #[test]
    fn playlists_and_channels() {
        assert_eq!(classify("https://www.youtube.com/playlist?list=PLabc_-1"), UrlKind::Playlist);
        assert_eq!(classify("https://x.com/playlist?list=P1"), UrlKind::Playlist);
        assert_eq!(
            classify("https://www.youtube.com/channel/UC1234567890123456789012"),
            UrlKind::Channel
        );
        assert_eq!(classify("https://www.youtube.com/@SomeCreator"), UrlKind::Channel);
        assert_eq!(classify("https://youtube.com/c/Name"), UrlKind::Channel);
    }

    #[test]
    fn classification_ignores_case() {
        assert_eq!(classify("HTTPS://WWW.YOUTUBE.COM/PLAYLIST?LIST=PLabc"), UrlKind::Playlist);
        assert_eq!(classify("https://WWW.YouTube.com/@SomeCreator"), UrlKind::Channel);
        assert_eq!(classify("HTTPS://YOUTU.BE/dQw4w9WgXcQ"), UrlKind::SingleItem);
    }

    #[test]
    fn provider_shapes_must_start_the_url() {
        assert_eq!(
            classify("https://example.com/redirect?to=https://www.youtube.com/@SomeCreator"),
            UrlKind::OpaquePage
        );
        assert_eq!(
            classify("https://example.com/share?u=youtu.be/dQw4w9WgXcQ"),
            UrlKind::OpaquePage
        );
    }

    #[test]
    fn everything_else_is_opaque() {
        assert_eq!(classify("https://example.com/blog/post"), UrlKind::OpaquePage);
        assert_eq!(classify("not a url"), UrlKind::OpaquePage);
    }

    #[test]
    fn classification_is_order_independent() {
        let urls = [
            "https://x.com/playlist?list=P1",
            "https://example.com",
            "https://youtu.be/dQw4w9WgXcQ",
        ];
        let forward: Vec<_> = urls.iter().map(|u| classify(u)).collect();
        let mut backward: Vec<_> = urls.iter().rev().map(|u| classify(u)).collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn youtube_domains() {
        assert!(is_youtube_url("m.youtube.com/watch?v=x"));
        assert!(!is_youtube_url("https://vimeo.com/1"));
    }

    #[test]
    fn sanitizes_filenames() {
        assert_eq!(sanitize_filename(r#"a<b>c:"d/e\f|g?h*"#), "a_b_c__d_e_f_g_h_");
        assert_eq!(sanitize_filename("line\nbreak"), "line_break");
    }

    #[test]
    fn sanitized_names_are_never_relative_components() {
        for name in ["", "   ", ".", "..", "...", " .. "] {
            assert_eq!(sanitize_filename(name), "_", "{:?}", name);
        }
        assert_eq!(sanitize_filename("../etc"), ".._etc");
        assert_eq!(sanitize_filename(".hidden"), ".hidden");
    }
}
