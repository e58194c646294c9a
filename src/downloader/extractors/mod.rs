// Item resolution back ends
//
// - `ytdlp`: yt-dlp resolver in CLI or python-module mode, also the
//   playlist/channel enumerator
// - `orchestrator`: primary -> fallback resolver chain
// - `page`: HTTP fetcher for scraping opaque pages
// - `diagnostics`: classified failure reasons for status messages

mod diagnostics;
mod orchestrator;
mod page;
mod traits;
mod ytdlp;

pub use diagnostics::{describe_failure, diagnose, diagnose_message, FailureReason};
pub use orchestrator::{ChainMember, ChainStatus, ResolverChain};
pub use page::HttpPageFetcher;
pub use traits::{CollectionEnumerator, ItemResolver, PageFetcher, ResolverConfig, ResolverMode};
pub use ytdlp::{parse_flat_entries, parse_media_json, YtDlpResolver};
