// Common data models for resolution and download

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::classify::sanitize_filename;
use super::errors::DownloadError;

/// Download lifecycle of a catalog item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ItemStatus {
    #[default]
    Ready,
    InProgress,
    Done,
    Error,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Allowed moves of the job state machine. Leaving a terminal state
    /// is only possible through an explicit reset to `Ready`.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (Self::Ready, Self::InProgress)
                | (Self::InProgress, Self::Done)
                | (Self::InProgress, Self::Error)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::InProgress => "Downloading Now...",
            Self::Done => "Done!",
            Self::Error => "Error!",
        }
    }
}

/// One kind of output a job can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    Combined,
    AudioOnly,
    VideoOnly,
    Subtitles,
    Thumbnail,
    Info,
    Comments,
}

impl OutputKind {
    pub const ALL: [OutputKind; 7] = [
        Self::Combined,
        Self::AudioOnly,
        Self::VideoOnly,
        Self::Subtitles,
        Self::Thumbnail,
        Self::Info,
        Self::Comments,
    ];

    pub fn symbol(&self) -> char {
        match self {
            Self::Combined => '☑',
            Self::AudioOnly => 'Ⓐ',
            Self::VideoOnly => 'Ⓥ',
            Self::Subtitles => 'Ⓢ',
            Self::Thumbnail => 'Ⓣ',
            Self::Info => 'ⓘ',
            Self::Comments => 'ⓒ',
        }
    }

    pub fn from_symbol(symbol: char) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.symbol() == symbol)
    }
}

/// How `OutputSelection::apply` changes a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    On,
    Off,
    Toggle,
}

/// Which artifacts to produce for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSelection {
    pub combined: bool,
    pub audio_only: bool,
    pub video_only: bool,
    pub subtitles: bool,
    pub thumbnail: bool,
    pub info: bool,
    pub comments: bool,
}

impl Default for OutputSelection {
    fn default() -> Self {
        Self {
            combined: true,
            audio_only: false,
            video_only: false,
            subtitles: false,
            thumbnail: false,
            info: false,
            comments: false,
        }
    }
}

impl OutputSelection {
    pub fn none() -> Self {
        Self {
            combined: false,
            ..Self::default()
        }
    }

    /// Build from command line style flags. Falls back to a combined
    /// output when neither audio nor video was asked for.
    #[allow(clippy::too_many_arguments)]
    pub fn from_flags(
        combined: bool,
        audio_only: bool,
        video_only: bool,
        subtitles: bool,
        thumbnail: bool,
        info: bool,
        comments: bool,
    ) -> Self {
        Self {
            combined: combined || !(audio_only || video_only),
            audio_only,
            video_only,
            subtitles,
            thumbnail,
            info,
            comments,
        }
    }

    pub fn contains(&self, kind: OutputKind) -> bool {
        match kind {
            OutputKind::Combined => self.combined,
            OutputKind::AudioOnly => self.audio_only,
            OutputKind::VideoOnly => self.video_only,
            OutputKind::Subtitles => self.subtitles,
            OutputKind::Thumbnail => self.thumbnail,
            OutputKind::Info => self.info,
            OutputKind::Comments => self.comments,
        }
    }

    fn flag_mut(&mut self, kind: OutputKind) -> &mut bool {
        match kind {
            OutputKind::Combined => &mut self.combined,
            OutputKind::AudioOnly => &mut self.audio_only,
            OutputKind::VideoOnly => &mut self.video_only,
            OutputKind::Subtitles => &mut self.subtitles,
            OutputKind::Thumbnail => &mut self.thumbnail,
            OutputKind::Info => &mut self.info,
            OutputKind::Comments => &mut self.comments,
        }
    }

    pub fn apply(&mut self, kind: OutputKind, action: ToggleAction) {
        let flag = self.flag_mut(kind);
        *flag = match action {
            ToggleAction::On => true,
            ToggleAction::Off => false,
            ToggleAction::Toggle => !*flag,
        };
    }

    pub fn is_empty(&self) -> bool {
        !OutputKind::ALL.iter().any(|k| self.contains(*k))
    }

    pub fn needs_audio(&self) -> bool {
        self.combined || self.audio_only
    }

    pub fn needs_video(&self) -> bool {
        self.combined || self.video_only
    }

    /// Fixed-width symbol column, one slot per kind, blank when off
    pub fn symbols(&self, spacing: usize) -> String {
        let slots: Vec<String> = OutputKind::ALL
            .iter()
            .map(|k| {
                if self.contains(*k) {
                    k.symbol().to_string()
                } else {
                    " ".to_string()
                }
            })
            .collect();
        slots.join(&" ".repeat(spacing))
    }

    pub fn from_symbols(text: &str) -> Self {
        let mut selection = Self::none();
        for kind in text.chars().filter_map(OutputKind::from_symbol) {
            selection.apply(kind, ToggleAction::On);
        }
        selection
    }
}

/// Metadata returned by an item resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub source_url: String,
    pub title: String,
    pub uploader: String,
    pub duration_seconds: u64,
    pub thumbnail: String,
}

impl MediaInfo {
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            source_url: source_url.into(),
            uploader: String::new(),
            duration_seconds: 0,
            thumbnail: String::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// A resolved media entity owned by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub source_url: String,
    pub title: String,
    pub uploader: String,
    pub duration_seconds: u64,
    pub thumbnail: String,
    pub selection: OutputSelection,
    pub status: ItemStatus,
    /// Assigned by the catalog on insertion
    pub insertion_order: u64,
    pub log: Vec<String>,
}

impl Item {
    pub fn from_info(info: MediaInfo) -> Self {
        Self {
            id: info.id,
            source_url: info.source_url,
            title: info.title,
            uploader: info.uploader,
            duration_seconds: info.duration_seconds,
            thumbnail: info.thumbnail,
            selection: OutputSelection::default(),
            status: ItemStatus::Ready,
            insertion_order: 0,
            log: Vec::new(),
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.log.push(message.into());
    }

    pub fn transition(&mut self, next: ItemStatus) -> Result<(), DownloadError> {
        if !self.status.can_transition_to(next) {
            return Err(DownloadError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Human friendly duration like `4:05`
    pub fn duration_label(&self) -> String {
        format!("{}:{:02}", self.duration_seconds / 60, self.duration_seconds % 60)
    }
}

/// Ceilings and preferences used when picking streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadLimits {
    /// `None` means no ceiling
    pub max_audio_bitrate_kbps: Option<u32>,
    pub max_resolution: Option<u32>,
    pub max_fps: Option<u32>,
    pub audio_format_priority: Vec<String>,
    pub video_format_priority: Vec<String>,
}

impl Default for DownloadLimits {
    fn default() -> Self {
        Self {
            max_audio_bitrate_kbps: None,
            max_resolution: None,
            max_fps: None,
            audio_format_priority: ["wav", "mp3", "aac", "m4a"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            video_format_priority: ["mp4", "webm", "flv", "3gp", "m4a"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DownloadLimits {
    /// Parse user strings such as `"128 kbps"`, `"720p"`, `"30 fps"`;
    /// anything starting with `max` lifts the ceiling.
    pub fn parse(bitrate: &str, resolution: &str, fps: &str) -> Self {
        Self {
            max_audio_bitrate_kbps: parse_limit(bitrate, "kbps"),
            max_resolution: parse_limit(resolution, "p"),
            max_fps: parse_limit(fps, "fps"),
            ..Self::default()
        }
    }
}

pub fn parse_limit(value: &str, unit: &str) -> Option<u32> {
    let trimmed = value.trim();
    if trimmed.to_lowercase().starts_with("max") {
        return None;
    }
    trimmed.split(unit).next()?.trim().parse().ok()
}

/// Configuration shared by all jobs in a download batch
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub limits: DownloadLimits,
    pub output_dir: PathBuf,
    pub output_ext: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            limits: DownloadLimits::default(),
            output_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            output_ext: ".mkv".to_string(),
        }
    }
}

/// One download attempt for one item
#[derive(Debug, Clone)]
pub struct Job {
    pub item: Item,
    pub config: DownloadConfig,
}

impl Job {
    pub fn new(item: Item, config: DownloadConfig) -> Self {
        Self { item, config }
    }

    /// `Title [id]`; items sharing a title never share output files
    pub fn file_stem(&self) -> String {
        let title = self.item.title.trim();
        if title.is_empty() {
            sanitize_filename(&self.item.id)
        } else {
            sanitize_filename(&format!("{} [{}]", title, self.item.id))
        }
    }

    /// Hidden working directory for intermediate streams, one per item id
    pub fn temp_dir(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!(".{}", sanitize_filename(&self.item.id)))
    }

    pub fn output_file(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}{}", self.file_stem(), self.config.output_ext))
    }
}

/// Immutable aggregate counters at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub active_workers: usize,
    pub errored: usize,
    /// Fractional progress of in-flight sub-work, in whole units
    pub fraction: f64,
}

impl ProgressSnapshot {
    pub fn new(completed: usize, total: usize, active_workers: usize, errored: usize) -> Self {
        Self {
            completed,
            total,
            active_workers,
            errored,
            fraction: 0.0,
        }
    }

    pub fn with_fraction(mut self, fraction: f64) -> Self {
        self.fraction = fraction.max(0.0);
        self
    }

    pub fn percent(&self) -> f64 {
        super::progress::two_level_percent(self.completed, self.fraction, self.total)
    }
}

/// Download batch counters republished after every terminal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub done: usize,
    pub in_progress: usize,
    pub errored: usize,
}

impl BatchSummary {
    pub fn finished(&self) -> usize {
        self.done + self.errored
    }

    pub fn percent(&self) -> f64 {
        super::progress::two_level_percent(self.finished(), 0.0, self.total)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::new(self.finished(), self.total, self.in_progress, self.errored)
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processing {} item(s): Completed downloads {} of {}      Still in progress = {}, Errors = {}!",
            self.total, self.done, self.total, self.in_progress, self.errored
        )
    }
}

/// How a batch of URLs should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResolutionMode {
    #[default]
    TopLevel,
    FromPlaylist,
    FromChannel,
    FromPage,
}

impl ResolutionMode {
    /// Whether a failed resolution in this mode may expand further
    pub fn allows_expansion(&self) -> bool {
        matches!(self, Self::TopLevel | Self::FromChannel)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TopLevel => "URL(s)",
            Self::FromPlaylist => "playlist videos",
            Self::FromChannel => "channel entries",
            Self::FromPage => "sub-links",
        }
    }
}

/// One URL waiting to be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionTask {
    pub url: String,
    pub mode: ResolutionMode,
    /// Index of the top-level unit this task descends from
    pub root: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn state_machine_rejects_reentry() {
        let mut item = Item::from_info(MediaInfo::new("AAA", "https://x.com/watch?id=AAA"));
        item.transition(ItemStatus::InProgress).unwrap();
        item.transition(ItemStatus::Done).unwrap();
        assert!(item.transition(ItemStatus::InProgress).is_err());
        assert!(item.transition(ItemStatus::Error).is_err());
        assert_eq!(item.status, ItemStatus::Done);
    }

    #[test]
    fn ready_cannot_jump_to_done() {
        assert!(!ItemStatus::Ready.can_transition_to(ItemStatus::Done));
        assert!(ItemStatus::Ready.can_transition_to(ItemStatus::InProgress));
    }

    #[test]
    fn selection_symbols_have_fixed_slots() {
        let sel = OutputSelection::from_flags(false, true, false, false, true, false, false);
        assert_eq!(sel.symbols(1), "  Ⓐ     Ⓣ    ");
        assert_eq!(OutputSelection::from_symbols(&sel.symbols(2)), sel);
    }

    #[test]
    fn selection_defaults_to_combined_without_audio_or_video() {
        let sel = OutputSelection::from_flags(false, false, false, true, false, false, false);
        assert!(sel.combined);
        assert!(sel.subtitles);
    }

    #[test]
    fn selection_apply_actions() {
        let mut sel = OutputSelection::none();
        sel.apply(OutputKind::Info, ToggleAction::Toggle);
        assert!(sel.info);
        sel.apply(OutputKind::Info, ToggleAction::On);
        assert!(sel.info);
        sel.apply(OutputKind::Info, ToggleAction::Off);
        assert!(sel.is_empty());
    }

    #[test]
    fn limits_parse_units_and_max() {
        let limits = DownloadLimits::parse("128 kbps", "720p", "max fps");
        assert_eq!(limits.max_audio_bitrate_kbps, Some(128));
        assert_eq!(limits.max_resolution, Some(720));
        assert_eq!(limits.max_fps, None);
        assert_eq!(parse_limit("garbage", "p"), None);
    }

    #[test]
    fn job_paths_are_sanitised() {
        let mut item = Item::from_info(MediaInfo::new("id1", "u").with_title("a/b:c"));
        item.insertion_order = 1;
        let config = DownloadConfig {
            output_dir: PathBuf::from("/out"),
            ..DownloadConfig::default()
        };
        let job = Job::new(item, config);
        assert_eq!(job.temp_dir(), PathBuf::from("/out/.id1"));
        assert_eq!(job.output_file(), PathBuf::from("/out/a_b_c [id1].mkv"));
    }

    #[test]
    fn degenerate_titles_stay_inside_the_output_dir() {
        use std::path::Path;

        let config = DownloadConfig {
            output_dir: PathBuf::from("/out"),
            ..DownloadConfig::default()
        };
        for (id, title) in [("AAA", "."), ("BBB", ""), ("CCC", ".."), ("..", "  ")] {
            let job = Job::new(Item::from_info(MediaInfo::new(id, "u").with_title(title)), config.clone());
            for path in [job.temp_dir(), job.output_file()] {
                assert_eq!(path.parent(), Some(Path::new("/out")), "{:?}", path);
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                assert!(name != "." && name != "..", "{}", name);
            }
        }

        let dotted = Job::new(Item::from_info(MediaInfo::new("AAA", "u").with_title(".")), config.clone());
        assert_eq!(dotted.output_file(), PathBuf::from("/out/. [AAA].mkv"));
        let empty = Job::new(Item::from_info(MediaInfo::new("BBB", "u").with_title("")), config);
        assert_eq!(empty.temp_dir(), PathBuf::from("/out/.BBB"));
        assert_eq!(empty.output_file(), PathBuf::from("/out/BBB.mkv"));
    }

    #[test]
    fn summary_message_and_percent() {
        let summary = BatchSummary {
            total: 4,
            done: 2,
            in_progress: 1,
            errored: 1,
        };
        assert_eq!(summary.percent(), 75.0);
        assert!(summary.to_string().contains("Completed downloads 2 of 4"));
        assert_eq!(BatchSummary::default().percent(), 0.0);
    }
}
