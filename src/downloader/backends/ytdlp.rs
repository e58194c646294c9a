// yt-dlp + ffmpeg media backend
//
// Streams are fetched separately into the job's temp dir using format
// selectors built from the download limits, then muxed by ffmpeg with
// stream copy. Extras use yt-dlp's `--skip-download` modes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::downloader::errors::DownloadError;
use crate::downloader::extractors::{ResolverConfig, ResolverMode};
use crate::downloader::models::{DownloadLimits, Job, OutputKind};
use crate::downloader::traits::{MediaBackend, ProgressFn};
use crate::downloader::utils::{
    find_ytdlp, network_args, parse_progress_line, python_cmd, run_output_with_timeout, run_streaming,
};

const SUBTITLE_EXTENSIONS: &[&str] = &["vtt", "srt", "ass", "ttml", "srv3"];
const MUX_TIMEOUT_SECS: u64 = 3600;

/// yt-dlp selector for the best audio stream within the limits,
/// trying the preferred containers in order.
pub fn audio_format_spec(limits: &DownloadLimits) -> String {
    let ceiling = limits
        .max_audio_bitrate_kbps
        .map(|kbps| format!("[abr<={}]", kbps))
        .unwrap_or_default();

    let mut choices: Vec<String> = limits
        .audio_format_priority
        .iter()
        .map(|ext| format!("ba[ext={}]{}", ext, ceiling))
        .collect();
    if !ceiling.is_empty() {
        choices.push(format!("ba{}", ceiling));
    }
    choices.push("ba".to_string());
    choices.join("/")
}

/// yt-dlp selector for the best video-only stream within the limits
pub fn video_format_spec(limits: &DownloadLimits) -> String {
    let mut ceiling = String::new();
    if let Some(height) = limits.max_resolution {
        ceiling.push_str(&format!("[height<={}]", height));
    }
    if let Some(fps) = limits.max_fps {
        ceiling.push_str(&format!("[fps<={}]", fps));
    }

    let mut choices: Vec<String> = limits
        .video_format_priority
        .iter()
        .map(|ext| format!("bv[ext={}]{}", ext, ceiling))
        .collect();
    if !ceiling.is_empty() {
        choices.push(format!("bv{}", ceiling));
    }
    choices.push("bv".to_string());
    choices.join("/")
}

/// Output template for `stem` plus a literal suffix; `%` in titles is
/// escaped so yt-dlp does not treat it as a field.
fn output_template(stem: &str, suffix: &str) -> String {
    format!("{}{}.%(ext)s", stem.replace('%', "%%"), suffix)
}

/// ffmpeg arguments mapping every input into one container, no re-encode
pub fn mux_args(video: &Path, audios: &[PathBuf], subtitles: &[PathBuf], output: &Path) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-loglevel".to_string(), "error".to_string()];
    let inputs = std::iter::once(video)
        .chain(audios.iter().map(PathBuf::as_path))
        .chain(subtitles.iter().map(PathBuf::as_path));
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.display().to_string());
    }

    args.extend(["-map".to_string(), "0:v".to_string()]);
    for index in 0..audios.len() {
        args.extend(["-map".to_string(), format!("{}:a", index + 1)]);
    }
    for index in 0..subtitles.len() {
        args.extend(["-map".to_string(), format!("{}:s", index + 1 + audios.len())]);
    }
    args.extend(["-c".to_string(), "copy".to_string()]);
    args.push(output.display().to_string());
    args
}

/// First finished file in `dir` whose name starts with `prefix`
async fn find_output(dir: &Path, prefix: &str) -> Result<PathBuf, DownloadError> {
    let mut found = find_outputs(dir, prefix, |_| true).await?;
    found.sort();
    found
        .into_iter()
        .next()
        .ok_or_else(|| DownloadError::DownloadFailed(format!("no output matching '{}' in {}", prefix, dir.display())))
}

async fn find_outputs(
    dir: &Path,
    prefix: &str,
    accept: impl Fn(&str) -> bool,
) -> Result<Vec<PathBuf>, DownloadError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) && !name.ends_with(".part") && !name.ends_with(".ytdl") && accept(&name) {
            found.push(entry.path());
        }
    }
    Ok(found)
}

pub struct YtDlpBackend {
    mode: ResolverMode,
    ytdlp: String,
    /// Arguments placed before the yt-dlp options (`-m yt_dlp`)
    prefix: Vec<String>,
    ffmpeg: String,
    config: ResolverConfig,
}

impl YtDlpBackend {
    /// Drive the same yt-dlp entry point the resolver chain found
    pub fn new(mode: ResolverMode, config: ResolverConfig) -> Self {
        let (ytdlp, prefix) = match mode {
            ResolverMode::Cli => (find_ytdlp(), Vec::new()),
            ResolverMode::Python => (python_cmd(), vec!["-m".to_string(), "yt_dlp".to_string()]),
        };
        Self {
            mode,
            ytdlp,
            prefix,
            ffmpeg: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            config,
        }
    }

    pub fn mode(&self) -> ResolverMode {
        self.mode
    }

    fn stream_args(&self, job: &Job, dir: &Path, format: String, suffix: &str) -> Vec<String> {
        let mut args = self.prefix.clone();
        args.extend(["-f".to_string(), format]);
        args.extend(self.base_args(dir, output_template(&job.file_stem(), suffix)));
        args.push(job.item.source_url.clone());
        args
    }

    fn base_args(&self, dir: &Path, template: String) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--newline".to_string(),
            "-P".to_string(),
            dir.display().to_string(),
            "-o".to_string(),
            template,
        ];
        args.extend(network_args(
            self.config.proxy.as_deref(),
            self.config.cookies_path.as_deref(),
            self.config.timeout_seconds,
        ));
        args
    }

    async fn download_stream(
        &self,
        job: &Job,
        dir: &Path,
        format: String,
        suffix: &str,
        progress: &ProgressFn<'_>,
    ) -> Result<PathBuf, DownloadError> {
        let stem = job.file_stem();
        let args = self.stream_args(job, dir, format, suffix);

        tracing::debug!("[Backend] {} {}", self.ytdlp, args.join(" "));
        let on_line = |line: &str| {
            if let Some((percent, status)) = parse_progress_line(line) {
                progress(percent, &status);
            }
        };
        run_streaming(&self.ytdlp, args, &on_line)
            .await
            .map_err(|e| match e {
                DownloadError::Unknown(msg) => DownloadError::DownloadFailed(msg),
                other => other,
            })?;

        find_output(dir, &format!("{}{}.", stem, suffix)).await
    }

    async fn skip_download(&self, job: &Job, dir: &Path, flags: &[&str], suffix: &str) -> Result<(), DownloadError> {
        let mut args = self.prefix.clone();
        args.push("--skip-download".to_string());
        args.extend(flags.iter().map(|f| f.to_string()));
        args.extend(self.base_args(dir, output_template(&job.file_stem(), suffix)));
        args.push(job.item.source_url.clone());

        let output = run_output_with_timeout(&self.ytdlp, args, self.config.timeout_seconds.max(60)).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DownloadError::from(String::from_utf8_lossy(&output.stderr).into_owned()))
        }
    }
}

#[async_trait]
impl MediaBackend for YtDlpBackend {
    fn name(&self) -> &'static str {
        "yt-dlp+ffmpeg"
    }

    async fn download_audio(
        &self,
        job: &Job,
        dir: &Path,
        progress: &ProgressFn<'_>,
    ) -> Result<PathBuf, DownloadError> {
        let format = audio_format_spec(&job.config.limits);
        self.download_stream(job, dir, format, ".audio", progress).await
    }

    async fn download_video(
        &self,
        job: &Job,
        dir: &Path,
        progress: &ProgressFn<'_>,
    ) -> Result<PathBuf, DownloadError> {
        let format = video_format_spec(&job.config.limits);
        self.download_stream(job, dir, format, ".video", progress).await
    }

    async fn download_subtitles(&self, job: &Job, dir: &Path) -> Result<Vec<PathBuf>, DownloadError> {
        self.skip_download(job, dir, &["--write-subs", "--sub-langs", "all"], "")
            .await?;
        let mut subtitles = find_outputs(dir, &job.file_stem(), |name| {
            SUBTITLE_EXTENSIONS.iter().any(|ext| name.ends_with(&format!(".{}", ext)))
        })
        .await?;
        subtitles.sort();
        Ok(subtitles)
    }

    async fn combine(
        &self,
        video: &Path,
        audios: &[PathBuf],
        subtitles: &[PathBuf],
        output: &Path,
    ) -> Result<PathBuf, DownloadError> {
        let args = mux_args(video, audios, subtitles, output);
        tracing::debug!("[Backend] {} {}", self.ffmpeg, args.join(" "));

        let result = run_output_with_timeout(&self.ffmpeg, args, MUX_TIMEOUT_SECS).await?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(DownloadError::DownloadFailed(format!("ffmpeg: {}", stderr.trim())));
        }
        Ok(output.to_path_buf())
    }

    async fn save_extra(&self, job: &Job, kind: OutputKind, dir: &Path) -> Result<PathBuf, DownloadError> {
        let (flags, suffix): (&[&str], &str) = match kind {
            OutputKind::Thumbnail => (&["--write-thumbnail"], "_thumbnail"),
            OutputKind::Info => (&["--write-info-json"], "_info"),
            OutputKind::Comments => (&["--write-info-json", "--write-comments"], "_comments"),
            other => {
                return Err(DownloadError::DownloadFailed(format!(
                    "{:?} is not an extra output",
                    other
                )))
            }
        };
        self.skip_download(job, dir, flags, suffix).await?;
        find_output(dir, &format!("{}{}.", job.file_stem(), suffix)).await
    }
}
