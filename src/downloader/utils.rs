// Helper functions for resolver and backend implementations

use regex::Regex;
use std::path::Path;
use std::process::{Command as StdCommand, Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use crate::downloader::errors::DownloadError;

lazy_static::lazy_static! {
    static ref PROGRESS_RE: Regex = Regex::new(
        r"\[download\]\s+(\d+\.?\d*)%(?:\s+of\s+~?\s*(\d+\.?\d*\s*\w+))?(?:\s+at\s+(\d+\.?\d*\s*\w+/s))?(?:\s+ETA\s+(\S+))?"
    ).unwrap();
    static ref DEST_RE: Regex = Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
    static ref MERGE_RE: Regex = Regex::new(r"\[Merger?\]\s+Merging").unwrap();
    static ref ALREADY_RE: Regex = Regex::new(r"has already been downloaded").unwrap();
}

fn spawn_error(program: &str, e: std::io::Error) -> DownloadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DownloadError::ToolNotFound(program.to_string())
    } else {
        DownloadError::Io(format!("Failed to start {}: {}", program, e))
    }
}

/// Run a command to completion, killing it after `timeout_secs`
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<Output, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::Io(format!("Failed to capture stdout from {}", program)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::Io(format!("Failed to capture stderr from {}", program)))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status) => {
            let status = status?;
            let stdout = stdout_task
                .await
                .map_err(|e| DownloadError::Io(format!("stdout task failed: {}", e)))??;
            let stderr = stderr_task
                .await
                .map_err(|e| DownloadError::Io(format!("stderr task failed: {}", e)))??;
            Ok(Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::NetworkTimeout(format!(
                "{} timed out after {}s",
                program, timeout_secs
            )))
        }
    }
}

/// Run a command, feeding every stdout line to `on_line` as it arrives.
/// Fails with the classified stderr when the command exits non-zero.
pub async fn run_streaming(
    program: &str,
    args: Vec<String>,
    on_line: &(dyn Fn(&str) + Send + Sync),
) -> Result<(), DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::Io(format!("Failed to capture stdout from {}", program)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::Io(format!("Failed to capture stderr from {}", program)))?;

    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    });

    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        on_line(&line);
    }

    let status = child.wait().await?;
    let stderr = stderr_task.await.unwrap_or_default();
    if status.success() {
        Ok(())
    } else {
        tracing::debug!("[Utils] {} exited with {}: {}", program, status, stderr.trim());
        Err(DownloadError::from(stderr))
    }
}

/// Find yt-dlp executable in common paths
pub fn find_ytdlp() -> String {
    if let Ok(custom) = std::env::var("YTDLP_PATH") {
        return custom;
    }

    let common_paths = [
        "/opt/homebrew/bin/yt-dlp",
        "/usr/local/bin/yt-dlp",
        "/usr/bin/yt-dlp",
    ];
    for path in common_paths {
        if Path::new(path).exists() {
            return path.to_string();
        }
    }

    if let Ok(output) = StdCommand::new("which").arg("yt-dlp").output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout);
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    "yt-dlp".to_string()
}

/// Python interpreter for `-m yt_dlp`; overridable for virtualenvs
pub fn python_cmd() -> String {
    std::env::var("YTDLP_PYTHON").unwrap_or_else(|_| "python3".to_string())
}

pub fn python_has_module(python: &str, module: &str) -> bool {
    let code = format!("import {}", module);
    StdCommand::new(python)
        .args(["-c", &code])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

pub fn binary_responds(program: &str, version_flag: &str) -> bool {
    StdCommand::new(program)
        .arg(version_flag)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Proxy, cookies and timeout arguments shared by every yt-dlp call
pub fn network_args(proxy: Option<&str>, cookies_path: Option<&str>, timeout_secs: u64) -> Vec<String> {
    let mut args = vec!["--socket-timeout".to_string(), timeout_secs.to_string()];
    if let Some(proxy) = proxy {
        args.push("--proxy".to_string());
        args.push(proxy.to_string());
    }
    if let Some(path) = cookies_path {
        args.push("--cookies".to_string());
        args.push(path.to_string());
    }
    args
}

/// Parse a yt-dlp output line into (percent, status).
///
/// `[download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59`
pub fn parse_progress_line(line: &str) -> Option<(f32, String)> {
    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        let percent = percent.clamp(0.0, 100.0);
        let mut status = format!("{:.1}%", percent);
        if let Some(size) = caps.get(2) {
            status.push_str(&format!(" of {}", size.as_str()));
        }
        if let Some(speed) = caps.get(3) {
            status.push_str(&format!(" @ {}", speed.as_str()));
        }
        if let Some(eta) = caps.get(4) {
            status.push_str(&format!(" ETA {}", eta.as_str()));
        }
        return Some((percent, status));
    }

    if let Some(caps) = DEST_RE.captures(line) {
        let filename = caps.get(1).map(|m| m.as_str()).unwrap_or("file");
        let short_name: String = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string())
            .chars()
            .take(50)
            .collect();
        return Some((0.0, format!("Starting: {}", short_name)));
    }

    if MERGE_RE.is_match(line) {
        return Some((99.0, "Merging...".to_string()));
    }

    if ALREADY_RE.is_match(line) {
        return Some((100.0, "Already downloaded".to_string()));
    }

    None
}
