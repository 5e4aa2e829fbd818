use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::{DownloadEngine, DownloadResult, Progress, ProgressSink};
use crate::config::EngineConfig;
use crate::utils::format_file_size;
use crate::{BotError, Result};

/// Download engine backed by the yt-dlp executable
pub struct YtDlpDownloader {
    yt_dlp_path: String,
    format: String,
}

impl YtDlpDownloader {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            yt_dlp_path: config.yt_dlp_path.clone(),
            format: config.video_format.clone(),
        }
    }

    async fn run(&self, url: &str, destination: &Path, progress: &dyn ProgressSink) -> Result<PathBuf> {
        tracing::debug!("Downloading {} into {}", url, destination.display());

        let template = destination.join("%(title).80s.%(ext)s");
        let mut child = Command::new(&self.yt_dlp_path)
            .args([
                "--newline",
                "--no-playlist",
                "--no-colors",
                "--restrict-filenames",
                "--format",
                self.format.as_str(),
                "--merge-output-format",
                "mp4",
                "--output",
            ])
            .arg(&template)
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.yt_dlp_path))?;

        let stdout = child.stdout.take().context("yt-dlp stdout was not captured")?;
        let mut stderr = child.stderr.take().context("yt-dlp stderr was not captured")?;

        // Drain stderr alongside stdout so neither pipe fills up
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(update) = parse_progress_line(&line) {
                progress.report(update).await;
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let detail = stderr.trim();
            let detail = if detail.is_empty() {
                format!("yt-dlp exited with {}", status)
            } else {
                detail.to_string()
            };
            return Err(BotError::DownloadFailed(detail).into());
        }

        find_output(destination).await
    }
}

#[async_trait]
impl DownloadEngine for YtDlpDownloader {
    async fn download(&self, url: &str, destination: &Path, progress: &dyn ProgressSink) -> DownloadResult {
        match self.run(url, destination, progress).await {
            Ok(file_path) => DownloadResult::Success { file_path },
            Err(e) => match e.downcast_ref::<BotError>() {
                Some(BotError::DownloadFailed(detail)) => DownloadResult::failure(detail.clone()),
                _ => DownloadResult::failure(format!("{:#}", e)),
            },
        }
    }
}

/// Parse a `[download]  42.3% of 10.00MiB at 1.00MiB/s ETA 00:05` line
pub fn parse_progress_line(line: &str) -> Option<Progress> {
    if let Some(rest) = line.strip_prefix("[Merger]") {
        return Some(Progress::new(None, rest.trim()));
    }

    let rest = line.strip_prefix("[download]")?.trim();
    let percent = rest.split_whitespace().next()?.strip_suffix('%')?;
    let percent: f64 = percent.parse().ok()?;

    Some(Progress::new(Some(percent / 100.0), rest))
}

/// The finished file: the largest regular file left in the working directory
async fn find_output(destination: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(destination)
        .await
        .with_context(|| format!("Failed to read {}", destination.display()))?;

    let mut best: Option<(u64, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = entry.metadata().await?;
        let partial = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("part") | Some("ytdl") | Some("temp")
        );
        if !metadata.is_file() || partial {
            continue;
        }
        if best.as_ref().map_or(true, |(size, _)| metadata.len() > *size) {
            best = Some((metadata.len(), path));
        }
    }

    let (size, path) =
        best.ok_or_else(|| BotError::DownloadFailed("yt-dlp finished but produced no file".into()))?;
    tracing::info!("Downloaded {} ({})", path.display(), format_file_size(size));
    Ok(path)
}
