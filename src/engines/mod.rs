use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub mod ffmpeg;
pub mod ytdlp;

use crate::Result;

pub use ffmpeg::FfmpegConverter;
pub use ytdlp::YtDlpDownloader;

/// Incremental status of a long-running operation
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Completion between 0.0 and 1.0, when known
    pub fraction: Option<f64>,

    /// Human-readable status line
    pub status: String,
}

impl Progress {
    pub fn new(fraction: Option<f64>, status: impl Into<String>) -> Self {
        Self {
            fraction: fraction.map(|f| f.clamp(0.0, 1.0)),
            status: status.into(),
        }
    }
}

/// Receiver of progress reports
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: Progress);
}

/// Outcome of a download, produced exactly once per job
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadResult {
    Success { file_path: PathBuf },
    Failure { error_detail: String },
}

impl DownloadResult {
    pub fn failure(error_detail: impl Into<String>) -> Self {
        DownloadResult::Failure {
            error_detail: error_detail.into(),
        }
    }
}

/// External engine fetching a URL into a directory.
///
/// Failures of the engine are reported as [`DownloadResult::Failure`], never as panics
/// or errors.
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    async fn download(&self, url: &str, destination: &Path, progress: &dyn ProgressSink) -> DownloadResult;
}

/// External engine converting a media file to audio
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Convert `source` into a file named `target_name` next to it and return its path
    async fn convert(&self, target_name: &str, source: &Path) -> Result<PathBuf>;
}
