use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::ConversionEngine;
use crate::config::EngineConfig;
use crate::{BotError, Result};

/// Audio conversion engine backed by the ffmpeg executable
pub struct FfmpegConverter {
    ffmpeg_path: String,
}

impl FfmpegConverter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
        }
    }
}

/// Audio codec matching a container extension
fn audio_codec_for(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "mp3" => "libmp3lame",
        "flac" => "flac",
        "ogg" | "opus" => "libopus",
        "wav" => "pcm_s16le",
        _ => "aac",
    }
}

#[async_trait]
impl ConversionEngine for FfmpegConverter {
    async fn convert(&self, target_name: &str, source: &Path) -> Result<PathBuf> {
        let target = source.parent().unwrap_or_else(|| Path::new(".")).join(target_name);
        if target == source {
            return Err(BotError::ConversionFailed(format!(
                "target {} would overwrite its source",
                target.display()
            ))
            .into());
        }

        let extension = target.extension().and_then(|e| e.to_str()).unwrap_or("m4a");
        tracing::debug!("Converting {} to {}", source.display(), target.display());

        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(source)
            .args(["-vn", "-c:a", audio_codec_for(extension), "-y"])
            .arg(&target)
            .output()
            .await
            .with_context(|| format!("Failed to start {}", self.ffmpeg_path))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(BotError::ConversionFailed(error.trim().to_string()).into());
        }

        Ok(target)
    }
}
