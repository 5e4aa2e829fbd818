//! Follow-up conversion of a delivered video to audio.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::engines::ConversionEngine;
use crate::presenter::FollowUpRegistry;
use crate::transport::{self, ChatAction, ChatTransport, DeliveredArtifact, FollowUpActivation, MessageRef};
use crate::utils::{sanitize_filename, scoped_workdir, truncate_chars};
use crate::Result;

const DEFAULT_VIDEO_NAME: &str = "video.mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    Triggered,
    Fetching,
    Converting,
    Delivered,
    Failed,
}

impl fmt::Display for ConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversionState::Triggered => "triggered",
            ConversionState::Fetching => "fetching",
            ConversionState::Converting => "converting",
            ConversionState::Delivered => "delivered",
            ConversionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    Delivered(MessageRef),
    /// Fetching or converting failed; the user was told why
    Failed { state: ConversionState, error_text: String },
    /// The activation referenced no known artifact
    Unresolved,
}

/// Audio file name derived from the delivered video's name
pub fn audio_file_name(video_name: Option<&str>, audio_extension: &str) -> String {
    let name = sanitize_filename(video_name.unwrap_or(DEFAULT_VIDEO_NAME));
    let name = if name.is_empty() { DEFAULT_VIDEO_NAME.to_string() } else { name };
    Path::new(&name)
        .with_extension(audio_extension.trim_start_matches('.'))
        .to_string_lossy()
        .into_owned()
}

/// Runs the "convert to audio" follow-up for a previously delivered video
pub struct PostProcessStateMachine {
    transport: Arc<dyn ChatTransport>,
    converter: Arc<dyn ConversionEngine>,
    registry: Arc<FollowUpRegistry>,
    audio_extension: String,
    max_error_chars: usize,
    temp_dir: Option<PathBuf>,
}

impl PostProcessStateMachine {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        converter: Arc<dyn ConversionEngine>,
        registry: Arc<FollowUpRegistry>,
        audio_extension: impl Into<String>,
        max_error_chars: usize,
    ) -> Self {
        Self {
            transport,
            converter,
            registry,
            audio_extension: audio_extension.into(),
            max_error_chars,
            temp_dir: None,
        }
    }

    /// Create conversion directories under `dir` instead of the system default
    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    pub async fn activate(&self, activation: FollowUpActivation) -> Result<ConversionOutcome> {
        let chat = activation.chat;

        // Answer the control first; fetching and converting may take a while
        if let Err(e) = self
            .transport
            .acknowledge(&activation.id, "Converting to audio...please wait patiently")
            .await
        {
            tracing::warn!(chat = chat.0, "Failed to acknowledge follow-up: {:#}", e);
        }
        tracing::info!(chat = chat.0, state = %ConversionState::Triggered, "Follow-up activated");

        let artifact = activation
            .token
            .as_deref()
            .and_then(|token| self.registry.resolve(token))
            .or(activation.attached);
        let Some(artifact) = artifact else {
            tracing::warn!(chat = chat.0, "Follow-up references no known video");
            self.transport
                .send_text(chat, "Sorry, I can no longer find that video. Please send the link again.", None)
                .await?;
            return Ok(ConversionOutcome::Unresolved);
        };

        // Removed on drop, so every exit below releases it
        let workdir = scoped_workdir(self.temp_dir.as_deref(), "ytdl-audio-")?;

        let outcome = self.convert_and_deliver(&artifact, &workdir).await;

        let workdir_path = workdir.path().to_path_buf();
        if let Err(e) = workdir.close() {
            tracing::warn!("Failed to remove {}: {}", workdir_path.display(), e);
        }

        match outcome {
            Ok(message) => {
                tracing::info!(chat = chat.0, state = %ConversionState::Delivered, "Audio delivered");
                Ok(ConversionOutcome::Delivered(message))
            }
            Err((state, e)) => {
                tracing::error!(chat = chat.0, %state, "Audio conversion failed: {:#}", e);
                let detail = format!("{:#}", e);
                let error_text = truncate_chars(&detail, self.max_error_chars).to_string();
                self.transport
                    .send_text(
                        chat,
                        &format!("Audio conversion failed❌：\n```{}```", error_text),
                        Some(artifact.message.id),
                    )
                    .await?;
                Ok(ConversionOutcome::Failed { state, error_text })
            }
        }
    }

    async fn convert_and_deliver(
        &self,
        artifact: &DeliveredArtifact,
        workdir: &TempDir,
    ) -> std::result::Result<MessageRef, (ConversionState, anyhow::Error)> {
        let chat = artifact.message.chat;
        let video_name = sanitize_filename(artifact.file_name.as_deref().unwrap_or(DEFAULT_VIDEO_NAME));
        let source = workdir.path().join(if video_name.is_empty() { DEFAULT_VIDEO_NAME } else { &video_name });
        let audio_name = audio_file_name(artifact.file_name.as_deref(), &self.audio_extension);

        tracing::info!(chat = chat.0, state = %ConversionState::Fetching, "Downloading to {}", source.display());
        transport::hint(self.transport.as_ref(), chat, ChatAction::RecordVideoNote).await;
        self.transport
            .fetch_file(&artifact.file, &source)
            .await
            .map_err(|e| (ConversionState::Fetching, e))?;

        tracing::info!(chat = chat.0, state = %ConversionState::Converting, "Converting to {}", audio_name);
        transport::hint(self.transport.as_ref(), chat, ChatAction::RecordAudio).await;
        let audio = self
            .converter
            .convert(&audio_name, &source)
            .await
            .map_err(|e| (ConversionState::Converting, e))?;

        transport::hint(self.transport.as_ref(), chat, ChatAction::UploadAudio).await;
        self.transport
            .send_audio(chat, &audio)
            .await
            .map_err(|e| (ConversionState::Converting, e))
    }
}
