use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod telegram;

use crate::engines::{Progress, ProgressSink};
use crate::quota::UserIdentity;
use crate::utils::format_file_size;
use crate::validator::ChatKind;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl From<ChatId> for UserIdentity {
    fn from(chat: ChatId) -> Self {
        UserIdentity(chat.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i32);

/// A sent message that can be edited later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat: ChatId,
    pub id: MessageId,
}

/// Remote reference to an uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef(pub String);

/// A successfully delivered video, enough to fetch it again for a follow-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredArtifact {
    pub message: MessageRef,
    pub file: FileRef,
    pub file_name: Option<String>,
}

/// Activity hint shown in the chat while work is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadVideo,
    UploadDocument,
    RecordVideoNote,
    RecordAudio,
    UploadAudio,
}

/// The single interactive control attached to a delivered video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUpControl {
    pub label: String,
    pub token: String,
}

impl FollowUpControl {
    const DATA_PREFIX: &'static str = "audio:";

    /// Callback payload carried by the control
    pub fn callback_data(&self) -> String {
        format!("{}{}", Self::DATA_PREFIX, self.token)
    }

    /// Correlation token of a callback payload produced by [`callback_data`](Self::callback_data)
    pub fn parse_token(data: &str) -> Option<&str> {
        data.strip_prefix(Self::DATA_PREFIX).filter(|t| !t.is_empty())
    }
}

/// Video upload request
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub path: PathBuf,
    pub caption: String,
    pub follow_up: FollowUpControl,
}

/// Text message received from a chat
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat: ChatId,
    pub kind: ChatKind,
    pub message_id: MessageId,
    pub text: String,
}

/// Activation of a follow-up control
#[derive(Debug, Clone)]
pub struct FollowUpActivation {
    /// Id used to acknowledge the activation
    pub id: String,
    pub chat: ChatId,
    pub token: Option<String>,
    /// The video attached to the message carrying the control, if any
    pub attached: Option<DeliveredArtifact>,
}

/// Outbound side of the chat service
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat: ChatId, text: &str, reply_to: Option<MessageId>) -> Result<MessageRef>;

    /// Replace the text of a previously sent message
    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<()>;

    async fn send_action(&self, chat: ChatId, action: ChatAction) -> Result<()>;

    /// Upload a video with its caption and follow-up control, reporting upload progress
    async fn send_video(
        &self,
        chat: ChatId,
        upload: VideoUpload,
        progress: &dyn ProgressSink,
    ) -> Result<DeliveredArtifact>;

    async fn send_audio(&self, chat: ChatId, path: &Path) -> Result<MessageRef>;

    /// Answer a follow-up activation with a short notice
    async fn acknowledge(&self, activation_id: &str, text: &str) -> Result<()>;

    /// Download a previously uploaded file to `destination`
    async fn fetch_file(&self, file: &FileRef, destination: &Path) -> Result<()>;
}

/// Progress of an upload after `sent` of `total` bytes
pub fn upload_progress(sent: u64, total: u64) -> Progress {
    let fraction = if total == 0 { 1.0 } else { sent as f64 / total as f64 };
    Progress::new(
        Some(fraction),
        format!("Uploading {} of {}", format_file_size(sent), format_file_size(total)),
    )
}

/// Send a chat action, logging instead of failing
pub async fn hint(transport: &dyn ChatTransport, chat: ChatId, action: ChatAction) {
    if let Err(e) = transport.send_action(chat, action).await {
        tracing::debug!(chat = chat.0, ?action, "Failed to send chat action: {:#}", e);
    }
}
