use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::engines::{DownloadResult, Progress, ProgressSink};
use crate::transport::{self, ChatAction, ChatTransport, DeliveredArtifact, FollowUpControl, MessageRef, VideoUpload};
use crate::utils::truncate_chars;
use crate::Result;

/// Longest text a single chat message may carry
pub const MESSAGE_LIMIT: usize = 4096;

/// Characters of the URL echoed back in a failure message
const MAX_URL_CHARS: usize = 512;

#[derive(Default)]
struct StatusState {
    text: Option<String>,
    fraction: Option<f64>,
    edited_at: Option<Instant>,
}

/// The single editable status message of a job.
///
/// Progress reports edit it in place. Reports that move backwards, repeat the current
/// text, or arrive within `min_interval` of the previous edit are dropped; only a
/// completed fraction bypasses the interval.
pub struct StatusMessage {
    transport: Arc<dyn ChatTransport>,
    message: MessageRef,
    min_interval: Duration,
    state: Mutex<StatusState>,
}

impl StatusMessage {
    pub fn new(transport: Arc<dyn ChatTransport>, message: MessageRef, min_interval: Duration) -> Self {
        Self {
            transport,
            message,
            min_interval,
            state: Mutex::new(StatusState::default()),
        }
    }

    pub fn message(&self) -> MessageRef {
        self.message
    }

    /// Replace the status text unconditionally.
    ///
    /// Starts a new phase: progress reported afterwards may begin again from zero.
    pub async fn set(&self, text: &str) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.fraction = None;
            if state.text.as_deref() == Some(text) {
                return Ok(());
            }
            state.text = Some(text.to_string());
            state.edited_at = Some(Instant::now());
        }
        self.transport.edit_text(self.message, text).await
    }
}

#[async_trait]
impl ProgressSink for StatusMessage {
    async fn report(&self, progress: Progress) {
        let text = render_progress(&progress);
        {
            let mut state = self.state.lock();
            if let (Some(new), Some(old)) = (progress.fraction, state.fraction) {
                if new < old {
                    return;
                }
            }
            if state.text.as_deref() == Some(text.as_str()) {
                return;
            }
            let complete = progress.fraction == Some(1.0);
            let too_soon = state
                .edited_at
                .map_or(false, |at| at.elapsed() < self.min_interval);
            if too_soon && !complete {
                return;
            }
            if progress.fraction.is_some() {
                state.fraction = progress.fraction;
            }
            state.text = Some(text.clone());
            state.edited_at = Some(Instant::now());
        }

        if let Err(e) = self.transport.edit_text(self.message, &text).await {
            tracing::debug!("Failed to update progress: {:#}", e);
        }
    }
}

/// Status text for a progress report
pub fn render_progress(progress: &Progress) -> String {
    match progress.fraction {
        Some(fraction) => {
            let fraction = fraction.clamp(0.0, 1.0);
            let filled = ((fraction * 10.0).round() as usize).min(10);
            format!(
                "[{}{}] {:.1}%\n{}",
                "█".repeat(filled),
                "░".repeat(10 - filled),
                fraction * 100.0,
                progress.status
            )
        }
        None => progress.status.clone(),
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, DeliveredArtifact>,
    order: VecDeque<String>,
}

/// Delivered artifacts addressable by the token carried in their follow-up control.
///
/// Holds at most `capacity` entries; the oldest are forgotten first.
pub struct FollowUpRegistry {
    capacity: usize,
    inner: Mutex<RegistryInner>,
}

impl FollowUpRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn issue_token() -> String {
        Uuid::new_v4().simple().to_string()
    }

    pub fn remember(&self, token: String, artifact: DeliveredArtifact) {
        let mut inner = self.inner.lock();
        if inner.entries.insert(token.clone(), artifact).is_none() {
            inner.order.push_back(token);
        }
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn resolve(&self, token: &str) -> Option<DeliveredArtifact> {
        self.inner.lock().entries.get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the user was shown for a finished download
#[derive(Debug, Clone, PartialEq)]
pub enum Presentation {
    Delivered(DeliveredArtifact),
    Failed { error_text: String },
}

/// Renders a download outcome back to the chat
pub struct ResultPresenter {
    transport: Arc<dyn ChatTransport>,
    registry: Arc<FollowUpRegistry>,
    follow_up_label: String,
    max_error_chars: usize,
}

impl ResultPresenter {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        registry: Arc<FollowUpRegistry>,
        follow_up_label: impl Into<String>,
        max_error_chars: usize,
    ) -> Self {
        Self {
            transport,
            registry,
            follow_up_label: follow_up_label.into(),
            max_error_chars,
        }
    }

    /// Deliver the artifact or report the failure through `status`
    pub async fn present(
        &self,
        url: &str,
        outcome: DownloadResult,
        status: &StatusMessage,
        caption: &str,
    ) -> Result<Presentation> {
        let chat = status.message().chat;

        match outcome {
            DownloadResult::Success { file_path } => {
                status.set("Download complete. Sending now...").await?;
                transport::hint(self.transport.as_ref(), chat, ChatAction::UploadDocument).await;

                let follow_up = FollowUpControl {
                    label: self.follow_up_label.clone(),
                    token: FollowUpRegistry::issue_token(),
                };
                let token = follow_up.token.clone();
                let artifact = self
                    .transport
                    .send_video(
                        chat,
                        VideoUpload {
                            path: file_path,
                            caption: caption.to_string(),
                            follow_up,
                        },
                        // Uploads report into the same status message as the download
                        status,
                    )
                    .await?;
                self.registry.remember(token, artifact.clone());

                status.set("Download success!✅").await?;
                Ok(Presentation::Delivered(artifact))
            }
            DownloadResult::Failure { error_detail } => {
                transport::hint(self.transport.as_ref(), chat, ChatAction::Typing).await;

                let (message, error_text) = self.failure_message(url, &error_detail);
                status.set(&message).await?;
                Ok(Presentation::Failed { error_text })
            }
        }
    }

    /// Failure text for `url` and the diagnostic shown in it.
    ///
    /// The diagnostic is cut to `max_error_chars` and further so that the whole
    /// message fits in [`MESSAGE_LIMIT`].
    pub fn failure_message(&self, url: &str, detail: &str) -> (String, String) {
        let head = format!("{} download failed❌：\n```", truncate_chars(url, MAX_URL_CHARS));
        let tail = "```";
        let budget = MESSAGE_LIMIT
            .saturating_sub(head.chars().count() + tail.len())
            .min(self.max_error_chars);

        let error_text = truncate_chars(detail, budget).to_string();
        (format!("{}{}{}", head, error_text, tail), error_text)
    }
}
