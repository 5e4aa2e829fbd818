use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::bot::messages;
use crate::engines::DownloadEngine;
use crate::presenter::{Presentation, ResultPresenter, StatusMessage};
use crate::quota::{Admission, QuotaLedger, UserIdentity};
use crate::transport::{self, ChatAction, ChatId, ChatTransport, DeliveredArtifact, MessageId};
use crate::utils::{extract_domain, scoped_workdir};
use crate::{BotError, Result};

/// Lifecycle of one download request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Admitted,
    Downloading,
    Delivered,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Delivered | JobState::Failed)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Received, JobState::Admitted)
                | (JobState::Admitted, JobState::Downloading)
                | (JobState::Admitted, JobState::Failed)
                | (JobState::Downloading, JobState::Delivered)
                | (JobState::Downloading, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Received => "received",
            JobState::Admitted => "admitted",
            JobState::Downloading => "downloading",
            JobState::Delivered => "delivered",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A link the user asked to download
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub chat: ChatId,
    pub reply_to: MessageId,
    pub url: String,
}

/// How a request ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Rejected by the quota gate; nothing was charged and no job ran
    Denied(Admission),
    Delivered(DeliveredArtifact),
    Failed { error_text: String },
}

struct Job {
    id: String,
    chat: ChatId,
    state: JobState,
}

impl Job {
    fn new(chat: ChatId) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            chat,
            state: JobState::Received,
        }
    }

    fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid job transition {} -> {}",
            self.state,
            next
        );
        tracing::info!(job_id = %self.id, chat = self.chat.0, from = %self.state, to = %next, "Job transition");
        self.state = next;
    }
}

/// Runs a download request from admission to its single terminal outcome
pub struct JobDispatcher {
    ledger: Arc<QuotaLedger>,
    downloader: Arc<dyn DownloadEngine>,
    presenter: Arc<ResultPresenter>,
    transport: Arc<dyn ChatTransport>,
    temp_dir: Option<PathBuf>,
    progress_interval: Duration,
}

impl JobDispatcher {
    pub fn new(
        ledger: Arc<QuotaLedger>,
        downloader: Arc<dyn DownloadEngine>,
        presenter: Arc<ResultPresenter>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            ledger,
            downloader,
            presenter,
            transport,
            temp_dir: None,
            progress_interval: Duration::from_millis(1500),
        }
    }

    /// Create working directories under `dir` instead of the system default
    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub async fn run(&self, request: DownloadRequest) -> Result<JobOutcome> {
        let mut job = Job::new(request.chat);
        let identity = UserIdentity::from(request.chat);

        let admission = self.ledger.check_and_admit(identity);
        if !admission.allowed {
            tracing::info!(
                chat = request.chat.0,
                "{}",
                BotError::AdmissionDenied {
                    retry_after_secs: admission.retry_after.num_seconds()
                }
            );
            self.transport
                .send_text(request.chat, &messages::quota_exceeded(&admission), Some(request.reply_to))
                .await?;
            return Ok(JobOutcome::Denied(admission));
        }
        job.transition(JobState::Admitted);
        let site = extract_domain(&request.url).unwrap_or_else(|| "unknown".to_string());
        tracing::info!(
            job_id = %job.id,
            site = %site,
            "Starting {}",
            request.url
        );

        let status_ref = self
            .transport
            .send_text(request.chat, "Processing", Some(request.reply_to))
            .await?;
        transport::hint(self.transport.as_ref(), request.chat, ChatAction::UploadVideo).await;
        let status = StatusMessage::new(Arc::clone(&self.transport), status_ref, self.progress_interval);

        // Removed on drop, so every exit below releases it
        let workdir = match scoped_workdir(self.temp_dir.as_deref(), "ytdl-") {
            Ok(dir) => dir,
            Err(e) => {
                job.transition(JobState::Failed);
                self.report_internal_error(&job, &request.url, &status, &e).await;
                return Err(e);
            }
        };

        job.transition(JobState::Downloading);
        let result = self
            .downloader
            .download(&request.url, workdir.path(), &status)
            .await;
        tracing::info!(job_id = %job.id, "Download finished");

        let caption = messages::remaining_quota_caption(&self.ledger.peek(identity));
        let presentation = self.presenter.present(&request.url, result, &status, &caption).await;

        let workdir_path = workdir.path().to_path_buf();
        if let Err(e) = workdir.close() {
            tracing::warn!(job_id = %job.id, "Failed to remove {}: {}", workdir_path.display(), e);
        }

        match presentation {
            Ok(Presentation::Delivered(artifact)) => {
                job.transition(JobState::Delivered);
                Ok(JobOutcome::Delivered(artifact))
            }
            Ok(Presentation::Failed { error_text }) => {
                job.transition(JobState::Failed);
                Ok(JobOutcome::Failed { error_text })
            }
            Err(e) => {
                job.transition(JobState::Failed);
                self.report_internal_error(&job, &request.url, &status, &e).await;
                Err(e)
            }
        }
    }

    /// Replace the status with a failure notice so the user is not left waiting
    async fn report_internal_error(&self, job: &Job, url: &str, status: &StatusMessage, error: &anyhow::Error) {
        let (message, _) = self.presenter.failure_message(url, &format!("{:#}", error));
        if let Err(e) = status.set(&message).await {
            tracing::warn!(job_id = %job.id, "Failed to report job failure: {:#}", e);
        }
    }
}
