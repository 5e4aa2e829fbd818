//! ytdl-bot - a chat bot that downloads media from a link and sends it back
//!
//! Requests are admitted against a per-user quota, downloaded out-of-band by an
//! external engine (yt-dlp), and delivered with a follow-up control that converts
//! the delivered video to audio (ffmpeg).

pub mod bot;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod engines;
pub mod payment;
pub mod postprocess;
pub mod presenter;
pub mod quota;
pub mod transport;
pub mod utils;
pub mod validator;

pub use bot::BotService;
pub use cli::{Cli, Commands};
pub use config::Config;
pub use dispatcher::{JobDispatcher, JobOutcome, JobState};
pub use engines::{ConversionEngine, DownloadEngine, DownloadResult, Progress, ProgressSink};
pub use postprocess::{ConversionOutcome, PostProcessStateMachine};
pub use presenter::{FollowUpRegistry, ResultPresenter, StatusMessage};
pub use quota::{Admission, CreditOutcome, QuotaLedger, UserIdentity};
pub use transport::{ChatId, ChatTransport, DeliveredArtifact, MessageId, MessageRef};
pub use validator::{BotCommand, ChatKind, Classification, RequestValidator};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the bot
#[derive(thiserror::Error, Debug)]
pub enum BotError {
    #[error("Quota exhausted, retry in {retry_after_secs} seconds")]
    AdmissionDenied { retry_after_secs: i64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Audio conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Chat transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
