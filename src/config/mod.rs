use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::BotError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process credentials, normally supplied through the environment.
    /// Read from the file when present but never written back.
    #[serde(skip_serializing)]
    pub credentials: Credentials,

    /// Per-user request allowance
    pub quota: QuotaConfig,

    /// Bot behaviour
    pub bot: BotConfig,

    /// External download and conversion tools
    pub engines: EngineConfig,

    /// Payment verification
    pub payment: PaymentConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Application id (process identity)
    pub app_id: Option<i32>,

    /// Application hash (process secret)
    pub app_hash: Option<String>,

    /// Bot token (service token)
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Requests allowed per window
    pub max_requests: u32,

    /// Window length in seconds
    pub window_secs: u64,

    /// Requests added by one verified payment
    pub credit_amount: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Prefix required in group chats
    pub invocation_prefix: String,

    /// Maximum characters of engine diagnostics shown to users
    pub max_error_chars: usize,

    /// Events handled concurrently
    pub max_concurrent_jobs: usize,

    /// Base directory for per-job working directories
    pub temp_dir: Option<PathBuf>,

    /// Label of the follow-up control attached to delivered videos
    pub follow_up_label: String,

    /// Minimum spacing of progress edits in milliseconds
    pub progress_interval_ms: u64,

    /// Delivered artifacts remembered for follow-up actions
    pub max_tracked_artifacts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub yt_dlp_path: String,
    pub ffmpeg_path: String,

    /// yt-dlp format selector
    pub video_format: String,

    /// Container extension of converted audio
    pub audio_extension: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Endpoint confirming payment tokens; payments are disabled when unset
    pub verify_url: Option<String>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_secs: 86_400,
            credit_amount: 20,
        }
    }
}

impl QuotaConfig {
    /// The window as a duration, `None` when zero or too large to represent
    pub fn window(&self) -> Option<Duration> {
        i64::try_from(self.window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .filter(|window| *window > Duration::zero())
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            invocation_prefix: "/ytdl".to_string(),
            max_error_chars: 4000,
            max_concurrent_jobs: 100,
            temp_dir: None,
            follow_up_label: "audio".to_string(),
            progress_interval_ms: 1500,
            max_tracked_artifacts: 10_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            video_format: "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string(),
            audio_extension: "m4a".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, the default location, or built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::config_path().ok(),
        }
        .filter(|p| p.exists());

        let config = match config_path {
            Some(config_path) => {
                let content = fs_err::read_to_string(&config_path)
                    .context("Failed to read config file")?;
                tracing::info!("Loaded config from {}", config_path.display());
                Self::from_yaml(&content)?
            }
            None => {
                tracing::info!("No config file found, using defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config file")
    }

    /// Write configuration to `path` or the default location
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs_err::write(&config_path, content).context("Failed to write config file")?;

        Ok(config_path)
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("ytdl-bot").join("config.yaml"))
    }

    /// Overlay credentials given on the command line or environment
    pub fn with_credentials(mut self, app_id: Option<i32>, app_hash: Option<String>, token: Option<String>) -> Self {
        if app_id.is_some() {
            self.credentials.app_id = app_id;
        }
        if app_hash.is_some() {
            self.credentials.app_hash = app_hash;
        }
        if token.is_some() {
            self.credentials.token = token;
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), BotError> {
        if self.quota.max_requests == 0 {
            return Err(BotError::Config("quota.max_requests must be greater than 0".into()));
        }
        if self.quota.window().is_none() {
            return Err(BotError::Config(format!(
                "quota.window_secs must be between 1 and {}",
                Duration::MAX.num_seconds()
            )));
        }
        if self.quota.credit_amount == 0 {
            return Err(BotError::Config("quota.credit_amount must be greater than 0".into()));
        }
        if self.bot.invocation_prefix.trim().is_empty() {
            return Err(BotError::Config("bot.invocation_prefix must not be empty".into()));
        }
        if self.bot.max_error_chars == 0 {
            return Err(BotError::Config("bot.max_error_chars must be greater than 0".into()));
        }
        if self.bot.max_concurrent_jobs == 0 {
            return Err(BotError::Config("bot.max_concurrent_jobs must be greater than 0".into()));
        }
        if self.engines.audio_extension.trim_matches('.').is_empty() {
            return Err(BotError::Config("engines.audio_extension must not be empty".into()));
        }
        Ok(())
    }

    /// The bot token, required to connect to the chat service
    pub fn token(&self) -> Result<&str, BotError> {
        self.credentials
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| BotError::Config("TOKEN is not set".into()))
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  App ID: {}", self.credentials.app_id.map(|id| id.to_string()).unwrap_or_else(|| "<unset>".into()));
        println!("  App Hash: {}", mask(self.credentials.app_hash.as_deref()));
        println!("  Token: {}", mask(self.credentials.token.as_deref()));
        println!(
            "  Quota: {} requests per {}, +{} per payment",
            self.quota.max_requests,
            crate::utils::format_duration(self.quota.window_secs as f64),
            self.quota.credit_amount
        );
        println!("  Invocation Prefix: {}", self.bot.invocation_prefix);
        println!("  Workers: {}", self.bot.max_concurrent_jobs);
        if let Some(dir) = &self.bot.temp_dir {
            println!("  Temp Dir: {}", dir.display());
        }
        println!("  yt-dlp: {}", self.engines.yt_dlp_path);
        println!("  ffmpeg: {}", self.engines.ffmpeg_path);
        println!(
            "  Payments: {}",
            self.payment.verify_url.as_deref().unwrap_or("disabled")
        );
    }
}

fn mask(secret: Option<&str>) -> String {
    match secret {
        Some(s) if s.chars().count() > 4 => format!("{}****", s.chars().take(4).collect::<String>()),
        Some(_) => "****".to_string(),
        None => "<unset>".to_string(),
    }
}
