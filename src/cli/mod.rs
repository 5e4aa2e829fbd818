use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ytdl-bot",
    about = "YouTube-DL bot - download media from links sent in Telegram chats",
    version,
    long_about = "A Telegram bot that downloads media from links with yt-dlp, enforces a per-user quota, and converts delivered videos to audio on request."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (defaults to ./config.yaml or the user config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Application id
    #[arg(long, env = "APP_ID", global = true, hide_env_values = true)]
    pub app_id: Option<i32>,

    /// Application hash
    #[arg(long, env = "APP_HASH", global = true, hide_env_values = true)]
    pub app_hash: Option<String>,

    /// Bot token
    #[arg(long, env = "TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot (default)
    Run,

    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write the default configuration file
        #[arg(long, conflicts_with = "show")]
        init: bool,
    },

    /// Check that yt-dlp and ffmpeg are available
    Check,
}
