use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ytdl_bot::cli::{Cli, Commands};
use ytdl_bot::config::Config;
use ytdl_bot::engines::{FfmpegConverter, YtDlpDownloader};
use ytdl_bot::transport::telegram::{self, TelegramTransport};
use ytdl_bot::{payment, utils, BotService};

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "ytdl_bot=debug" } else { "ytdl_bot=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config = Config::load(cli.config.as_deref())?.with_credentials(cli.app_id, cli.app_hash, cli.token);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await?,
        Commands::Config { show, init } => {
            if init {
                let path = config.save(cli.config.as_deref())?;
                println!("Configuration written to: {}", path.display());
            } else if show {
                config.display();
            } else {
                println!("Configuration file: {}", Config::config_path()?.display());
                println!("Use --show to print it or --init to write the defaults.");
            }
        }
        Commands::Check => {
            let missing = utils::check_dependencies(&config.engines).await;
            if missing.is_empty() {
                println!("All external tools are available.");
            } else {
                for dep in &missing {
                    println!("Missing: {}", dep);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let token = config.token()?.to_string();

    // Check for required external tools (non-fatal, they may appear later)
    let missing_deps = utils::check_dependencies(&config.engines).await;
    for dep in missing_deps {
        tracing::warn!("Missing dependency: {}", dep);
    }

    let bot = teloxide::Bot::new(token);
    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let service = Arc::new(BotService::new(
        &config,
        transport,
        Arc::new(YtDlpDownloader::new(&config.engines)),
        Arc::new(FfmpegConverter::new(&config.engines)),
        payment::verifier_from_config(&config.payment),
    ));

    tracing::info!(
        workers = config.bot.max_concurrent_jobs,
        quota = config.quota.max_requests,
        "Starting ytdl-bot"
    );
    telegram::run(bot, service).await;

    Ok(())
}
