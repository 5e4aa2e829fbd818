use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub mod messages;
pub mod runtime;

use crate::config::Config;
use crate::dispatcher::{DownloadRequest, JobDispatcher, JobOutcome};
use crate::engines::{ConversionEngine, DownloadEngine};
use crate::payment::{self, PaymentVerifier};
use crate::postprocess::{ConversionOutcome, PostProcessStateMachine};
use crate::presenter::{FollowUpRegistry, ResultPresenter};
use crate::quota::{QuotaLedger, UserIdentity};
use crate::transport::{self, ChatAction, ChatTransport, FollowUpActivation, InboundMessage};
use crate::validator::{BotCommand, Classification, RequestValidator};
use crate::{BotError, Result};

pub use runtime::RuntimeInfo;

/// What handling one inbound message led to
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    Ignored,
    Replied,
    Job(JobOutcome),
}

/// Routes inbound chat events to the quota gate, the download job, and the follow-up
/// conversion.
///
/// Events are handled on spawned tasks bounded by a worker semaphore; the quota
/// ledger is the only state they share.
pub struct BotService {
    validator: RequestValidator,
    ledger: Arc<QuotaLedger>,
    dispatcher: JobDispatcher,
    postprocess: PostProcessStateMachine,
    transport: Arc<dyn ChatTransport>,
    payments: Arc<dyn PaymentVerifier>,
    runtime: RuntimeInfo,
    workers: Arc<Semaphore>,
}

impl BotService {
    pub fn new(
        config: &Config,
        transport: Arc<dyn ChatTransport>,
        downloader: Arc<dyn DownloadEngine>,
        converter: Arc<dyn ConversionEngine>,
        payments: Arc<dyn PaymentVerifier>,
    ) -> Self {
        let ledger = Arc::new(QuotaLedger::new(&config.quota));
        let registry = Arc::new(FollowUpRegistry::new(config.bot.max_tracked_artifacts));

        let presenter = Arc::new(ResultPresenter::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            config.bot.follow_up_label.clone(),
            config.bot.max_error_chars,
        ));
        let dispatcher = JobDispatcher::new(
            Arc::clone(&ledger),
            downloader,
            presenter,
            Arc::clone(&transport),
        )
        .with_temp_dir(config.bot.temp_dir.clone())
        .with_progress_interval(Duration::from_millis(config.bot.progress_interval_ms));
        let postprocess = PostProcessStateMachine::new(
            Arc::clone(&transport),
            converter,
            registry,
            config.engines.audio_extension.clone(),
            config.bot.max_error_chars,
        )
        .with_temp_dir(config.bot.temp_dir.clone());

        Self {
            validator: RequestValidator::new(config.bot.invocation_prefix.clone()),
            ledger,
            dispatcher,
            postprocess,
            transport,
            payments,
            runtime: RuntimeInfo::new(),
            workers: Arc::new(Semaphore::new(config.bot.max_concurrent_jobs)),
        }
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn runtime(&self) -> &RuntimeInfo {
        &self.runtime
    }

    /// Handle `message` on the worker pool
    pub fn spawn_message(self: &Arc<Self>, message: InboundMessage) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(_permit) = Arc::clone(&service.workers).acquire_owned().await else {
                return;
            };
            let chat = message.chat;
            if let Err(e) = service.handle_message(message).await {
                tracing::error!(chat = chat.0, "Failed to handle message: {:#}", e);
            }
        })
    }

    /// Handle `activation` on the worker pool
    pub fn spawn_follow_up(self: &Arc<Self>, activation: FollowUpActivation) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(_permit) = Arc::clone(&service.workers).acquire_owned().await else {
                return;
            };
            let chat = activation.chat;
            if let Err(e) = service.handle_follow_up(activation).await {
                tracing::error!(chat = chat.0, "Failed to handle follow-up: {:#}", e);
            }
        })
    }

    pub async fn handle_message(&self, message: InboundMessage) -> Result<Handled> {
        match self.validator.classify(&message.text, message.kind) {
            Classification::Ignore => {
                tracing::debug!(chat = message.chat.0, "Ignoring message not addressed to the bot");
                Ok(Handled::Ignored)
            }
            Classification::Command(command) => {
                self.handle_command(&message, command).await?;
                Ok(Handled::Replied)
            }
            Classification::InvalidInput(text) => {
                tracing::info!(chat = message.chat.0, "{}", BotError::InvalidInput(text));
                self.transport
                    .send_text(message.chat, messages::INVALID_INPUT, Some(message.message_id))
                    .await?;
                Ok(Handled::Replied)
            }
            Classification::BareUrl(url) | Classification::PrefixedUrl(url) => {
                let _in_flight = self.runtime.track();
                let outcome = self
                    .dispatcher
                    .run(DownloadRequest {
                        chat: message.chat,
                        reply_to: message.message_id,
                        url,
                    })
                    .await?;
                Ok(Handled::Job(outcome))
            }
        }
    }

    pub async fn handle_follow_up(&self, activation: FollowUpActivation) -> Result<ConversionOutcome> {
        let _in_flight = self.runtime.track();
        self.postprocess.activate(activation).await
    }

    async fn handle_command(&self, message: &InboundMessage, command: BotCommand) -> Result<()> {
        let chat = message.chat;
        let identity = UserIdentity::from(chat);
        tracing::info!(chat = chat.0, ?command, "Command received");
        transport::hint(self.transport.as_ref(), chat, ChatAction::Typing).await;

        let text = match command {
            BotCommand::Start => format!(
                "{}\n\n{}",
                messages::START,
                messages::remaining_quota_caption(&self.ledger.peek(identity))
            ),
            BotCommand::Help => messages::HELP.to_string(),
            BotCommand::About => messages::ABOUT.to_string(),
            BotCommand::Terms => messages::TERMS.to_string(),
            BotCommand::Ping => self.runtime.report(),
            BotCommand::Vip(None) => messages::VIP.to_string(),
            BotCommand::Vip(Some(token)) => {
                let pending = self
                    .transport
                    .send_text(chat, messages::VIP_PAY, Some(message.message_id))
                    .await?;
                let reply = payment::redeem(&self.ledger, self.payments.as_ref(), identity, &token).await;
                return self.transport.edit_text(pending, &reply).await;
            }
        };

        self.transport.send_text(chat, &text, None).await?;
        Ok(())
    }
}
