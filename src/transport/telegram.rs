//! Telegram Bot API transport and update routing.

use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{self, Poll};
use teloxide::net::Download;
use teloxide::payloads::setters::*;
use teloxide::prelude::*;
use teloxide::requests::Request;
use teloxide::types::{self as tg, InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use teloxide::{ApiError, RequestError};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::sync::watch;

use super::{
    upload_progress, ChatAction, ChatId, ChatTransport, DeliveredArtifact, FileRef, FollowUpActivation, FollowUpControl,
    InboundMessage, MessageId, MessageRef, VideoUpload,
};
use crate::bot::BotService;
use crate::engines::ProgressSink;
use crate::validator::ChatKind;
use crate::{BotError, Result};

type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// [`ChatTransport`] over the Telegram Bot API
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn tg_chat(chat: ChatId) -> tg::ChatId {
    tg::ChatId(chat.0)
}

fn tg_action(action: ChatAction) -> tg::ChatAction {
    match action {
        ChatAction::Typing => tg::ChatAction::Typing,
        ChatAction::UploadVideo => tg::ChatAction::UploadVideo,
        ChatAction::UploadDocument => tg::ChatAction::UploadDocument,
        ChatAction::RecordVideoNote => tg::ChatAction::RecordVideoNote,
        ChatAction::RecordAudio => tg::ChatAction::RecordVoice,
        ChatAction::UploadAudio => tg::ChatAction::UploadVoice,
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, chat: ChatId, text: &str, reply_to: Option<MessageId>) -> Result<MessageRef> {
        let mut request = self
            .bot
            .send_message(tg_chat(chat), text)
            .disable_web_page_preview(true);
        if let Some(id) = reply_to {
            request = request
                .reply_to_message_id(tg::MessageId(id.0))
                .allow_sending_without_reply(true);
        }

        let sent = request.await.context("Failed to send message")?;
        Ok(MessageRef {
            chat,
            id: MessageId(sent.id.0),
        })
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<()> {
        match self
            .bot
            .edit_message_text(tg_chat(message.chat), tg::MessageId(message.id.0), text)
            .await
        {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to edit message")),
        }
    }

    async fn send_action(&self, chat: ChatId, action: ChatAction) -> Result<()> {
        self.bot
            .send_chat_action(tg_chat(chat), tg_action(action))
            .await
            .context("Failed to send chat action")?;
        Ok(())
    }

    async fn send_video(
        &self,
        chat: ChatId,
        upload: VideoUpload,
        progress: &dyn ProgressSink,
    ) -> Result<DeliveredArtifact> {
        let markup = InlineKeyboardMarkup::new([[InlineKeyboardButton::callback(
            upload.follow_up.label.clone(),
            upload.follow_up.callback_data(),
        )]]);

        let file = tokio::fs::File::open(&upload.path)
            .await
            .with_context(|| format!("Failed to open {}", upload.path.display()))?;
        let total = file.metadata().await?.len();
        let file_name = upload
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());

        tracing::info!(chat = chat.0, "Uploading {} ({} bytes)", upload.path.display(), total);
        let (counter, mut uploaded) = CountingReader::new(file);
        let request = self
            .bot
            .send_video(tg_chat(chat), InputFile::read(counter).file_name(file_name))
            .caption(upload.caption)
            .supports_streaming(true)
            .reply_markup(markup)
            .send();
        tokio::pin!(request);

        let sent = loop {
            tokio::select! {
                result = &mut request => break result,
                changed = uploaded.changed() => match changed {
                    Ok(()) => {
                        let sent = *uploaded.borrow_and_update();
                        progress.report(upload_progress(sent, total)).await;
                    }
                    // Reader dropped, nothing more to report
                    Err(_) => break (&mut request).await,
                },
            }
        }
        .context("Failed to upload video")?;

        delivered_artifact(chat, &sent)
            .ok_or_else(|| BotError::Transport("uploaded message carries no file".into()).into())
    }

    async fn send_audio(&self, chat: ChatId, path: &Path) -> Result<MessageRef> {
        let sent = self
            .bot
            .send_audio(tg_chat(chat), InputFile::file(path.to_path_buf()))
            .await
            .context("Failed to upload audio")?;
        Ok(MessageRef {
            chat,
            id: MessageId(sent.id.0),
        })
    }

    async fn acknowledge(&self, activation_id: &str, text: &str) -> Result<()> {
        self.bot
            .answer_callback_query(activation_id)
            .text(text)
            .await
            .context("Failed to answer callback query")?;
        Ok(())
    }

    async fn fetch_file(&self, file: &FileRef, destination: &Path) -> Result<()> {
        let remote = self
            .bot
            .get_file(file.0.clone())
            .await
            .context("Failed to look up file")?;

        let mut output = tokio::fs::File::create(destination)
            .await
            .with_context(|| format!("Failed to create {}", destination.display()))?;
        self.bot
            .download_file(&remote.path, &mut output)
            .await
            .context("Failed to download file")?;
        output.flush().await?;

        Ok(())
    }
}

/// Reader publishing the number of bytes read so far
struct CountingReader<R> {
    inner: R,
    read: u64,
    progress: watch::Sender<u64>,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> (Self, watch::Receiver<u64>) {
        let (progress, receiver) = watch::channel(0);
        (
            Self {
                inner,
                read: 0,
                progress,
            },
            receiver,
        )
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut task::Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let n = buf.filled().len() - before;
            if n > 0 {
                this.read += n as u64;
                this.progress.send_replace(this.read);
            }
        }
        poll
    }
}

/// The uploaded video (or document) carried by `message`
fn delivered_artifact(chat: ChatId, message: &tg::Message) -> Option<DeliveredArtifact> {
    let (file, file_name) = if let Some(video) = message.video() {
        (video.file.id.clone(), video.file_name.clone())
    } else if let Some(document) = message.document() {
        (document.file.id.clone(), document.file_name.clone())
    } else {
        return None;
    };

    Some(DeliveredArtifact {
        message: MessageRef {
            chat,
            id: MessageId(message.id.0),
        },
        file: FileRef(file),
        file_name,
    })
}

fn inbound_message(message: &tg::Message) -> Option<InboundMessage> {
    let text = message.text()?;
    Some(InboundMessage {
        chat: ChatId(message.chat.id.0),
        kind: if message.chat.is_private() {
            ChatKind::Private
        } else {
            ChatKind::Group
        },
        message_id: MessageId(message.id.0),
        text: text.to_string(),
    })
}

fn follow_up_activation(query: &tg::CallbackQuery) -> Option<FollowUpActivation> {
    let message = query.message.as_ref()?;
    let chat = ChatId(message.chat.id.0);
    Some(FollowUpActivation {
        id: query.id.clone(),
        chat,
        token: query
            .data
            .as_deref()
            .and_then(FollowUpControl::parse_token)
            .map(String::from),
        attached: delivered_artifact(chat, message),
    })
}

async fn on_message(message: tg::Message, service: Arc<BotService>) -> HandlerResult {
    if let Some(inbound) = inbound_message(&message) {
        service.spawn_message(inbound);
    }
    Ok(())
}

async fn on_callback_query(query: tg::CallbackQuery, service: Arc<BotService>) -> HandlerResult {
    match follow_up_activation(&query) {
        Some(activation) => {
            service.spawn_follow_up(activation);
        }
        None => tracing::warn!("Callback query without a message, ignoring"),
    }
    Ok(())
}

/// Receive updates until the process is interrupted
pub async fn run(bot: Bot, service: Arc<BotService>) {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback_query));

    tracing::info!("Listening for updates");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![service])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
