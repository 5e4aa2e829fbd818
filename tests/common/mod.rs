//! Shared fakes for ytdl-bot integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use ytdl_bot::config::Config;
use ytdl_bot::engines::{ConversionEngine, DownloadEngine, DownloadResult, Progress, ProgressSink};
use ytdl_bot::payment::DisabledPayments;
use ytdl_bot::transport::{
    upload_progress, ChatAction, ChatId, ChatTransport, DeliveredArtifact, FileRef, FollowUpControl, InboundMessage, MessageId,
    MessageRef, VideoUpload,
};
use ytdl_bot::validator::ChatKind;
use ytdl_bot::BotService;

/// Everything the bot sent, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text {
        message: MessageRef,
        text: String,
        reply_to: Option<MessageId>,
    },
    Edit {
        message: MessageRef,
        text: String,
    },
    Action {
        chat: ChatId,
        action: ChatAction,
    },
    Video {
        message: MessageRef,
        caption: String,
        follow_up: FollowUpControl,
        file_name: String,
    },
    Audio {
        message: MessageRef,
        file_name: String,
    },
    Ack {
        id: String,
        text: String,
    },
    Fetch {
        file: FileRef,
        destination: PathBuf,
    },
}

/// In-memory chat transport recording every call
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI32,
    failing_uploads: Option<ChatId>,
}

impl RecordingTransport {
    /// Transport whose video uploads to `chat` are rejected
    pub fn failing_uploads_to(chat: i64) -> Self {
        Self {
            failing_uploads: Some(ChatId(chat)),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Edit { message, text } => Some((message, text)),
                _ => None,
            })
            .collect()
    }

    pub fn videos(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Video { .. }))
            .collect()
    }

    pub fn audios(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Audio { .. }))
            .collect()
    }

    fn next_message(&self, chat: ChatId) -> MessageRef {
        MessageRef {
            chat,
            id: MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        }
    }

    fn record(&self, sent: Sent) {
        self.sent.lock().push(sent);
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, chat: ChatId, text: &str, reply_to: Option<MessageId>) -> anyhow::Result<MessageRef> {
        let message = self.next_message(chat);
        self.record(Sent::Text {
            message,
            text: text.to_string(),
            reply_to,
        });
        Ok(message)
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> anyhow::Result<()> {
        self.record(Sent::Edit {
            message,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_action(&self, chat: ChatId, action: ChatAction) -> anyhow::Result<()> {
        self.record(Sent::Action { chat, action });
        Ok(())
    }

    async fn send_video(
        &self,
        chat: ChatId,
        upload: VideoUpload,
        progress: &dyn ProgressSink,
    ) -> anyhow::Result<DeliveredArtifact> {
        anyhow::ensure!(upload.path.exists(), "upload source {} is missing", upload.path.display());
        let total = fs_err::metadata(&upload.path)?.len();
        progress.report(upload_progress(total / 2, total)).await;
        anyhow::ensure!(self.failing_uploads != Some(chat), "Bad Request: file upload rejected");
        progress.report(upload_progress(total, total)).await;

        let message = self.next_message(chat);
        let file_name = upload
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(Sent::Video {
            message,
            caption: upload.caption,
            follow_up: upload.follow_up,
            file_name: file_name.clone(),
        });
        Ok(DeliveredArtifact {
            message,
            file: FileRef(format!("file-{}", message.id.0)),
            file_name: Some(file_name),
        })
    }

    async fn send_audio(&self, chat: ChatId, path: &Path) -> anyhow::Result<MessageRef> {
        anyhow::ensure!(path.exists(), "audio {} is missing", path.display());
        let message = self.next_message(chat);
        self.record(Sent::Audio {
            message,
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        });
        Ok(message)
    }

    async fn acknowledge(&self, activation_id: &str, text: &str) -> anyhow::Result<()> {
        self.record(Sent::Ack {
            id: activation_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn fetch_file(&self, file: &FileRef, destination: &Path) -> anyhow::Result<()> {
        fs_err::write(destination, b"video-bytes")?;
        self.record(Sent::Fetch {
            file: file.clone(),
            destination: destination.to_path_buf(),
        });
        Ok(())
    }
}

/// Download engine with a fixed outcome
pub enum Script {
    Succeed { file_name: String, progress: Vec<f64> },
    Fail { detail: String },
}

pub struct ScriptedDownloader {
    script: Script,
    panic_on: Option<String>,
    calls: AtomicUsize,
    destinations: Mutex<Vec<PathBuf>>,
}

impl ScriptedDownloader {
    pub fn succeeding(file_name: &str) -> Self {
        Self::new(Script::Succeed {
            file_name: file_name.to_string(),
            progress: vec![0.1, 0.5, 0.4, 1.0],
        })
    }

    pub fn failing(detail: impl Into<String>) -> Self {
        Self::new(Script::Fail { detail: detail.into() })
    }

    fn new(script: Script) -> Self {
        Self {
            script,
            panic_on: None,
            calls: AtomicUsize::new(0),
            destinations: Mutex::new(Vec::new()),
        }
    }

    /// Panic instead of downloading URLs containing `fragment`
    pub fn panicking_on(mut self, fragment: &str) -> Self {
        self.panic_on = Some(fragment.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn destinations(&self) -> Vec<PathBuf> {
        self.destinations.lock().clone()
    }
}

#[async_trait]
impl DownloadEngine for ScriptedDownloader {
    async fn download(&self, url: &str, destination: &Path, progress: &dyn ProgressSink) -> DownloadResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.destinations.lock().push(destination.to_path_buf());
        if let Some(fragment) = &self.panic_on {
            if url.contains(fragment.as_str()) {
                panic!("engine crashed on {}", url);
            }
        }

        match &self.script {
            Script::Succeed { file_name, progress: steps } => {
                for step in steps {
                    progress
                        .report(Progress::new(Some(*step), format!("{:.0}% of 10.00MiB", step * 100.0)))
                        .await;
                }
                let file_path = destination.join(file_name);
                if let Err(e) = fs_err::write(&file_path, b"video-bytes") {
                    return DownloadResult::failure(e.to_string());
                }
                DownloadResult::Success { file_path }
            }
            Script::Fail { detail } => {
                // Leave something behind so cleanup has work to do
                let _ = fs_err::write(destination.join("partial.mp4.part"), b"x");
                DownloadResult::failure(detail.clone())
            }
        }
    }
}

/// Conversion engine that writes a placeholder file or fails
pub struct FakeConverter {
    fail: bool,
    calls: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeConverter {
    pub fn working() -> Self {
        Self {
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn broken() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, PathBuf)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ConversionEngine for FakeConverter {
    async fn convert(&self, target_name: &str, source: &Path) -> anyhow::Result<PathBuf> {
        self.calls.lock().push((target_name.to_string(), source.to_path_buf()));
        anyhow::ensure!(!self.fail, "ffmpeg: Invalid data found when processing input");
        let target = source.with_file_name(target_name);
        fs_err::write(&target, b"audio-bytes")?;
        Ok(target)
    }
}

/// A bot wired to fakes, with handles to inspect them
pub struct Harness {
    pub service: Arc<BotService>,
    pub transport: Arc<RecordingTransport>,
    pub downloader: Arc<ScriptedDownloader>,
    pub converter: Arc<FakeConverter>,
    pub temp_base: TempDir,
}

pub fn test_config(max_requests: u32, temp_base: &Path) -> Config {
    let mut config = Config::default();
    config.quota.max_requests = max_requests;
    config.bot.progress_interval_ms = 0;
    config.bot.temp_dir = Some(temp_base.to_path_buf());
    config
}

pub fn harness(max_requests: u32, downloader: ScriptedDownloader, converter: FakeConverter) -> Harness {
    harness_with(RecordingTransport::default(), downloader, converter, |config| {
        config.quota.max_requests = max_requests
    })
}

/// Like [`harness`] with a chosen transport and adjustments to the config
pub fn harness_with(
    transport: RecordingTransport,
    downloader: ScriptedDownloader,
    converter: FakeConverter,
    configure: impl FnOnce(&mut Config),
) -> Harness {
    let temp_base = tempfile::tempdir().expect("temp dir");
    let mut config = test_config(5, temp_base.path());
    configure(&mut config);
    let transport = Arc::new(transport);
    let downloader = Arc::new(downloader);
    let converter = Arc::new(converter);

    let service = Arc::new(BotService::new(
        &config,
        transport.clone(),
        downloader.clone(),
        converter.clone(),
        Arc::new(DisabledPayments),
    ));

    Harness {
        service,
        transport,
        downloader,
        converter,
        temp_base,
    }
}

pub fn private_message(chat: i64, text: &str) -> InboundMessage {
    InboundMessage {
        chat: ChatId(chat),
        kind: ChatKind::Private,
        message_id: MessageId(1000),
        text: text.to_string(),
    }
}

pub fn group_message(chat: i64, text: &str) -> InboundMessage {
    InboundMessage {
        kind: ChatKind::Group,
        ..private_message(chat, text)
    }
}

/// Entries left in a directory
pub fn dir_entries(path: &Path) -> usize {
    fs_err::read_dir(path).map(|entries| entries.count()).unwrap_or(0)
}
