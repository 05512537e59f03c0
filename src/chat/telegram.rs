use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use super::command::{CommandRouter, IncomingCommand};
use super::{ChatError, ChatId, MediaFile, MessageId, Messenger};

const API_BASE: &str = "https://api.telegram.org";
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    from: Option<User>,
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

impl Update {
    fn into_command(self) -> Option<IncomingCommand> {
        let message = self.message?;
        let sender = message.from?.id;
        let text = message.text?;
        IncomingCommand::parse(
            sender,
            ChatId(message.chat.id),
            MessageId(message.message_id),
            &text,
        )
    }
}

/// Bot API client used both for notifications and for receiving commands.
pub struct TelegramBot {
    http: reqwest::Client,
    base_url: String,
    poll_timeout: Duration,
}

impl TelegramBot {
    pub fn new(token: &str, poll_timeout: Duration) -> Result<Self, ChatError> {
        Self::with_base_url(API_BASE, token, poll_timeout)
    }

    pub fn with_base_url(
        api_base: &str,
        token: &str,
        poll_timeout: Duration,
    ) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("yicam-bridge/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
            poll_timeout,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T, ChatError> {
        let response = self
            .http
            .post(self.url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        unwrap_response(response.json().await?)
    }

    async fn call_multipart<T: DeserializeOwned>(
        &self,
        method: &str,
        form: Form,
    ) -> Result<T, ChatError> {
        let response = self
            .http
            .post(self.url(method))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        unwrap_response(response.json().await?)
    }

    async fn send_file(
        &self,
        method: &str,
        field: &'static str,
        chat: ChatId,
        file: MediaFile,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError> {
        let mut form = Form::new()
            .text("chat_id", chat.0.to_string())
            .part(field, Part::bytes(file.data).file_name(file.name));
        if let Some(caption) = file.caption {
            form = form.text("caption", caption).text("parse_mode", "HTML");
        }
        if let Some(reply) = reply_to {
            form = form.text("reply_parameters", reply_parameters(reply).to_string());
        }

        let sent: SentMessage = self.call_multipart(method, form).await?;
        Ok(MessageId(sent.message_id))
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ChatError> {
        let body = json!({
            "offset": offset,
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        self.call_json("getUpdates", &body, self.poll_timeout + REQUEST_TIMEOUT)
            .await
    }

    /// Long-poll for commands until cancelled. Every command runs in its own
    /// task so a slow camera never holds up the next update. Handlers still
    /// running at cancellation are awaited before returning.
    pub async fn poll_commands(
        self: Arc<Self>,
        router: Arc<CommandRouter>,
        cancel: CancellationToken,
    ) {
        let mut offset = 0;
        let mut handlers = JoinSet::new();
        tracing::info!("polling for chat commands");

        loop {
            while let Some(finished) = handlers.try_join_next() {
                log_handler_exit(finished);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.get_updates(offset) => result,
            };

            let updates = match result {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!("failed to poll updates: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                    }
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(command) = update.into_command() else {
                    continue;
                };

                let router = Arc::clone(&router);
                handlers.spawn(async move {
                    if let Err(e) = router.handle(&command).await {
                        tracing::warn!(
                            chat = %command.chat,
                            command = %command.name,
                            "failed to reply: {}",
                            e
                        );
                    }
                });
            }
        }

        if !handlers.is_empty() {
            tracing::info!(pending = handlers.len(), "waiting for command handlers");
        }
        while let Some(finished) = handlers.join_next().await {
            log_handler_exit(finished);
        }

        tracing::info!("stopped polling for chat commands");
    }
}

fn log_handler_exit(result: Result<(), JoinError>) {
    if let Err(e) = result {
        tracing::error!("command handler failed: {}", e);
    }
}

fn reply_parameters(message: MessageId) -> Value {
    json!({ "message_id": message.0, "allow_sending_without_reply": true })
}

fn unwrap_response<T>(response: ApiResponse<T>) -> Result<T, ChatError> {
    match (response.ok, response.result) {
        (true, Some(result)) => Ok(result),
        _ => Err(ChatError::Api {
            code: response.error_code,
            description: response.description,
        }),
    }
}

/// JSON `media` field for `sendMediaGroup`, attachments named `video{i}`.
fn media_group_manifest(videos: &[MediaFile]) -> Value {
    let items: Vec<Value> = videos
        .iter()
        .enumerate()
        .map(|(i, video)| {
            let mut item = json!({ "type": "video", "media": format!("attach://video{i}") });
            if let Some(caption) = &video.caption {
                item["caption"] = json!(caption);
                item["parse_mode"] = json!("HTML");
            }
            item
        })
        .collect();
    Value::Array(items)
}

#[async_trait]
impl Messenger for TelegramBot {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError> {
        let mut body = json!({ "chat_id": chat.0, "text": text, "parse_mode": "HTML" });
        if let Some(reply) = reply_to {
            body["reply_parameters"] = reply_parameters(reply);
        }
        let sent: SentMessage = self
            .call_json("sendMessage", &body, REQUEST_TIMEOUT)
            .await?;
        Ok(MessageId(sent.message_id))
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        photo: MediaFile,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError> {
        self.send_file("sendPhoto", "photo", chat, photo, reply_to)
            .await
    }

    async fn send_video(
        &self,
        chat: ChatId,
        video: MediaFile,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError> {
        self.send_file("sendVideo", "video", chat, video, reply_to)
            .await
    }

    async fn send_media_group(
        &self,
        chat: ChatId,
        mut videos: Vec<MediaFile>,
        reply_to: Option<MessageId>,
    ) -> Result<(), ChatError> {
        // Albums need at least two items.
        match videos.len() {
            0 => return Ok(()),
            1 => {
                if let Some(video) = videos.pop() {
                    self.send_video(chat, video, reply_to).await?;
                }
                return Ok(());
            }
            _ => {}
        }

        let mut form = Form::new()
            .text("chat_id", chat.0.to_string())
            .text("media", media_group_manifest(&videos).to_string());
        if let Some(reply) = reply_to {
            form = form.text("reply_parameters", reply_parameters(reply).to_string());
        }
        for (i, video) in videos.into_iter().enumerate() {
            form = form.part(
                format!("video{i}"),
                Part::bytes(video.data).file_name(video.name),
            );
        }

        let _: Vec<SentMessage> = self.call_multipart("sendMediaGroup", form).await?;
        Ok(())
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), ChatError> {
        let body = json!({ "chat_id": chat.0, "message_id": message.0 });
        let _: bool = self
            .call_json("deleteMessage", &body, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }
}
