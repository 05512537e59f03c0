use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChatError, ChatId, MediaFile, MessageId, Messenger};

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text {
        chat: i64,
        text: String,
        reply_to: Option<i64>,
    },
    Photo {
        chat: i64,
        caption: Option<String>,
    },
    Video {
        chat: i64,
        name: String,
        caption: Option<String>,
    },
    Group {
        chat: i64,
        names: Vec<String>,
        reply_to: Option<i64>,
    },
    Deleted {
        chat: i64,
        message: i64,
    },
}

impl Sent {
    pub fn chat(&self) -> i64 {
        match self {
            Sent::Text { chat, .. }
            | Sent::Photo { chat, .. }
            | Sent::Video { chat, .. }
            | Sent::Group { chat, .. }
            | Sent::Deleted { chat, .. } => *chat,
        }
    }
}

/// Messenger that keeps everything it was asked to send.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    next_id: Mutex<i64>,
    failing: HashSet<i64>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `chat` fails with an API error.
    pub fn failing_for(mut self, chat: i64) -> Self {
        self.failing.insert(chat);
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
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

    fn push(&self, chat: ChatId, sent: Sent) -> Result<MessageId, ChatError> {
        if self.failing.contains(&chat.0) {
            return Err(ChatError::Api {
                code: 403,
                description: "Forbidden: bot was blocked by the user".into(),
            });
        }
        self.sent.lock().unwrap().push(sent);
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        Ok(MessageId(*next))
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError> {
        self.push(
            chat,
            Sent::Text {
                chat: chat.0,
                text: text.to_string(),
                reply_to: reply_to.map(|m| m.0),
            },
        )
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        photo: MediaFile,
        _reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError> {
        self.push(
            chat,
            Sent::Photo {
                chat: chat.0,
                caption: photo.caption,
            },
        )
    }

    async fn send_video(
        &self,
        chat: ChatId,
        video: MediaFile,
        _reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError> {
        self.push(
            chat,
            Sent::Video {
                chat: chat.0,
                name: video.name,
                caption: video.caption,
            },
        )
    }

    async fn send_media_group(
        &self,
        chat: ChatId,
        videos: Vec<MediaFile>,
        reply_to: Option<MessageId>,
    ) -> Result<(), ChatError> {
        self.push(
            chat,
            Sent::Group {
                chat: chat.0,
                names: videos.into_iter().map(|v| v.name).collect(),
                reply_to: reply_to.map(|m| m.0),
            },
        )
        .map(|_| ())
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), ChatError> {
        self.push(
            chat,
            Sent::Deleted {
                chat: chat.0,
                message: message.0,
            },
        )
        .map(|_| ())
    }
}
