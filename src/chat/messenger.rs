use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat api error {code}: {description}")]
    Api {
        code: i64,
        description: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageId(pub i64);

/// An uploaded attachment. Captions are HTML.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub name: String,
    pub data: Vec<u8>,
    pub caption: Option<String>,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

/// Outbound side of the chat front-end. All text is sent in HTML parse mode.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError>;

    async fn send_photo(
        &self,
        chat: ChatId,
        photo: MediaFile,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError>;

    async fn send_video(
        &self,
        chat: ChatId,
        video: MediaFile,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, ChatError>;

    async fn send_media_group(
        &self,
        chat: ChatId,
        videos: Vec<MediaFile>,
        reply_to: Option<MessageId>,
    ) -> Result<(), ChatError>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), ChatError>;
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
