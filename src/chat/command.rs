use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::camera::{CameraApi, CameraError, CameraRegistry, Resolution};

use super::{escape_html, ChatError, ChatId, MediaFile, MessageId, Messenger};

/// Listings never show more than this many rows.
pub const LISTING_LIMIT: usize = 20;

const WAIT_TEXT: &str = "Please wait...";

const HELP_COMMANDS: [&str; 6] = [
    "/cameras",
    "/video",
    "/snapshot",
    "/eventsdir",
    "/eventsfile",
    "/last_video",
];

const USAGE_SNAPSHOT: &str = "snapshot <camera_name>";
const USAGE_VIDEO: &str = "video <camera_name> <path>";
const USAGE_EVENTSDIR: &str = "eventsdir <camera_name>";
const USAGE_EVENTSFILE: &str = "eventsfile <camera_name> <dirname>";
const USAGE_LAST_VIDEO: &str = "last_video <camera_name>";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("sender {0} is not authorized")]
    Unauthorized(i64),
    #[error("unknown command /{0}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("camera {0} doesn't exist")]
    NotFound(String),
    #[error("no event recorded on {0}")]
    NoEvent(String),
    #[error("no file in latest event of {0}")]
    NoFile(String),
    #[error("camera {camera} failed: {source}")]
    Camera {
        camera: String,
        #[source]
        source: CameraError,
    },
}

impl CommandError {
    /// What the user sees, or `None` when the command is dropped silently.
    pub fn reply_text(&self) -> Option<String> {
        match self {
            CommandError::Unauthorized(_) | CommandError::Unknown(_) => None,
            CommandError::Usage(usage) => Some(format!("Usage: {}", escape_html(usage))),
            CommandError::NotFound(name) => Some(format!(
                "Camera: <code>{}</code> doesn't exist",
                escape_html(name)
            )),
            CommandError::NoEvent(name) => Some(format!(
                "Last event for <code>{}</code> not found",
                escape_html(name)
            )),
            CommandError::NoFile(name) => Some(format!(
                "Last file for <code>{}</code> not found",
                escape_html(name)
            )),
            CommandError::Camera { camera, source } if source.is_protocol() => Some(format!(
                "Camera <code>{}</code> failed: {}",
                escape_html(camera),
                escape_html(&source.to_string())
            )),
            CommandError::Camera { camera, source } => Some(format!(
                "Camera <code>{}</code> is unreachable: {}",
                escape_html(camera),
                escape_html(&source.to_string())
            )),
        }
    }
}

/// A slash command as received from a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCommand {
    pub sender: i64,
    pub chat: ChatId,
    pub message: MessageId,
    pub name: String,
    pub args: Vec<String>,
}

impl IncomingCommand {
    /// Parses `/name[@bot] arg1 arg2 ...`; anything else is not a command.
    pub fn parse(sender: i64, chat: ChatId, message: MessageId, text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let head = words.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head);
        if name.is_empty() {
            return None;
        }

        Some(Self {
            sender,
            chat,
            message,
            name: name.to_lowercase(),
            args: words.map(str::to_string).collect(),
        })
    }

    fn arg(&self, index: usize) -> &str {
        self.args.get(index).map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug)]
pub enum Reply {
    Text(String),
    Photo(MediaFile),
    Video(MediaFile),
}

pub struct CommandRouter {
    registry: Arc<CameraRegistry>,
    messenger: Arc<dyn Messenger>,
    authorized: HashSet<i64>,
}

impl CommandRouter {
    pub fn new(
        registry: Arc<CameraRegistry>,
        messenger: Arc<dyn Messenger>,
        recipients: &[ChatId],
    ) -> Self {
        Self {
            registry,
            messenger,
            authorized: recipients.iter().map(|c| c.0).collect(),
        }
    }

    pub fn is_authorized(&self, sender: i64) -> bool {
        self.authorized.contains(&sender)
    }

    /// Run a command and send its reply back to the originating chat.
    pub async fn handle(&self, command: &IncomingCommand) -> Result<(), ChatError> {
        let reply = match self.execute(command).await {
            Ok(reply) => reply,
            Err(e) => match e.reply_text() {
                Some(text) => {
                    tracing::info!(chat = %command.chat, command = %command.name, "{}", e);
                    Reply::Text(text)
                }
                None => {
                    tracing::debug!(
                        sender = command.sender,
                        command = %command.name,
                        "dropped: {}",
                        e
                    );
                    return Ok(());
                }
            },
        };

        match reply {
            Reply::Text(text) => {
                self.messenger.send_text(command.chat, &text, None).await?;
            }
            Reply::Photo(photo) => {
                self.messenger
                    .send_photo(command.chat, photo, Some(command.message))
                    .await?;
            }
            Reply::Video(video) => {
                self.messenger
                    .send_video(command.chat, video, Some(command.message))
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn execute(&self, command: &IncomingCommand) -> Result<Reply, CommandError> {
        if !self.is_authorized(command.sender) {
            return Err(CommandError::Unauthorized(command.sender));
        }

        tracing::info!(
            sender = command.sender,
            command = %command.name,
            args = ?command.args,
            "handling command"
        );

        match command.name.as_str() {
            "help" | "start" => Ok(self.help()),
            "cameras" => Ok(self.cameras()),
            "snapshot" => {
                let camera = self.camera(command, 1, USAGE_SNAPSHOT)?;
                self.with_wait(command, snapshot(camera)).await
            }
            "video" => {
                let camera = self.camera(command, 2, USAGE_VIDEO)?;
                self.with_wait(command, video(camera, command.arg(1).to_string()))
                    .await
            }
            "eventsdir" => {
                let camera = self.camera(command, 1, USAGE_EVENTSDIR)?;
                self.with_wait(command, events_dir(camera)).await
            }
            "eventsfile" => {
                let camera = self.camera(command, 2, USAGE_EVENTSFILE)?;
                self.with_wait(command, events_file(camera, command.arg(1).to_string()))
                    .await
            }
            "last_video" => {
                let camera = self.camera(command, 1, USAGE_LAST_VIDEO)?;
                self.with_wait(command, last_video(camera)).await
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    fn help(&self) -> Reply {
        let lines: Vec<String> = HELP_COMMANDS.iter().map(|c| format!("- {c}")).collect();
        Reply::Text(format!("<b>Allowed commands:</b>\n\n{}", lines.join("\n")))
    }

    fn cameras(&self) -> Reply {
        let lines: Vec<String> = self
            .registry
            .names()
            .iter()
            .map(|n| format!("- <code>{}</code>", escape_html(n)))
            .collect();
        Reply::Text(format!(
            "<b>Available cameras:</b>\n\n{}",
            lines.join("\n")
        ))
    }

    /// Checks the argument count, then resolves the first argument.
    fn camera(
        &self,
        command: &IncomingCommand,
        required: usize,
        usage: &'static str,
    ) -> Result<Arc<dyn CameraApi>, CommandError> {
        if command.args.len() < required {
            return Err(CommandError::Usage(usage));
        }
        let name = command.arg(0);
        self.registry
            .client(name)
            .ok_or_else(|| CommandError::NotFound(name.to_string()))
    }

    /// Shows a transient acknowledgment while `work` runs and removes it
    /// afterwards, whatever the outcome.
    async fn with_wait<F>(
        &self,
        command: &IncomingCommand,
        work: F,
    ) -> Result<Reply, CommandError>
    where
        F: Future<Output = Result<Reply, CommandError>>,
    {
        let wait = match self
            .messenger
            .send_text(command.chat, WAIT_TEXT, None)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(chat = %command.chat, "failed to send wait message: {}", e);
                None
            }
        };

        let result = work.await;

        if let Some(id) = wait {
            if let Err(e) = self.messenger.delete_message(command.chat, id).await {
                tracing::warn!(chat = %command.chat, "failed to delete wait message: {}", e);
            }
        }

        result
    }
}

fn camera_failed(camera: &dyn CameraApi) -> impl FnOnce(CameraError) -> CommandError + '_ {
    move |source| CommandError::Camera {
        camera: camera.name().to_string(),
        source,
    }
}

async fn snapshot(camera: Arc<dyn CameraApi>) -> Result<Reply, CommandError> {
    let image = camera
        .snapshot(Resolution::High, false)
        .await
        .map_err(camera_failed(camera.as_ref()))?;
    Ok(Reply::Photo(MediaFile::new(
        format!("{}.jpg", camera.name()),
        image,
    )))
}

async fn video(camera: Arc<dyn CameraApi>, path: String) -> Result<Reply, CommandError> {
    let data = camera
        .fetch_video(&path)
        .await
        .map_err(camera_failed(camera.as_ref()))?;
    Ok(Reply::Video(video_file(&path, data)))
}

async fn events_dir(camera: Arc<dyn CameraApi>) -> Result<Reply, CommandError> {
    let dirs = camera
        .list_event_directories()
        .await
        .map_err(camera_failed(camera.as_ref()))?;

    let lines: Vec<String> = dirs
        .iter()
        .take(LISTING_LIMIT)
        .map(|d| {
            format!(
                "- {}\n  <code>{}</code>",
                escape_html(&d.datetime),
                escape_html(&d.dirname)
            )
        })
        .collect();
    Ok(Reply::Text(format!(
        "<b>Events dir:</b>\n\n{}",
        lines.join("\n")
    )))
}

async fn events_file(camera: Arc<dyn CameraApi>, dirname: String) -> Result<Reply, CommandError> {
    let files = camera
        .list_event_files(&dirname)
        .await
        .map_err(camera_failed(camera.as_ref()))?;

    let lines: Vec<String> = files
        .records
        .iter()
        .take(LISTING_LIMIT)
        .map(|f| {
            format!(
                "- {}\n  {}\n  <code>{}/{}</code>",
                escape_html(&f.time),
                escape_html(&f.filename),
                escape_html(&dirname),
                escape_html(&f.filename)
            )
        })
        .collect();
    Ok(Reply::Text(format!(
        "<b>Event files for: {}</b>\n\n{}",
        escape_html(&files.date),
        lines.join("\n")
    )))
}

/// Newest directory, then newest file in it. Relies on the camera listing
/// both newest first.
async fn last_video(camera: Arc<dyn CameraApi>) -> Result<Reply, CommandError> {
    let dirs = camera
        .list_event_directories()
        .await
        .map_err(camera_failed(camera.as_ref()))?;
    let Some(last_event) = dirs.first() else {
        return Err(CommandError::NoEvent(camera.name().to_string()));
    };

    let files = camera
        .list_event_files(&last_event.dirname)
        .await
        .map_err(camera_failed(camera.as_ref()))?;
    let Some(last_file) = files.records.first() else {
        return Err(CommandError::NoFile(camera.name().to_string()));
    };

    let path = format!("{}/{}", last_event.dirname, last_file.filename);
    let data = camera
        .fetch_video(&path)
        .await
        .map_err(camera_failed(camera.as_ref()))?;
    Ok(Reply::Video(video_file(&path, data)))
}

fn video_file(path: &str, data: Vec<u8>) -> MediaFile {
    let name = path.rsplit('/').next().unwrap_or(path);
    MediaFile::new(name, data)
        .with_caption(format!("<code>{}</code>", escape_html(path)))
}
