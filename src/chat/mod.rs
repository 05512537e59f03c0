pub mod command;
mod messenger;
pub mod telegram;
#[cfg(test)]
pub mod testing;

pub use command::CommandRouter;
pub use messenger::{escape_html, ChatError, ChatId, MediaFile, MessageId, Messenger};
pub use telegram::TelegramBot;
