//! Telegram Bot API message source for tgarc.
//!
//! Resolves channel handles with `getChat`, replays the bot's pending update
//! queue as history and long-polls `getUpdates` for live messages. The bot
//! must be an administrator of (or a member in) every channel it ingests.

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod handle;
pub mod source;
pub mod types;

pub use client::{DEFAULT_API_BASE_URL, TelegramClient};
pub use error::{TelegramError, TelegramResult};
pub use handle::parse_handle;
pub use source::{
    BackoffConfig, HISTORY_PAGE_SIZE, TelegramSource, TelegramSourceConfig, backlog_page,
    chat_to_channel, to_source_message,
};
pub use types::{ChatId, GetUpdatesRequest, Update};
