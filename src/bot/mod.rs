//! Telegram transport: the Bot API client and the update handlers.

pub mod api;
pub mod handlers;

pub use api::{InlineButton, Keyboard, TelegramApi};
pub use handlers::BotApp;
